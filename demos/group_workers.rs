/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Group Workers Example - Worker reactors in a facility
//!
//! Demonstrates:
//! - Creating a Facility with several worker reactors
//! - Fanning out sub-requests from one async request
//! - Collecting results as responses arrive
//! - Closing the whole facility at once

use std::sync::Arc;

use parking_lot::Mutex;
use reactors::{AsyncRequest, Plant, Request, SyncRequest};

fn main() {
    tracing_subscriber::fmt::init();
    println!("=== Group Workers Example ===");
    println!("This example shows several worker reactors owned by one facility.\n");

    let plant = Plant::default();
    let group = plant.facility("workers").expect("create facility");
    let workers: Vec<_> = (0..5)
        .map(|i| group.non_blocking_reactor(&format!("worker_{}", i)).expect("create worker"))
        .collect();
    let collector = plant.non_blocking_reactor("collector").expect("create collector");
    println!("Started facility with {} workers\n", workers.len());

    let num_tasks = 10;
    let results = Arc::new(Mutex::new(Vec::new()));
    let received = Arc::clone(&results);
    let collect = AsyncRequest::new(&collector, move |ctx| {
        for i in 0..num_tasks {
            let worker = &workers[i % workers.len()];
            let input = (i + 1) as i64;
            println!("Sending compute({}) to {}", input, worker.name());
            let compute = SyncRequest::new(worker, move |ctx| {
                println!("{}: Processing input {}", ctx.reactor().name(), input);
                Ok((ctx.reactor().name().to_string(), input, input * input))
            });
            let received = Arc::clone(&received);
            ctx.send(&compute, move |ctx, (worker, input, output)| {
                println!("Collector: {} computed {}^2 = {}", worker, input, output);
                received.lock().push(output);
                if ctx.pending_count() == 0 {
                    let total: i64 = received.lock().iter().sum();
                    ctx.process_async_response(total);
                }
                Ok(())
            })?;
        }
        Ok(())
    });

    match collect.call() {
        Ok(total) => println!("\nCollector: All {} results received, sum = {}", results.lock().len(), total),
        Err(e) => println!("\nCollector failed: {}", e),
    }

    group.close();
    println!("Facility closed: {}", group.is_closed());
    plant.close();

    println!("\n=== Example Complete ===");
}
