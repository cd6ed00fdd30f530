/*
Timer Example

Demonstrates delays, scheduled tasks and per-reactor timing statistics.

Usage:
    cargo run --example timer_example

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
*/

use std::time::Duration;

use reactors::{AsyncContext, AsyncRequest, Delay, Plant, Reactor, Request, Result};

/// Wait `ticks` times on the clock reactor, one Delay at a time.
fn tick(ctx: &mut AsyncContext<u32>, clock: Reactor, done: u32, ticks: u32) -> Result<()> {
    let delay = Delay::new(&clock, Duration::from_millis(100));
    ctx.send(&delay, move |ctx, ()| {
        let done = done + 1;
        println!("TickerReactor: Periodic tick #{}", done);
        if done >= ticks {
            ctx.process_async_response(done);
            Ok(())
        } else {
            tick(ctx, clock, done, ticks)
        }
    })
}

fn main() {
    tracing_subscriber::fmt::init();
    println!("=== Timer Example ===");
    println!();

    let plant = Plant::default();
    let ticker = plant.non_blocking_reactor("ticker").expect("create ticker");
    let clock = plant.non_blocking_reactor("clock").expect("create clock");

    // A one-shot task on the plant's scheduler; it does not hold up call()
    // once it has fired.
    plant.schedule(
        Duration::from_millis(250),
        Box::new(|| println!("Scheduler: *** ONE-SHOT TASK FIRED! ***")),
    );

    let ticks = AsyncRequest::new(&ticker, move |ctx| {
        println!("TickerReactor: Starting 10 ticks, 100ms apart");
        tick(ctx, clock, 0, 10)
    });

    match ticks.call() {
        Ok(n) => println!("TickerReactor: {} ticks done", n),
        Err(e) => println!("TickerReactor: failed: {}", e),
    }

    let stats = ticker.timer().snapshot();
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("ticker timing: {}", json),
        Err(e) => println!("could not encode timing: {}", e),
    }

    plant.close();
    println!("\n=== Timer Example Complete ===");
}
