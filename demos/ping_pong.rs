/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Ping-Pong Example - Two reactors exchanging requests
//!
//! Demonstrates:
//! - Creating a plant and reactors
//! - An async request that sends sync sub-requests
//! - Chaining sends from response callbacks
//! - call() to drive everything from main

use reactors::{AsyncContext, AsyncRequest, Plant, PlantConfig, Reactor, Request, Result, SyncRequest};
use tracing::info;

// Send one ping to the pong reactor; keep going from the response callback
fn volley(ctx: &mut AsyncContext<i32>, pong: Reactor, count: i32, max_count: i32) -> Result<()> {
    let ping = SyncRequest::new(&pong, move |ctx| {
        info!(reactor = %ctx.reactor().name(), count, "received ping, sending pong");
        Ok(count)
    });
    ctx.send(&ping, move |ctx, count| {
        info!(reactor = %ctx.reactor().name(), count, "received pong");
        if count >= max_count {
            ctx.process_async_response(count);
            Ok(())
        } else {
            volley(ctx, pong, count + 1, max_count)
        }
    })
}

fn main() {
    tracing_subscriber::fmt::init();
    println!("=== Ping-Pong Reactor Example ===");

    let plant = Plant::new(PlantConfig::default());
    let ping_reactor = plant.non_blocking_reactor("PingReactor").expect("create ping reactor");
    let pong_reactor = plant.non_blocking_reactor("PongReactor").expect("create pong reactor");

    let game = AsyncRequest::new(&ping_reactor, move |ctx| {
        info!("starting ping-pong");
        volley(ctx, pong_reactor, 1, 5)
    });

    match game.call() {
        Ok(rounds) => println!("Done after {} rounds", rounds),
        Err(e) => println!("Game failed: {}", e),
    }

    plant.close();
}
