//! Browser execution split.
//!
//! The page (main thread) owns the DOM: it spawns one render worker, transfers
//! the canvas to it as an offscreen surface and forwards input as protocol
//! messages. The worker owns everything GPU-side through a [`RenderWorker`],
//! which is plain Rust and runs the same against the headless backend.
//!
//! # Invariants
//! - After the canvas transfer the page holds no GPU resources.
//! - The worker runs its entry closure at most once, from the first
//!   well-formed bootstrap message.
//! - Each animation frame runs exactly one system pass; messages received
//!   since the previous frame are applied before it.

mod error;
mod runtime;

#[cfg(target_arch = "wasm32")]
mod js;
#[cfg(target_arch = "wasm32")]
mod main_thread;
#[cfg(target_arch = "wasm32")]
mod worker;

pub use error::WebError;
pub use runtime::{RenderWorker, WorkerRequest};

#[cfg(target_arch = "wasm32")]
pub use main_thread::{
    Disconnect, MainWorker, WebApp, connect_worker, forward_resize, forward_zoom, start,
};
#[cfg(target_arch = "wasm32")]
pub use worker::worker_bootstrap;

/// Route `tracing` events to the browser console and install the panic hook.
#[cfg(target_arch = "wasm32")]
fn init_logging() {
    console_error_panic_hook::set_once();
    // The page and its workers share one logger through shared memory, so
    // only the first call succeeds.
    let _ = console_log::init_with_level(log::Level::Info);
}

pub fn crate_info() -> &'static str {
    "kiln-web v0.1.0"
}
