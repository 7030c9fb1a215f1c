//! Messages exchanged between the page and the render worker.
//!
//! Every message is a flat array whose first element is the message kind.
//! Arrays are modelled as `Vec<Field<H>>`, where `H` is the host's opaque
//! handle type (a `JsValue` in the browser), so the codec itself has no
//! platform dependency.
//!
//! # Invariants
//! - Each kind has exactly one array shape; anything else decodes to nothing.
//! - Unknown kinds are ignored, never reported as errors to the sender.
//! - A worker accepts its bootstrap message at most once.

mod bootstrap;
mod command;
mod message;

pub use bootstrap::{Bootstrap, BootstrapGuard};
pub use command::CustomCommand;
pub use message::{DecodeError, DomEvent, DomEventKind, Field, Message, MessageKind};

pub fn crate_info() -> &'static str {
    "kiln-protocol v0.1.0"
}
