//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the host training loop, the processor and the cryptographic
//! backend.

mod processor;
mod scheme;

pub use processor::Processor;
pub use scheme::{OpenedFrame, Scheme};
