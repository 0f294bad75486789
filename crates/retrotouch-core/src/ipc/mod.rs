//! Framed RPC channel between the UI and the emulation process.
//!
//! Uses length-prefixed JSON calls over a pair of one-directional pipes.
//!
//! # Architecture
//!
//! - **Protocol**: wire triple, framing and the blocking frame writer
//! - **Messages**: closed request/event sets and their dispatch tables
//! - **Channel**: blocking poll mode for the runner loop
//! - **Receiver**: event-driven receive task for the supervisor

pub mod channel;
pub mod messages;
pub mod protocol;
pub mod receiver;

pub use channel::Channel;
pub use messages::{Event, Message, Request};
pub use protocol::{FrameWriter, RpcCall};
pub use receiver::{spawn_event_reader, Inbound};
