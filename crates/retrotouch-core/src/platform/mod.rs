//! Platform abstraction layer.
//!
//! This module centralizes the raw OS plumbing the runtime core needs so the
//! rest of the crate works with owned, typed handles.
//!
//! # Architecture
//!
//! - `fd` - Pipe creation and descriptor inheritance across `exec`
//! - `process` - Child process liveness and termination
//!
//! # Supported Platforms
//!
//! - **Linux**: Full support
//! - **macOS**: Should work (POSIX pipes, `mmap`), not regularly tested
//! - **Windows**: Not supported; the core relies on inherited pipe descriptors

#![allow(unsafe_code)]

pub mod fd;
pub mod process;

// Re-export commonly used items
pub use fd::{adopt_fd, pipe_pair, set_inheritable};
pub use process::{is_process_alive, terminate_child};
