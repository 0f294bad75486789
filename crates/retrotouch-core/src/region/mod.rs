//! Shared memory region between the UI and the emulation process.
//!
//! A file-backed `mmap` with a fixed header at offset 0 (input state and image
//! slot table) followed by a growable data area holding overlay images.
//!
//! # Architecture
//!
//! - **Layout**: `repr(C)` header of atomics shared by both processes
//! - **Writer**: [`SharedRegion`], owned by the supervisor, sole writer
//! - **Reader**: [`RegionReader`] and [`ImageCache`], used by the runner
//!
//! Input fields are independent and written with relaxed atomics. Images use a
//! per-slot version with a busy bit: the writer marks the slot busy, writes
//! placement and pixels, flushes, then publishes the next version with release
//! ordering. Readers discard any copy whose version changed underneath them.

#![allow(unsafe_code)]

pub mod layout;
mod mapping;
pub mod reader;
pub mod writer;

pub use layout::{ImageSnapshot, InputSnapshot, DATA_START, HEADER_SIZE, MAX_BUTTONS};
pub use reader::{ImageCache, RegionReader};
pub use writer::SharedRegion;
