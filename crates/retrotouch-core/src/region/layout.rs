//! Fixed header layout at offset 0 of the shared region.
//!
//! Both processes overlay [`RegionHeader`] on the start of the mapping. Every
//! field is an atomic so the two sides can read and write concurrently without
//! locks. Each field has exactly one writer (the supervisor).

use crate::config::RegionConfig;
use std::sync::atomic::{AtomicI16, AtomicI32, AtomicU32, AtomicU64, Ordering};

/// Internal bit used to mark an image slot `version` as "being updated".
///
/// Published versions never have this bit set and increment by 1 per
/// completed `set_image`.
pub const IMAGE_VERSION_BUSY_BIT: u32 = 1 << 31;

/// Size of the header in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<RegionHeader>();

/// First byte usable for image data.
pub const DATA_START: usize = align_up(HEADER_SIZE + 16, RegionConfig::DATA_ALIGN);

/// Number of controller buttons addressable in the bitmask.
pub const MAX_BUTTONS: u8 = 32;

/// Round `value` up to the next multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Controller, analog stick and mouse state written by the UI.
#[repr(C)]
#[derive(Debug)]
pub struct InputState {
    /// One bit per button.
    pub buttons: AtomicU32,
    /// Stick pairs laid out as `[x0, y0, x1, y1]`.
    pub analogs: [AtomicI16; 2 * RegionConfig::MAX_ANALOGS],
    pub mouse: [AtomicI16; 2],
    pub mouse_buttons: AtomicU32,
}

/// Placement and publish counter of one image.
#[repr(C)]
#[derive(Debug)]
pub struct ImageSlot {
    /// Publish counter. The high bit ([`IMAGE_VERSION_BUSY_BIT`]) is set while
    /// the pixel data is being rewritten.
    pub version: AtomicU32,
    pub x: AtomicI32,
    pub y: AtomicI32,
    pub width: AtomicU32,
    pub height: AtomicU32,
    /// Byte offset of the pixel data from the start of the region.
    pub offset: AtomicU64,
    /// Bytes of valid pixel data. Zero means the slot is inactive.
    pub size: AtomicU64,
    /// Bytes reserved at `offset`; `size <= capacity`.
    pub capacity: AtomicU64,
}

/// Header overlaid at offset 0. Never relocates on growth.
#[repr(C)]
#[derive(Debug)]
pub struct RegionHeader {
    /// Current length of the backing file.
    pub size: AtomicU64,
    /// `f32` bits.
    pub scale_factor: AtomicU32,
    pub input: InputState,
    pub images: [ImageSlot; RegionConfig::MAX_IMAGES],
}

impl RegionHeader {
    pub fn scale_factor(&self) -> f32 {
        f32::from_bits(self.scale_factor.load(Ordering::Relaxed))
    }
}

impl ImageSlot {
    /// Reset placement and size, leaving the version untouched.
    pub(crate) fn reset(&self) {
        self.offset.store(0, Ordering::Relaxed);
        self.size.store(0, Ordering::Relaxed);
        self.capacity.store(0, Ordering::Relaxed);
    }

    /// Mark the slot busy and return the last published version.
    pub(crate) fn begin_write(&self) -> u32 {
        let start = self.version.load(Ordering::Relaxed) & !IMAGE_VERSION_BUSY_BIT;
        self.version
            .store(start | IMAGE_VERSION_BUSY_BIT, Ordering::Relaxed);
        std::sync::atomic::fence(Ordering::Release);
        start
    }

    /// Final publish step: increment the version and clear the busy bit.
    pub(crate) fn end_write(&self, start: u32) -> u32 {
        let version = start.wrapping_add(1) & !IMAGE_VERSION_BUSY_BIT;
        self.version.store(version, Ordering::Release);
        version
    }
}

impl InputState {
    /// Set or clear one button bit. Returns false for an out of range index.
    pub fn set_button(&self, index: u8, pressed: bool) -> bool {
        if index >= MAX_BUTTONS {
            return false;
        }
        let mask = 1u32 << index;
        if pressed {
            self.buttons.fetch_or(mask, Ordering::Relaxed);
        } else {
            self.buttons.fetch_and(!mask, Ordering::Relaxed);
        }
        true
    }

    pub fn snapshot(&self) -> InputSnapshot {
        let a = |i: usize| self.analogs[i].load(Ordering::Relaxed);
        InputSnapshot {
            buttons: self.buttons.load(Ordering::Relaxed),
            analogs: [(a(0), a(1)), (a(2), a(3))],
            mouse: (
                self.mouse[0].load(Ordering::Relaxed),
                self.mouse[1].load(Ordering::Relaxed),
            ),
            mouse_buttons: self.mouse_buttons.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`InputState`] taken once per runner tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    pub buttons: u32,
    pub analogs: [(i16, i16); RegionConfig::MAX_ANALOGS],
    pub mouse: (i16, i16),
    pub mouse_buttons: u32,
}

impl InputSnapshot {
    pub fn is_pressed(&self, index: u8) -> bool {
        index < MAX_BUTTONS && self.buttons & (1 << index) != 0
    }
}

/// Consistent copy of one published image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSnapshot {
    pub version: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}
