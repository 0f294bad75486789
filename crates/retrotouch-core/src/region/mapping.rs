//! Owned `mmap` of a region backing file.

use super::layout::{RegionHeader, HEADER_SIZE};
use crate::{Result, RetroError};
use nix::sys::mman::{mmap, msync, munmap, MapFlags, MsFlags, ProtFlags};
use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use tracing::warn;

/// Shared mapping of `len` bytes starting at file offset 0.
#[derive(Debug)]
pub(crate) struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
    writable: bool,
}

// SAFETY: the mapping is plain shared memory. The header is only accessed
// through atomics and the data area only through `copy_in`/`copy_out`, whose
// consistency is guarded by the slot version protocol.
unsafe impl Send for Mapping {}
// SAFETY: see `Send`; no method hands out non-atomic references.
unsafe impl Sync for Mapping {}

impl Mapping {
    pub(crate) fn new(file: &File, len: usize, writable: bool) -> Result<Self> {
        if len < HEADER_SIZE {
            return Err(RetroError::RegionOverflow {
                offset: 0,
                len: HEADER_SIZE,
                region_size: len,
            });
        }
        let length =
            NonZeroUsize::new(len).ok_or_else(|| RetroError::Other("empty mapping".into()))?;
        let prot = if writable {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        } else {
            ProtFlags::PROT_READ
        };

        // SAFETY: a fresh shared mapping of a file we hold open; no existing
        // Rust references alias it.
        let ptr = unsafe { mmap(None, length, prot, MapFlags::MAP_SHARED, file, 0)? };
        Ok(Self { ptr, len, writable })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn header(&self) -> &RegionHeader {
        // SAFETY: the mapping is page aligned and at least HEADER_SIZE long
        // (checked in `new`). All header fields are atomics, valid for any bit
        // pattern including the zero fill of a fresh file.
        unsafe { self.ptr.cast::<RegionHeader>().as_ref() }
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len);
        if offset < HEADER_SIZE || end.map_or(true, |end| end > self.len) {
            return Err(RetroError::RegionOverflow {
                offset,
                len,
                region_size: self.len,
            });
        }
        Ok(())
    }

    /// Copy `bytes` into the data area at `offset`.
    pub(crate) fn copy_in(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        debug_assert!(self.writable);
        let checked = self.check_bounds(offset, bytes.len());
        debug_assert!(checked.is_ok(), "region write outside mapping: {:?}", checked);
        checked?;
        // SAFETY: bounds checked above and the range lies past the header, so
        // it overlaps no Rust reference. The mapping is writable.
        unsafe {
            let dst = self.ptr.as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        Ok(())
    }

    /// Copy `len` bytes out of the data area at `offset`.
    ///
    /// The copy may race with the writer; callers validate it against the slot
    /// version afterwards.
    pub(crate) fn copy_out(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let mut out = vec![0u8; len];
        // SAFETY: bounds checked above; `out` is a distinct heap allocation.
        unsafe {
            let src = self.ptr.as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Flush dirty pages to the backing file.
    pub(crate) fn flush(&self) -> Result<()> {
        // SAFETY: `ptr`/`len` describe exactly the live mapping.
        unsafe { msync(self.ptr, self.len, MsFlags::MS_SYNC)? };
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: unmapping the range created in `new`; header references
        // cannot outlive `self`.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("Failed to unmap shared region: {}", e);
        }
    }
}
