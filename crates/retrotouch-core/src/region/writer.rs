//! UI-side owner of the shared region.

use super::layout::{align_up, InputSnapshot, RegionHeader, DATA_START, HEADER_SIZE};
use super::mapping::Mapping;
use crate::config::RegionConfig;
use crate::{Result, RetroError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// Writable shared region backed by a file on disk.
///
/// Owns the backing file: it is removed when the region is closed or dropped.
#[derive(Debug)]
pub struct SharedRegion {
    file: File,
    path: PathBuf,
    map: Mapping,
    closed: bool,
}

impl SharedRegion {
    /// Create a region in a fresh temporary file.
    pub fn create(initial_size: usize) -> Result<Self> {
        Self::create_in(std::env::temp_dir(), initial_size)
    }

    /// Create a region in a fresh temporary file inside `dir`.
    ///
    /// The file is only kept once it is sized and mapped; on failure it is
    /// removed again.
    pub fn create_in(dir: impl AsRef<Path>, initial_size: usize) -> Result<Self> {
        let tmp = tempfile::Builder::new()
            .prefix(RegionConfig::TEMP_PREFIX)
            .tempfile_in(dir)?;
        let (size, map) = Self::map_file(tmp.as_file(), tmp.path(), initial_size)?;
        let (file, path) = tmp.keep().map_err(|e| RetroError::from(e.error))?;
        Ok(Self::from_parts(file, path, size, map))
    }

    /// Create (or truncate) a region at an explicit path.
    pub fn create_at(path: impl AsRef<Path>, initial_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| RetroError::io_with_path(e, &path))?;
        let (size, map) = Self::map_file(&file, &path, initial_size)?;
        Ok(Self::from_parts(file, path, size, map))
    }

    fn map_file(file: &File, path: &Path, initial_size: usize) -> Result<(usize, Mapping)> {
        let size = initial_size.max(RegionConfig::MIN_SIZE);
        file.set_len(size as u64)
            .map_err(|e| RetroError::io_with_path(e, path))?;
        let map = Mapping::new(file, size, true)?;
        Ok((size, map))
    }

    fn from_parts(file: File, path: PathBuf, size: usize, map: Mapping) -> Self {
        let header = map.header();
        header.scale_factor.store(1.0f32.to_bits(), Ordering::Relaxed);
        header.size.store(size as u64, Ordering::Release);

        debug!("Created shared region {} ({} bytes)", path.display(), size);
        Self {
            file,
            path,
            map,
            closed: false,
        }
    }

    /// Path of the backing file, passed to the runner.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn header(&self) -> &RegionHeader {
        self.map.header()
    }

    /// Grow the region to at least `new_size` bytes.
    ///
    /// Existing contents are preserved and the header stays at offset 0.
    /// Requests for a smaller size are ignored.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size <= self.map.len() {
            return Ok(());
        }
        self.file
            .set_len(new_size as u64)
            .map_err(|e| RetroError::io_with_path(e, &self.path))?;
        self.map = Mapping::new(&self.file, new_size, true)?;
        self.header()
            .size
            .store(new_size as u64, Ordering::Release);
        debug!("Grew shared region to {} bytes", new_size);
        Ok(())
    }

    fn check_slot(index: usize) -> Result<()> {
        if index >= RegionConfig::MAX_IMAGES {
            return Err(RetroError::InvalidSlot {
                index,
                max: RegionConfig::MAX_IMAGES,
            });
        }
        Ok(())
    }

    /// End of the furthest reserved image range, or the data floor if none.
    fn end_of_data(&self) -> usize {
        self.header()
            .images
            .iter()
            .filter_map(|slot| {
                let capacity = slot.capacity.load(Ordering::Relaxed) as usize;
                (capacity > 0).then(|| {
                    let offset = slot.offset.load(Ordering::Relaxed) as usize;
                    align_up(offset + capacity, RegionConfig::DATA_ALIGN)
                })
            })
            .max()
            .unwrap_or(DATA_START)
            .max(DATA_START)
    }

    /// Publish new pixel data for a slot.
    ///
    /// Data that no longer fits the slot's reserved range moves to the end of
    /// the data area, growing the region as needed. Returns the new version.
    pub fn set_image(&mut self, index: usize, bytes: &[u8]) -> Result<u32> {
        Self::check_slot(index)?;
        let len = bytes.len();

        let (offset, capacity) = {
            let slot = &self.header().images[index];
            (
                slot.offset.load(Ordering::Relaxed) as usize,
                slot.capacity.load(Ordering::Relaxed) as usize,
            )
        };

        let (offset, capacity) = if len > capacity || offset < HEADER_SIZE {
            let start = self.end_of_data();
            let end = start + len;
            if end > self.size() {
                self.resize(end)?;
            }
            (start, len)
        } else {
            (offset, capacity)
        };

        if offset + len > self.size() {
            debug_assert!(false, "image {} does not fit region", index);
            return Err(RetroError::RegionOverflow {
                offset,
                len,
                region_size: self.size(),
            });
        }

        let slot = &self.map.header().images[index];
        let start = slot.begin_write();
        slot.offset.store(offset as u64, Ordering::Relaxed);
        slot.capacity.store(capacity as u64, Ordering::Relaxed);
        slot.size.store(len as u64, Ordering::Relaxed);
        if len > 0 {
            self.map.copy_in(offset, bytes)?;
        }
        self.map.flush()?;
        Ok(slot.end_write(start))
    }

    /// Update where an image is drawn. Does not touch pixel data or version.
    pub fn set_image_pos(
        &self,
        index: usize,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        Self::check_slot(index)?;
        let slot = &self.header().images[index];
        slot.x.store(x, Ordering::Relaxed);
        slot.y.store(y, Ordering::Relaxed);
        slot.width.store(width, Ordering::Relaxed);
        slot.height.store(height, Ordering::Relaxed);
        Ok(())
    }

    /// Deactivate every slot and reset the data area to its floor.
    ///
    /// The backing file keeps its size since the runner may still map it.
    pub fn clear_images(&self) -> Result<()> {
        for slot in &self.header().images {
            let start = slot.begin_write();
            slot.reset();
            slot.end_write(start);
        }
        self.map.flush()
    }

    pub fn set_scale_factor(&self, factor: f32) {
        self.header()
            .scale_factor
            .store(factor.to_bits(), Ordering::Relaxed);
    }

    pub fn scale_factor(&self) -> f32 {
        self.header().scale_factor()
    }

    /// Press or release a controller button. Out of range indexes are ignored.
    pub fn set_button(&self, index: u8, pressed: bool) {
        if !self.header().input.set_button(index, pressed) {
            warn!("Ignoring out of range button {}", index);
        }
    }

    pub fn clear_buttons(&self) {
        self.header().input.buttons.store(0, Ordering::Relaxed);
    }

    /// Set one analog stick. Out of range sticks are ignored.
    pub fn set_analog(&self, stick: usize, x: i16, y: i16) {
        let analogs = &self.header().input.analogs;
        if stick >= RegionConfig::MAX_ANALOGS {
            warn!("Ignoring out of range analog stick {}", stick);
            return;
        }
        analogs[2 * stick].store(x, Ordering::Relaxed);
        analogs[2 * stick + 1].store(y, Ordering::Relaxed);
    }

    pub fn set_mouse(&self, x: i16, y: i16) {
        let mouse = &self.header().input.mouse;
        mouse[0].store(x, Ordering::Relaxed);
        mouse[1].store(y, Ordering::Relaxed);
    }

    pub fn set_mouse_button(&self, index: u8, pressed: bool) {
        if index >= 32 {
            warn!("Ignoring out of range mouse button {}", index);
            return;
        }
        let mask = 1u32 << index;
        let buttons = &self.header().input.mouse_buttons;
        if pressed {
            buttons.fetch_or(mask, Ordering::Relaxed);
        } else {
            buttons.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    pub fn input_snapshot(&self) -> InputSnapshot {
        self.header().input.snapshot()
    }

    /// Unmap and remove the backing file.
    pub fn close(mut self) -> Result<()> {
        self.remove_file()
    }

    fn remove_file(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed shared region {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RetroError::io_with_path(e, &self.path)),
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.remove_file() {
            warn!("Failed to remove shared region: {}", e);
        }
    }
}
