//! Runner-side read-only view of the shared region.

use super::layout::{InputSnapshot, ImageSnapshot, RegionHeader, IMAGE_VERSION_BUSY_BIT};
use super::mapping::Mapping;
use crate::config::RegionConfig;
use crate::{Result, RetroError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, Ordering};
use tracing::{debug, trace};

/// Read-only mapping of a region created by the supervisor.
#[derive(Debug)]
pub struct RegionReader {
    file: File,
    path: PathBuf,
    map: Mapping,
}

impl RegionReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| RetroError::io_with_path(e, &path))?;
        let len = file
            .metadata()
            .map_err(|e| RetroError::io_with_path(e, &path))?
            .len() as usize;
        let map = Mapping::new(&file, len, false)?;
        debug!("Mapped shared region {} ({} bytes)", path.display(), len);
        Ok(Self { file, path, map })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header(&self) -> &RegionHeader {
        self.map.header()
    }

    /// Follow growth of the backing file. Returns true if the mapping changed.
    pub fn refresh_mapping(&mut self) -> Result<bool> {
        let advertised = self.header().size.load(Ordering::Acquire) as usize;
        if advertised <= self.map.len() {
            return Ok(false);
        }
        // The file is grown before the header advertises the new size, but
        // map only what actually exists.
        let actual = self
            .file
            .metadata()
            .map_err(|e| RetroError::io_with_path(e, &self.path))?
            .len() as usize;
        let len = advertised.min(actual);
        if len <= self.map.len() {
            return Ok(false);
        }
        self.map = Mapping::new(&self.file, len, false)?;
        trace!("Remapped shared region to {} bytes", len);
        Ok(true)
    }

    pub fn input(&self) -> InputSnapshot {
        self.header().input.snapshot()
    }

    pub fn scale_factor(&self) -> f32 {
        self.header().scale_factor()
    }

    /// Last published version of a slot, or `None` while a write is in
    /// progress.
    pub fn slot_version(&self, index: usize) -> Option<u32> {
        let slot = self.header().images.get(index)?;
        let version = slot.version.load(Ordering::Acquire);
        (version & IMAGE_VERSION_BUSY_BIT == 0).then_some(version)
    }

    /// Position and size of a slot as `(x, y, width, height)`.
    pub fn image_pos(&self, index: usize) -> Option<(i32, i32, u32, u32)> {
        let slot = self.header().images.get(index)?;
        Some((
            slot.x.load(Ordering::Relaxed),
            slot.y.load(Ordering::Relaxed),
            slot.width.load(Ordering::Relaxed),
            slot.height.load(Ordering::Relaxed),
        ))
    }

    /// Take a consistent copy of a slot.
    ///
    /// Returns `None` when the slot is inactive, a write is in progress, or
    /// the copy was torn by a concurrent write. Callers retry on a later tick.
    pub fn read_image(&mut self, index: usize) -> Result<Option<ImageSnapshot>> {
        if index >= RegionConfig::MAX_IMAGES {
            return Err(RetroError::InvalidSlot {
                index,
                max: RegionConfig::MAX_IMAGES,
            });
        }
        self.refresh_mapping()?;

        let slot = &self.header().images[index];
        let v0 = slot.version.load(Ordering::Acquire);
        if v0 & IMAGE_VERSION_BUSY_BIT != 0 {
            return Ok(None);
        }

        let offset = slot.offset.load(Ordering::Relaxed) as usize;
        let size = slot.size.load(Ordering::Relaxed) as usize;
        if size == 0 {
            return Ok(None);
        }
        let pixels = match self.map.copy_out(offset, size) {
            Ok(pixels) => pixels,
            // Placement read mid-update; the version check would reject it
            Err(RetroError::RegionOverflow { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let (x, y, width, height) = (
            slot.x.load(Ordering::Relaxed),
            slot.y.load(Ordering::Relaxed),
            slot.width.load(Ordering::Relaxed),
            slot.height.load(Ordering::Relaxed),
        );

        fence(Ordering::Acquire);
        let v1 = slot.version.load(Ordering::Relaxed);
        if v0 != v1 {
            trace!("Torn read of image {} ({} -> {})", index, v0, v1);
            return Ok(None);
        }

        Ok(Some(ImageSnapshot {
            version: v0,
            x,
            y,
            width,
            height,
            pixels,
        }))
    }
}

/// Per-slot cache that re-reads pixel data only when a version changes.
#[derive(Debug, Default)]
pub struct ImageCache {
    slots: [Option<ImageSnapshot>; RegionConfig::MAX_IMAGES],
    seen: [u32; RegionConfig::MAX_IMAGES],
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&ImageSnapshot> {
        self.slots.get(index)?.as_ref()
    }

    /// Bring the cache up to date. Returns the indexes whose pixel data or
    /// placement changed.
    ///
    /// Pixels are re-read only on a version change; placement is compared on
    /// every call. A slot whose write is in progress keeps its previous copy
    /// until the next call.
    pub fn refresh(&mut self, reader: &mut RegionReader) -> Result<Vec<usize>> {
        let mut changed = Vec::new();
        for index in 0..RegionConfig::MAX_IMAGES {
            let Some(version) = reader.slot_version(index) else {
                continue;
            };

            if version != self.seen[index] {
                match reader.read_image(index)? {
                    Some(image) => {
                        self.seen[index] = image.version;
                        self.slots[index] = Some(image);
                        changed.push(index);
                    }
                    None => {
                        if reader.slot_version(index) == Some(version) {
                            // Stable and inactive
                            self.seen[index] = version;
                            if self.slots[index].take().is_some() {
                                changed.push(index);
                            }
                        }
                    }
                }
            }

            if let (Some(image), Some((x, y, width, height))) =
                (self.slots[index].as_mut(), reader.image_pos(index))
            {
                if (image.x, image.y, image.width, image.height) != (x, y, width, height) {
                    image.x = x;
                    image.y = y;
                    image.width = width;
                    image.height = height;
                    if changed.last() != Some(&index) {
                        changed.push(index);
                    }
                }
            }
        }
        Ok(changed)
    }
}
