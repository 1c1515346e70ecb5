// CLASSIFICATION: COMMUNITY
// Filename: query.rs v0.5
// Date Modified: 2027-01-12
// Author: Lukas Bower

//! Size and capability queries.
//!
//! Callers must never observe the engine's padding: region size and image
//! extent queries report logical values, and device limits are shrunk so
//! an allocation sized to the reported maximum still has room for its
//! canaries after padding.

use crate::engine::Detector;
use crate::error::{DetectorResult, RuntimeError};
use crate::layout::{IMAGE_POISON_DEPTH, IMAGE_POISON_HEIGHT, IMAGE_POISON_WIDTH};
use crate::runtime::{ComputeRuntime, ContextId, DeviceLimits, MemId};

fn shrink(value: usize, pad: usize) -> usize {
    value.saturating_sub(pad)
}

impl<R: ComputeRuntime> Detector<R> {
    /// User-visible byte size of a tracked region, padding excluded.
    pub fn mem_size(&self, mem: MemId) -> DetectorResult<usize> {
        let rec = self
            .state
            .mems
            .find(mem)
            .ok_or(RuntimeError::InvalidMem)?;
        match &rec.image {
            Some(info) => Ok(info.layout.logical_bytes()),
            None => Ok(rec.size),
        }
    }

    /// Logical image extents: `[width, height, depth, array_size]`.
    pub fn image_extents(&self, mem: MemId) -> DetectorResult<[usize; 4]> {
        let rec = self
            .state
            .mems
            .find(mem)
            .ok_or(RuntimeError::InvalidMem)?;
        let info = rec.image.as_ref().ok_or(RuntimeError::InvalidMem)?;
        let d = &info.desc;
        Ok([d.width, d.height, d.depth, d.array_size])
    }

    /// Device limits with the engine's padding subtracted, so a caller
    /// allocating at the reported maximum never re-triggers padding past
    /// the real limit.
    pub fn device_limits(&self, ctx: ContextId) -> DetectorResult<DeviceLimits> {
        let raw = self.state.runtime.device_limits(ctx)?;
        // The largest canary cost for a linear allocation comes from the
        // whole-slice duplication of a maximal 3-D image.
        let depth = raw
            .max_alloc_size
            .checked_div(raw.image3d_max_width * raw.image3d_max_height)
            .unwrap_or(0);
        let max_alloc = shrink(raw.image3d_max_width, IMAGE_POISON_WIDTH)
            * shrink(raw.image3d_max_height, IMAGE_POISON_HEIGHT)
            * shrink(depth, IMAGE_POISON_DEPTH);
        Ok(DeviceLimits {
            image2d_max_width: shrink(raw.image2d_max_width, IMAGE_POISON_WIDTH),
            image2d_max_height: shrink(raw.image2d_max_height, IMAGE_POISON_HEIGHT),
            image3d_max_width: shrink(raw.image3d_max_width, IMAGE_POISON_WIDTH),
            image3d_max_height: shrink(raw.image3d_max_height, IMAGE_POISON_HEIGHT),
            image3d_max_depth: shrink(raw.image3d_max_depth, IMAGE_POISON_DEPTH),
            image_buffer_max_elems: shrink(raw.image_buffer_max_elems, IMAGE_POISON_WIDTH),
            max_alloc_size: max_alloc,
        })
    }
}
