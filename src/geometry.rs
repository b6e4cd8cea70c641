//! Cache geometry and the block sizes derived from it.
//!
//! The blocked multiply keeps three working sets resident:
//!
//! - an A micro-panel (MR × KC) and a B micro-panel (KC × NR) in L1,
//! - the packed B block (KC × NC) in what L1 has left after one A micro-panel,
//! - the packed A block (MC × KC) in half of L2.
//!
//! Cache sizes are never probed at run time. They are supplied as a
//! [`CacheGeometry`] value, with an architecture specific default.

use std::mem::size_of;

use crate::error::{validation_error, Result};

/// Effective sizes, in bytes, of the two cache levels the blocking targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheGeometry {
    l1_bytes: usize,
    l2_bytes: usize,
}

impl CacheGeometry {
    /// Creates a geometry, panicking if either size is zero.
    pub const fn new(l1_bytes: usize, l2_bytes: usize) -> Self {
        assert!(l1_bytes > 0, "L1 cache size must be positive");
        assert!(l2_bytes > 0, "L2 cache size must be positive");
        CacheGeometry { l1_bytes, l2_bytes }
    }

    /// Creates a geometry, reporting zero sizes as a validation error.
    pub fn try_new(l1_bytes: usize, l2_bytes: usize) -> Result<Self> {
        if l1_bytes == 0 || l2_bytes == 0 {
            return Err(validation_error(format!(
                "cache sizes must be positive (l1: {l1_bytes}, l2: {l2_bytes})"
            )));
        }
        Ok(CacheGeometry { l1_bytes, l2_bytes })
    }

    /// Small (L1-equivalent) cache size in bytes.
    #[inline]
    pub const fn l1_bytes(&self) -> usize {
        self.l1_bytes
    }

    /// Large (L2-equivalent) cache size in bytes.
    #[inline]
    pub const fn l2_bytes(&self) -> usize {
        self.l2_bytes
    }

    /// Derives block sizes for a micro-kernel with an `mr` × `nr` tile.
    pub fn block_sizes(&self, mr: usize, nr: usize) -> BlockSizes {
        debug_assert!(mr > 0 && nr > 0);

        let l1 = self.l1_bytes / size_of::<f32>();
        let l2 = self.l2_bytes / size_of::<f32>();

        // KC: one A micro-panel plus one B micro-panel in half of L1.
        let kc = (l1 / (2 * (mr + nr))).max(1);

        // NC: B block in the L1 budget left after one A micro-panel.
        let nc_raw = l1.saturating_sub(mr * kc) / kc;
        let nc = ((nc_raw / nr) * nr).max(nr);

        // MC: A block in half of L2.
        let mc_raw = (l2 / 2) / kc;
        let mc = ((mc_raw / mr) * mr).max(mr);

        if l1 < mr + nr || l2 / 2 < mr * kc {
            log::warn!(
                "cache geometry {}B/{}B is smaller than one {}x{} micro-tile; clamping blocks",
                self.l1_bytes,
                self.l2_bytes,
                mr,
                nr
            );
        }

        BlockSizes { mc, kc, nc }
    }
}

impl Default for CacheGeometry {
    /// 32 KiB / 128 KiB on ARM targets, where cache sizes cannot be
    /// queried reliably; 32 KiB / 256 KiB everywhere else.
    fn default() -> Self {
        #[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
        {
            CacheGeometry::new(0x8000, 0x20000)
        }
        #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
        {
            CacheGeometry::new(32 * 1024, 256 * 1024)
        }
    }
}

/// Block sizes for the three blocked dimensions, in elements.
///
/// `mc` is a multiple of the micro-kernel's MR, `nc` a multiple of its NR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizes {
    /// Rows of A (and C) per packed A block.
    pub mc: usize,
    /// Shared-dimension depth per packed block.
    pub kc: usize,
    /// Columns of B (and C) per packed B block.
    pub nc: usize,
}
