//! Operand packing.
//!
//! A block of an operand is copied into a dense, interleaved buffer in the
//! order the micro-kernel consumes it:
//!
//! - A side: panels of `mr` logical rows. Within a panel, for each depth
//!   index `p`, the `mr` values `A(i, p)` are adjacent.
//! - B side: panels of `nr` logical columns. Within a panel, for each depth
//!   index `p`, the `nr` values `B(p, j)` are adjacent.
//!
//! Panels that run past the block edge are zero-padded to full width, so the
//! micro-kernel never needs edge checks on its inputs. The operand's
//! transpose flag is resolved once per block: each of the four cases is its
//! own loop that reads the source along its contiguous dimension.

use std::ops::Range;

use crate::view::{Operand, Transpose};

/// Floats needed to pack `extent` rows (or columns) of depth `depth` into
/// panels `panel` wide.
#[inline]
pub fn packed_len(extent: usize, depth: usize, panel: usize) -> usize {
    extent.div_ceil(panel) * panel * depth
}

/// Packs rows `rows` and depth `depth` of the logical A operand.
///
/// `packed` must hold exactly [`packed_len`]`(rows.len(), depth.len(), mr)`.
pub fn pack_a(a: &Operand<'_>, rows: Range<usize>, depth: Range<usize>, mr: usize, packed: &mut [f32]) {
    let kc = depth.len();
    debug_assert_eq!(packed.len(), packed_len(rows.len(), kc, mr));
    debug_assert!(rows.end <= a.rows() && depth.end <= a.cols());
    if kc == 0 {
        return;
    }

    for (panel_start, panel) in rows.clone().step_by(mr).zip(packed.chunks_exact_mut(mr * kc)) {
        let mr_in_panel = mr.min(rows.end - panel_start);
        if mr_in_panel < mr {
            panel.fill(0.0);
        }

        match a.transpose {
            // A(i, p) = row i, column p: walk each source row along depth.
            Transpose::Normal => {
                for i in 0..mr_in_panel {
                    let src = &a.view.row(panel_start + i)[depth.clone()];
                    for (p, &value) in src.iter().enumerate() {
                        panel[p * mr + i] = value;
                    }
                }
            }
            // A(i, p) = row p, column i: each depth step is a contiguous run.
            Transpose::Transposed => {
                for (p, dst) in depth.clone().zip(panel.chunks_exact_mut(mr)) {
                    let src = &a.view.row(p)[panel_start..panel_start + mr_in_panel];
                    dst[..mr_in_panel].copy_from_slice(src);
                }
            }
        }
    }
}

/// Packs depth `depth` and columns `cols` of the logical B operand.
///
/// `packed` must hold exactly [`packed_len`]`(cols.len(), depth.len(), nr)`.
pub fn pack_b(b: &Operand<'_>, depth: Range<usize>, cols: Range<usize>, nr: usize, packed: &mut [f32]) {
    let kc = depth.len();
    debug_assert_eq!(packed.len(), packed_len(cols.len(), kc, nr));
    debug_assert!(depth.end <= b.rows() && cols.end <= b.cols());
    if kc == 0 {
        return;
    }

    for (panel_start, panel) in cols.clone().step_by(nr).zip(packed.chunks_exact_mut(nr * kc)) {
        let nr_in_panel = nr.min(cols.end - panel_start);
        if nr_in_panel < nr {
            panel.fill(0.0);
        }

        match b.transpose {
            // B(p, j) = row p, column j: each depth step is a contiguous run.
            Transpose::Normal => {
                for (p, dst) in depth.clone().zip(panel.chunks_exact_mut(nr)) {
                    let src = &b.view.row(p)[panel_start..panel_start + nr_in_panel];
                    dst[..nr_in_panel].copy_from_slice(src);
                }
            }
            // B(p, j) = row j, column p: walk each source row along depth.
            Transpose::Transposed => {
                for j in 0..nr_in_panel {
                    let src = &b.view.row(panel_start + j)[depth.clone()];
                    for (p, &value) in src.iter().enumerate() {
                        panel[p * nr + j] = value;
                    }
                }
            }
        }
    }
}
