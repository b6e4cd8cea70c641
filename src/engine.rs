//! Public multiplication entry points.
//!
//! Each entry point checks that the operand and destination shapes agree,
//! zero-fills the destination unless it is an `_and_add` variant, and runs
//! the blocked multiply. A violated precondition or an exhausted scratch
//! provider panics; no entry point reports a recoverable error. After such a
//! panic the destination contents are unspecified.
//!
//! Three addressing conventions are offered: `A·B`, `A·Bᵀ` and `Aᵀ·B`.
//! `Aᵀ·Bᵀ` is not offered; it equals `(B·A)ᵀ` and callers get it by
//! swapping operands.

use rayon::prelude::*;

use crate::error::GemmError;
use crate::gemm::multiply_blocked;
use crate::geometry::CacheGeometry;
use crate::scratch::{ScratchProvider, SharedPool};
use crate::view::{MatrixView, MatrixViewMut, Operand, Transpose};

/// Shape of a batch of dense products `C_i = A_i · op(B_i)`.
///
/// Every `A_i` is `height × depth`, every `C_i` is `height × width`.
/// Items are stored back to back without padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape {
    pub batch_size: usize,
    pub height: usize,
    pub depth: usize,
    pub width: usize,
}

/// Matrix multiplication with a fixed cache geometry and scratch provider.
///
/// The engine holds no mutable state of its own. With a `Sync` provider
/// (such as the default [`SharedPool`]) one engine can serve concurrent
/// calls, provided their destinations do not overlap.
#[derive(Debug)]
pub struct MatMulEngine<P: ScratchProvider = SharedPool> {
    geometry: CacheGeometry,
    scratch: P,
}

impl MatMulEngine<SharedPool> {
    pub fn new(geometry: CacheGeometry) -> Self {
        Self::with_scratch(geometry, SharedPool::new())
    }
}

impl Default for MatMulEngine<SharedPool> {
    fn default() -> Self {
        Self::new(CacheGeometry::default())
    }
}

impl<P: ScratchProvider> MatMulEngine<P> {
    pub fn with_scratch(geometry: CacheGeometry, scratch: P) -> Self {
        log::debug!(
            "matmul engine: l1={}B l2={}B",
            geometry.l1_bytes(),
            geometry.l2_bytes()
        );
        MatMulEngine { geometry, scratch }
    }

    #[inline]
    pub fn geometry(&self) -> CacheGeometry {
        self.geometry
    }

    #[inline]
    pub fn scratch(&self) -> &P {
        &self.scratch
    }

    /// `result = first · second`.
    pub fn multiply_matrix_by_matrix(
        &self,
        first: MatrixView<'_>,
        second: MatrixView<'_>,
        result: &mut MatrixViewMut<'_>,
    ) {
        self.run(Operand::normal(first), Operand::normal(second), result, false);
    }

    /// `result += first · second`.
    pub fn multiply_matrix_by_matrix_and_add(
        &self,
        first: MatrixView<'_>,
        second: MatrixView<'_>,
        result: &mut MatrixViewMut<'_>,
    ) {
        self.run(Operand::normal(first), Operand::normal(second), result, true);
    }

    /// `result = first · secondᵀ`; `second` is stored `result.width() × first.width()`.
    pub fn multiply_matrix_by_transposed_matrix(
        &self,
        first: MatrixView<'_>,
        second: MatrixView<'_>,
        result: &mut MatrixViewMut<'_>,
    ) {
        self.run(Operand::normal(first), Operand::transposed(second), result, false);
    }

    /// `result += first · secondᵀ`.
    pub fn multiply_matrix_by_transposed_matrix_and_add(
        &self,
        first: MatrixView<'_>,
        second: MatrixView<'_>,
        result: &mut MatrixViewMut<'_>,
    ) {
        self.run(Operand::normal(first), Operand::transposed(second), result, true);
    }

    /// `result = firstᵀ · second`; `first` is stored `second.height() × result.height()`.
    pub fn multiply_transposed_matrix_by_matrix(
        &self,
        first: MatrixView<'_>,
        second: MatrixView<'_>,
        result: &mut MatrixViewMut<'_>,
    ) {
        self.run(Operand::transposed(first), Operand::normal(second), result, false);
    }

    /// `result += firstᵀ · second`. Used for weight-gradient accumulation.
    pub fn multiply_transposed_matrix_by_matrix_and_add(
        &self,
        first: MatrixView<'_>,
        second: MatrixView<'_>,
        result: &mut MatrixViewMut<'_>,
    ) {
        self.run(Operand::transposed(first), Operand::normal(second), result, true);
    }

    fn run(&self, a: Operand<'_>, b: Operand<'_>, result: &mut MatrixViewMut<'_>, accumulate: bool) {
        check_shapes(&a, &b, result);
        if !accumulate {
            result.fill_zero();
        }
        if let Err(err) = multiply_blocked(&a, &b, result, &self.geometry, &self.scratch) {
            abort(err);
        }
    }
}

impl<P: ScratchProvider + Sync> MatMulEngine<P> {
    /// `C_i = A_i · B_i` for every item, items in parallel.
    ///
    /// `B_i` is `depth × width`. Every worker draws scratch from the
    /// engine's provider.
    pub fn multiply_matrix_by_matrix_batch(
        &self,
        shape: BatchShape,
        first: &[f32],
        second: &[f32],
        result: &mut [f32],
    ) {
        let second_item = (shape.depth, shape.width);
        self.run_batch(shape, second_item, Transpose::Normal, first, second, result);
    }

    /// `C_i = A_i · B_iᵀ` for every item, items in parallel.
    ///
    /// `B_i` is stored `width × depth`.
    pub fn multiply_matrix_by_transposed_matrix_batch(
        &self,
        shape: BatchShape,
        first: &[f32],
        second: &[f32],
        result: &mut [f32],
    ) {
        let second_item = (shape.width, shape.depth);
        self.run_batch(shape, second_item, Transpose::Transposed, first, second, result);
    }

    fn run_batch(
        &self,
        shape: BatchShape,
        (second_height, second_width): (usize, usize),
        second_transpose: Transpose,
        first: &[f32],
        second: &[f32],
        result: &mut [f32],
    ) {
        let BatchShape {
            batch_size,
            height,
            depth,
            width,
        } = shape;
        let first_len = item_len("first", height, depth);
        let second_len = item_len("second", second_height, second_width);
        let result_len = item_len("result", height, width);

        check_batch_len("first", first, batch_size, first_len);
        check_batch_len("second", second, batch_size, second_len);
        check_batch_len("result", result, batch_size, result_len);

        if batch_size == 0 || result_len == 0 {
            return;
        }

        log::debug!(
            "gemm batch of {} ({}x{} by {}x{})",
            batch_size,
            height,
            depth,
            second_height,
            second_width
        );

        let geometry = self.geometry;
        let scratch = &self.scratch;
        result[..batch_size * result_len]
            .par_chunks_mut(result_len)
            .enumerate()
            .for_each(|(i, out)| {
                let a = MatrixView::contiguous(&first[i * first_len..(i + 1) * first_len], height, depth);
                let b = MatrixView::contiguous(
                    &second[i * second_len..(i + 1) * second_len],
                    second_height,
                    second_width,
                );
                let b = Operand {
                    view: b,
                    transpose: second_transpose,
                };
                let mut c = MatrixViewMut::contiguous(out, height, width);
                c.fill_zero();
                if let Err(err) = multiply_blocked(&Operand::normal(a), &b, &mut c, &geometry, scratch) {
                    abort(err);
                }
            });
    }
}

fn check_shapes(a: &Operand<'_>, b: &Operand<'_>, result: &MatrixViewMut<'_>) {
    assert_eq!(
        a.cols(),
        b.rows(),
        "inner dimensions differ: first is {}x{}, second is {}x{}",
        a.rows(),
        a.cols(),
        b.rows(),
        b.cols()
    );
    assert_eq!(
        (result.height(), result.width()),
        (a.rows(), b.cols()),
        "result is {}x{}, product is {}x{}",
        result.height(),
        result.width(),
        a.rows(),
        b.cols()
    );
}

fn abort(err: GemmError) -> ! {
    panic!("matrix multiplication aborted: {err}")
}

fn item_len(name: &str, rows: usize, cols: usize) -> usize {
    rows.checked_mul(cols)
        .unwrap_or_else(|| panic!("{name} batch size overflows usize"))
}

fn check_batch_len(name: &str, buffer: &[f32], items: usize, item_len: usize) {
    let needed = items
        .checked_mul(item_len)
        .unwrap_or_else(|| panic!("{name} batch size overflows usize"));
    assert!(
        buffer.len() >= needed,
        "{name} batch needs {needed} floats, buffer holds {}",
        buffer.len()
    );
}
