//! Cache-blocked single-precision matrix multiplication.
//!
//! Computes `C = A·B`, `C = A·Bᵀ` and `C = Aᵀ·B` (and their accumulating
//! `C += …` forms) over row-major `f32` buffers whose row stride may exceed
//! the logical width. Operand blocks are packed into scratch memory sized to
//! a [`CacheGeometry`] and multiplied by a register-blocked micro-kernel.
//!
//! ```
//! use cachegemm::{MatMulEngine, MatrixView, MatrixViewMut};
//!
//! let engine = MatMulEngine::default();
//! let a = [1.0, 2.0, 3.0, 4.0];
//! let b = [5.0, 6.0, 7.0, 8.0];
//! let mut c = [0.0; 4];
//!
//! engine.multiply_matrix_by_matrix(
//!     MatrixView::contiguous(&a, 2, 2),
//!     MatrixView::contiguous(&b, 2, 2),
//!     &mut MatrixViewMut::contiguous(&mut c, 2, 2),
//! );
//! assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
//! ```

pub mod engine;
pub mod error;
pub mod gemm;
pub mod geometry;
pub mod kernel;
pub mod pack;
pub mod scratch;
pub mod view;

pub use engine::{BatchShape, MatMulEngine};
pub use error::{GemmError, Result};
pub use geometry::{BlockSizes, CacheGeometry};
pub use scratch::{HeapScratch, PooledScratch, ScratchBuffer, ScratchProvider, SharedPool};
pub use view::{MatrixView, MatrixViewMut, Operand, Transpose};
