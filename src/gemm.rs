//! Blocked multiply: `C += op(A) · op(B)` over packed, cache-sized blocks.
//!
//! Loop structure (outermost first), with block sizes from
//! [`CacheGeometry::block_sizes`]:
//!
//! 1. `jc`: NC columns of B and C.
//! 2. `pc`: KC steps of the shared dimension. The KC × NC block of B is
//!    packed once here and stays in L1 for every A block below.
//! 3. `ic`: MC rows of A and C. The MC × KC block of A is packed here and
//!    stays in L2 while every B micro-panel streams past it.
//! 4. `jr`, `ir`: NR-wide B micro-panels against MR-tall A micro-panels,
//!    one micro-kernel call each.
//!
//! Both packed blocks come from the scratch provider through scoped guards
//! and go back to it when the block is done, including on panic.
//!
//! Summation order depends on KC, so results from different geometries agree
//! only to floating-point tolerance, not bit for bit.

use crate::error::Result;
use crate::geometry::{BlockSizes, CacheGeometry};
use crate::kernel::{MicroKernel, PortableKernel};
use crate::pack::{pack_a, pack_b, packed_len};
use crate::scratch::{scoped, ScratchProvider};
use crate::view::{MatrixViewMut, Operand};

/// Runs the blocked multiply with micro-kernel `K`.
///
/// Adds `op(a) · op(b)` into `c`. Shapes must already agree:
/// `a.cols() == b.rows()`, `c` is `a.rows() × b.cols()`.
pub fn gemm<K: MicroKernel, P: ScratchProvider + ?Sized>(
    a: &Operand<'_>,
    b: &Operand<'_>,
    c: &mut MatrixViewMut<'_>,
    blocks: BlockSizes,
    provider: &P,
) -> Result<()> {
    assert!(K::is_supported(), "{} kernel is not supported on this CPU", K::NAME);

    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    debug_assert_eq!(b.rows(), k);
    debug_assert_eq!((c.height(), c.width()), (m, n));
    debug_assert_eq!(blocks.mc % K::MR, 0);
    debug_assert_eq!(blocks.nc % K::NR, 0);

    if m == 0 || n == 0 || k == 0 {
        return Ok(());
    }

    let BlockSizes { mc, kc, nc } = blocks;
    let ldc = c.row_size();

    for jc in (0..n).step_by(nc) {
        let nc_cur = nc.min(n - jc);

        for pc in (0..k).step_by(kc) {
            let kc_cur = kc.min(k - pc);

            let mut b_block = scoped(provider, packed_len(nc_cur, kc_cur, K::NR))?;
            pack_b(b, pc..pc + kc_cur, jc..jc + nc_cur, K::NR, &mut b_block);

            for ic in (0..m).step_by(mc) {
                let mc_cur = mc.min(m - ic);

                let mut a_block = scoped(provider, packed_len(mc_cur, kc_cur, K::MR))?;
                pack_a(a, ic..ic + mc_cur, pc..pc + kc_cur, K::MR, &mut a_block);

                for (jr, b_panel) in b_block.chunks_exact(kc_cur * K::NR).enumerate() {
                    let col = jc + jr * K::NR;
                    let nr = K::NR.min(jc + nc_cur - col);

                    for (ir, a_panel) in a_block.chunks_exact(kc_cur * K::MR).enumerate() {
                        let row = ic + ir * K::MR;
                        let mr = K::MR.min(ic + mc_cur - row);

                        // SAFETY: support checked above; panels are full
                        // `kc_cur` steps; the tile lies inside `c`.
                        unsafe {
                            K::multiply_add(
                                kc_cur,
                                a_panel,
                                b_panel,
                                c.tail_from(row, col),
                                ldc,
                                mr,
                                nr,
                            );
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Picks the best micro-kernel for this CPU and runs [`gemm`] with block
/// sizes derived from `geometry`.
pub fn multiply_blocked<P: ScratchProvider + ?Sized>(
    a: &Operand<'_>,
    b: &Operand<'_>,
    c: &mut MatrixViewMut<'_>,
    geometry: &CacheGeometry,
    provider: &P,
) -> Result<()> {
    #[cfg(all(avx2, target_arch = "x86_64"))]
    {
        use crate::kernel::avx2::Avx2Kernel;
        if Avx2Kernel::is_supported() {
            return run::<Avx2Kernel, P>(a, b, c, geometry, provider);
        }
    }
    run::<PortableKernel, P>(a, b, c, geometry, provider)
}

fn run<K: MicroKernel, P: ScratchProvider + ?Sized>(
    a: &Operand<'_>,
    b: &Operand<'_>,
    c: &mut MatrixViewMut<'_>,
    geometry: &CacheGeometry,
    provider: &P,
) -> Result<()> {
    let blocks = geometry.block_sizes(K::MR, K::NR);
    log::debug!(
        "gemm M={} N={} K={} a={:?} b={:?} blocks={:?} kernel={}",
        a.rows(),
        b.cols(),
        a.cols(),
        a.transpose,
        b.transpose,
        blocks,
        K::NAME
    );
    gemm::<K, P>(a, b, c, blocks, provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::{HeapScratch, PooledScratch, ScratchBuffer};
    use crate::view::MatrixView;

    fn test_matrix(rows: usize, cols: usize, seed: usize) -> Vec<f32> {
        (0..rows * cols)
            .map(|x| (((x + seed) * 37) % 19) as f32 * 0.25 - 2.0)
            .collect()
    }

    fn naive(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
        let mut c = vec![0.0f32; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0f32;
                for l in 0..k {
                    sum += a[i * k + l] * b[l * n + j];
                }
                c[i * n + j] = sum;
            }
        }
        c
    }

    fn assert_close(got: &[f32], want: &[f32]) {
        for (i, (&g, &w)) in got.iter().zip(want).enumerate() {
            let diff = (g - w).abs();
            let rel = if w.abs() > 1e-6 { diff / w.abs() } else { diff };
            assert!(rel < 1e-4, "mismatch at {}: got {}, expected {}", i, g, w);
        }
    }

    fn run_portable(m: usize, k: usize, n: usize, blocks: BlockSizes) {
        let a = test_matrix(m, k, 1);
        let b = test_matrix(k, n, 2);
        let mut c = vec![0.0f32; m * n];
        let pool = PooledScratch::new();

        gemm::<PortableKernel, _>(
            &Operand::normal(MatrixView::contiguous(&a, m, k)),
            &Operand::normal(MatrixView::contiguous(&b, k, n)),
            &mut MatrixViewMut::contiguous(&mut c, m, n),
            blocks,
            &pool,
        )
        .unwrap();

        assert_close(&c, &naive(&a, &b, m, k, n));
    }

    #[test]
    fn test_single_block() {
        run_portable(7, 9, 11, BlockSizes { mc: 64, kc: 64, nc: 64 });
    }

    #[test]
    fn test_many_small_blocks() {
        // Every dimension spans several blocks with ragged edges.
        run_portable(23, 17, 29, BlockSizes { mc: 8, kc: 3, nc: 16 });
    }

    #[test]
    fn test_minimal_blocks() {
        run_portable(5, 6, 9, BlockSizes { mc: 4, kc: 1, nc: 8 });
    }

    #[test]
    fn test_tiny_geometry_dispatch() {
        let (m, k, n) = (19, 21, 37);
        let a = test_matrix(m, k, 3);
        let b = test_matrix(k, n, 4);
        let mut c = vec![0.0f32; m * n];

        multiply_blocked(
            &Operand::normal(MatrixView::contiguous(&a, m, k)),
            &Operand::normal(MatrixView::contiguous(&b, k, n)),
            &mut MatrixViewMut::contiguous(&mut c, m, n),
            &CacheGeometry::new(256, 1024),
            &HeapScratch,
        )
        .unwrap();

        assert_close(&c, &naive(&a, &b, m, k, n));
    }

    #[test]
    fn test_adds_into_destination() {
        let (m, k, n) = (3, 2, 4);
        let a = test_matrix(m, k, 5);
        let b = test_matrix(k, n, 6);
        let mut c = vec![10.0f32; m * n];

        multiply_blocked(
            &Operand::normal(MatrixView::contiguous(&a, m, k)),
            &Operand::normal(MatrixView::contiguous(&b, k, n)),
            &mut MatrixViewMut::contiguous(&mut c, m, n),
            &CacheGeometry::default(),
            &HeapScratch,
        )
        .unwrap();

        let expected: Vec<f32> = naive(&a, &b, m, k, n).iter().map(|x| x + 10.0).collect();
        assert_close(&c, &expected);
    }

    #[test]
    fn test_zero_depth_leaves_destination() {
        let mut c = vec![4.0f32; 6];
        multiply_blocked(
            &Operand::normal(MatrixView::contiguous(&[], 2, 0)),
            &Operand::normal(MatrixView::contiguous(&[], 0, 3)),
            &mut MatrixViewMut::contiguous(&mut c, 2, 3),
            &CacheGeometry::default(),
            &HeapScratch,
        )
        .unwrap();
        assert_eq!(c, vec![4.0; 6]);
    }

    #[test]
    fn test_scratch_returned_to_pool() {
        let (m, k, n) = (9, 9, 9);
        let a = test_matrix(m, k, 7);
        let b = test_matrix(k, n, 8);
        let mut c = vec![0.0f32; m * n];
        let pool = PooledScratch::new();

        gemm::<PortableKernel, _>(
            &Operand::normal(MatrixView::contiguous(&a, m, k)),
            &Operand::normal(MatrixView::contiguous(&b, k, n)),
            &mut MatrixViewMut::contiguous(&mut c, m, n),
            BlockSizes { mc: 4, kc: 4, nc: 8 },
            &pool,
        )
        .unwrap();

        // One A and one B buffer are live at a time; both come back.
        assert_eq!(pool.pooled(), 2);
    }

    /// Provider that refuses every request.
    struct Exhausted;

    impl ScratchProvider for Exhausted {
        fn acquire(&self, len: usize) -> Result<ScratchBuffer> {
            Err(crate::error::allocation_error(len * 4, 32, "no scratch left"))
        }

        fn release(&self, _buffer: ScratchBuffer) {}
    }

    #[test]
    fn test_exhausted_provider_reports_allocation_error() {
        let a = test_matrix(2, 2, 0);
        let b = test_matrix(2, 2, 1);
        let mut c = vec![0.0f32; 4];

        let err = multiply_blocked(
            &Operand::normal(MatrixView::contiguous(&a, 2, 2)),
            &Operand::normal(MatrixView::contiguous(&b, 2, 2)),
            &mut MatrixViewMut::contiguous(&mut c, 2, 2),
            &CacheGeometry::default(),
            &Exhausted,
        )
        .unwrap_err();

        assert!(matches!(err, crate::error::GemmError::AllocationError { .. }));
    }

    /// Grants `budget` buffers, then refuses. Tracks buffers not yet returned.
    struct Budgeted {
        budget: std::cell::Cell<usize>,
        outstanding: std::cell::Cell<usize>,
    }

    impl ScratchProvider for Budgeted {
        fn acquire(&self, len: usize) -> Result<ScratchBuffer> {
            if self.budget.get() == 0 {
                return Err(crate::error::allocation_error(len * 4, 32, "budget spent"));
            }
            self.budget.set(self.budget.get() - 1);
            self.outstanding.set(self.outstanding.get() + 1);
            ScratchBuffer::new(len)
        }

        fn release(&self, _buffer: ScratchBuffer) {
            self.outstanding.set(self.outstanding.get() - 1);
        }
    }

    #[test]
    fn test_later_acquire_failure_returns_held_blocks() {
        let (m, k, n) = (9, 9, 9);
        let a = test_matrix(m, k, 9);
        let b = test_matrix(k, n, 10);
        let mut c = vec![0.0f32; m * n];

        // Acquisition order is B, A, A, A, B, ...; each budget runs out mid-call.
        for budget in 1..4 {
            let provider = Budgeted {
                budget: std::cell::Cell::new(budget),
                outstanding: std::cell::Cell::new(0),
            };
            let err = gemm::<PortableKernel, _>(
                &Operand::normal(MatrixView::contiguous(&a, m, k)),
                &Operand::normal(MatrixView::contiguous(&b, k, n)),
                &mut MatrixViewMut::contiguous(&mut c, m, n),
                BlockSizes { mc: 4, kc: 4, nc: 8 },
                &provider,
            )
            .unwrap_err();

            assert!(err.to_string().contains("budget spent"));
            assert_eq!(provider.outstanding.get(), 0, "budget {}", budget);
        }
    }
}
