//! Micro-kernels: the innermost multiply-accumulate over packed panels.
//!
//! A micro-kernel multiplies one packed A panel (`kc` steps of `MR` values)
//! by one packed B panel (`kc` steps of `NR` values) and adds the valid
//! `mr × nr` corner of the resulting tile into the destination. Blocking and
//! packing are shared by every kernel; only the tile shape and the
//! instruction set differ.

#[cfg(all(avx2, target_arch = "x86_64"))]
pub mod avx2;

/// An `MR × NR` register-blocked multiply-accumulate.
pub trait MicroKernel {
    /// Rows of the tile (A panel width).
    const MR: usize;
    /// Columns of the tile (B panel width).
    const NR: usize;
    /// Name used in diagnostics.
    const NAME: &'static str;

    /// Whether the running CPU can execute this kernel.
    fn is_supported() -> bool;

    /// `c[i * ldc + j] += Σ_p a[p * MR + i] · b[p * NR + j]` for `i < mr`,
    /// `j < nr`, `p < kc`.
    ///
    /// # Safety
    ///
    /// `is_supported()` must have returned `true`. `a` must hold `kc * MR`
    /// floats, `b` must hold `kc * NR` floats and `c` at least
    /// `(mr - 1) * ldc + nr` floats, with `1 ≤ mr ≤ MR` and `1 ≤ nr ≤ NR`.
    unsafe fn multiply_add(
        kc: usize,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
        ldc: usize,
        mr: usize,
        nr: usize,
    );
}

/// Adds the top-left `mr × nr` corner of `tile` into `c`.
#[inline(always)]
pub(crate) fn add_tile<const MR: usize, const NR: usize>(
    tile: &[[f32; NR]; MR],
    c: &mut [f32],
    ldc: usize,
    mr: usize,
    nr: usize,
) {
    for (i, tile_row) in tile.iter().enumerate().take(mr) {
        let dst = &mut c[i * ldc..i * ldc + nr];
        for (out, value) in dst.iter_mut().zip(&tile_row[..nr]) {
            *out += value;
        }
    }
}

/// Plain Rust 4×8 kernel. Fixed-size accumulators let the compiler keep
/// the tile in vector registers on any target.
#[derive(Debug, Clone, Copy)]
pub enum PortableKernel {}

const PORTABLE_MR: usize = 4;
const PORTABLE_NR: usize = 8;

impl MicroKernel for PortableKernel {
    const MR: usize = PORTABLE_MR;
    const NR: usize = PORTABLE_NR;
    const NAME: &'static str = "portable 4x8";

    #[inline(always)]
    fn is_supported() -> bool {
        true
    }

    #[inline]
    unsafe fn multiply_add(
        kc: usize,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
        ldc: usize,
        mr: usize,
        nr: usize,
    ) {
        debug_assert!(a.len() >= kc * PORTABLE_MR && b.len() >= kc * PORTABLE_NR);

        let mut tile = [[0.0f32; PORTABLE_NR]; PORTABLE_MR];
        for (a_step, b_step) in a
            .chunks_exact(PORTABLE_MR)
            .zip(b.chunks_exact(PORTABLE_NR))
            .take(kc)
        {
            for (tile_row, &a_value) in tile.iter_mut().zip(a_step) {
                for (acc, &b_value) in tile_row.iter_mut().zip(b_step) {
                    *acc += a_value * b_value;
                }
            }
        }

        add_tile(&tile, c, ldc, mr, nr);
    }
}
