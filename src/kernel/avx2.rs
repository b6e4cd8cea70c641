//! AVX2 + FMA 6×16 micro-kernel.
//!
//! Twelve YMM accumulators hold the 6×16 tile: each row of the tile is two
//! 8-lane vectors. Every depth step loads one 16-wide B row as two vectors,
//! broadcasts the six A values of that step and issues twelve FMAs. Only
//! compiled when the build script detected AVX2 and FMA on the host.

use std::arch::x86_64::*;

use super::{add_tile, MicroKernel};

const MR: usize = 6;
const NR: usize = 16;

/// AVX2/FMA kernel with a 6×16 tile (12 of the 16 YMM registers).
#[derive(Debug, Clone, Copy)]
pub enum Avx2Kernel {}

impl MicroKernel for Avx2Kernel {
    const MR: usize = MR;
    const NR: usize = NR;
    const NAME: &'static str = "avx2+fma 6x16";

    #[inline]
    fn is_supported() -> bool {
        is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
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
        debug_assert!(a.len() >= kc * MR && b.len() >= kc * NR);

        let mut tile = [[0.0f32; NR]; MR];
        kernel_6x16(kc, a.as_ptr(), b.as_ptr(), &mut tile);
        add_tile(&tile, c, ldc, mr, nr);
    }
}

#[target_feature(enable = "avx2,fma")]
unsafe fn kernel_6x16(kc: usize, a: *const f32, b: *const f32, tile: &mut [[f32; NR]; MR]) {
    let mut c00 = _mm256_setzero_ps(); // C[0][0:7]
    let mut c01 = _mm256_setzero_ps(); // C[0][8:15]
    let mut c10 = _mm256_setzero_ps();
    let mut c11 = _mm256_setzero_ps();
    let mut c20 = _mm256_setzero_ps();
    let mut c21 = _mm256_setzero_ps();
    let mut c30 = _mm256_setzero_ps();
    let mut c31 = _mm256_setzero_ps();
    let mut c40 = _mm256_setzero_ps();
    let mut c41 = _mm256_setzero_ps();
    let mut c50 = _mm256_setzero_ps();
    let mut c51 = _mm256_setzero_ps();

    for p in 0..kc {
        let b_row = b.add(p * NR);
        let b0 = _mm256_loadu_ps(b_row);
        let b1 = _mm256_loadu_ps(b_row.add(8));

        let a_step = a.add(p * MR);

        let a0 = _mm256_broadcast_ss(&*a_step);
        c00 = _mm256_fmadd_ps(a0, b0, c00);
        c01 = _mm256_fmadd_ps(a0, b1, c01);

        let a1 = _mm256_broadcast_ss(&*a_step.add(1));
        c10 = _mm256_fmadd_ps(a1, b0, c10);
        c11 = _mm256_fmadd_ps(a1, b1, c11);

        let a2 = _mm256_broadcast_ss(&*a_step.add(2));
        c20 = _mm256_fmadd_ps(a2, b0, c20);
        c21 = _mm256_fmadd_ps(a2, b1, c21);

        let a3 = _mm256_broadcast_ss(&*a_step.add(3));
        c30 = _mm256_fmadd_ps(a3, b0, c30);
        c31 = _mm256_fmadd_ps(a3, b1, c31);

        let a4 = _mm256_broadcast_ss(&*a_step.add(4));
        c40 = _mm256_fmadd_ps(a4, b0, c40);
        c41 = _mm256_fmadd_ps(a4, b1, c41);

        let a5 = _mm256_broadcast_ss(&*a_step.add(5));
        c50 = _mm256_fmadd_ps(a5, b0, c50);
        c51 = _mm256_fmadd_ps(a5, b1, c51);
    }

    _mm256_storeu_ps(tile[0].as_mut_ptr(), c00);
    _mm256_storeu_ps(tile[0].as_mut_ptr().add(8), c01);
    _mm256_storeu_ps(tile[1].as_mut_ptr(), c10);
    _mm256_storeu_ps(tile[1].as_mut_ptr().add(8), c11);
    _mm256_storeu_ps(tile[2].as_mut_ptr(), c20);
    _mm256_storeu_ps(tile[2].as_mut_ptr().add(8), c21);
    _mm256_storeu_ps(tile[3].as_mut_ptr(), c30);
    _mm256_storeu_ps(tile[3].as_mut_ptr().add(8), c31);
    _mm256_storeu_ps(tile[4].as_mut_ptr(), c40);
    _mm256_storeu_ps(tile[4].as_mut_ptr().add(8), c41);
    _mm256_storeu_ps(tile[5].as_mut_ptr(), c50);
    _mm256_storeu_ps(tile[5].as_mut_ptr().add(8), c51);
}
