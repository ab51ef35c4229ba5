//! AVX tile kernel for `f64`.
use super::{tensor_strides, TILE_C, TILE_J};
use crate::TransposeMode;
use std::arch::x86_64::*;

/// Number of `f64` lanes in a 256-bit vector.
const LANES: usize = 4;

pub fn is_available() -> bool {
    is_x86_feature_detected!("avx")
}

/// AVX version of the portable tile accumulation.
///
/// Multiplication and addition are issued separately (no FMA), so results are bitwise
/// identical to the scalar kernels.
///
/// # Safety
///
/// The CPU must support AVX.
#[target_feature(enable = "avx")]
pub unsafe fn accumulate_tiles(
    [a_len, b_len, c_len]: [usize; 3],
    j_len: usize,
    t: &[f64],
    tmode: TransposeMode,
    u: &[f64],
    v: &mut [f64],
) {
    assert!(c_len % TILE_C == 0 && j_len % TILE_J == 0);
    assert!(t.len() >= j_len * b_len);
    assert!(u.len() >= a_len * b_len * c_len);
    assert!(v.len() >= a_len * j_len * c_len);

    let (tstride0, tstride1) = tensor_strides(b_len, j_len, tmode);
    let u_ptr = u.as_ptr();
    let v_ptr = v.as_mut_ptr();

    for a in 0..a_len {
        for j in (0..j_len).step_by(TILE_J) {
            for c in (0..c_len).step_by(TILE_C) {
                let mut vv = [[_mm256_setzero_pd(); TILE_C / LANES]; TILE_J];
                for (jj, row) in vv.iter_mut().enumerate() {
                    for (cc, lane) in row.iter_mut().enumerate() {
                        *lane = _mm256_loadu_pd(v_ptr.add((a * j_len + j + jj) * c_len + c + cc * LANES));
                    }
                }

                for b in 0..b_len {
                    let u_row = u_ptr.add((a * b_len + b) * c_len + c);
                    for (jj, row) in vv.iter_mut().enumerate() {
                        let tq = _mm256_set1_pd(*t.get_unchecked((j + jj) * tstride0 + b * tstride1));
                        for (cc, lane) in row.iter_mut().enumerate() {
                            *lane = _mm256_add_pd(*lane, _mm256_mul_pd(tq, _mm256_loadu_pd(u_row.add(cc * LANES))));
                        }
                    }
                }

                for (jj, row) in vv.iter().enumerate() {
                    for (cc, lane) in row.iter().enumerate() {
                        _mm256_storeu_pd(v_ptr.add((a * j_len + j + jj) * c_len + c + cc * LANES), *lane);
                    }
                }
            }
        }
    }
}
