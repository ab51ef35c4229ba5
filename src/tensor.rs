//! The sum-factorized tensor contraction primitive.
//!
//! A tensor-product operator acting on `dim`-dimensional data is applied one axis at a time.
//! Each pass views the data as a 3-tensor `U[a, b, c]`, where `b` is the axis being contracted,
//! `c` collects all axes that vary faster and `a` all axes that vary slower, and maps it to
//! `V[a, j, c]` by multiplication with a 1D matrix.
use crate::{Real, TransposeMode};

/// Integer power for tensor sizes.
pub fn pow(base: usize, exp: usize) -> usize {
    base.pow(exp as u32)
}

/// Contract the middle index of a 3-tensor with a 1D matrix.
///
/// With `shape = [A, B, C]`, computes
///
/// - `V[a, j, c] = Σ_b T[j, b] U[a, b, c]` for [`TransposeMode::NoTranspose`], where
///   `T[j, b] = t[j * B + b]`,
/// - `V[a, j, c] = Σ_b T[b, j] U[a, b, c]` for [`TransposeMode::Transpose`], where
///   `T[b, j] = t[b * J + j]`,
///
/// with `U[a, b, c] = u[(a * B + b) * C + c]` and `V[a, j, c] = v[(a * J + j) * C + c]`.
///
/// If `add` is `false`, `V` is overwritten, otherwise the result is accumulated into the
/// existing contents of `v`. The sum over `b` is always evaluated in ascending order, starting
/// from the prior value of each entry.
///
/// Shapes are not validated beyond the bounds checks of slice indexing.
pub fn contract<T: Real>(
    shape: [usize; 3],
    j: usize,
    t: &[T],
    tmode: TransposeMode,
    add: bool,
    u: &[T],
    v: &mut [T],
) {
    let [a_len, b_len, c_len] = shape;
    let (tstride0, tstride1) = match tmode {
        TransposeMode::NoTranspose => (b_len, 1),
        TransposeMode::Transpose => (1, j),
    };

    let v = &mut v[..a_len * j * c_len];
    if !add {
        v.fill(T::zero());
    }

    for a in 0..a_len {
        for b in 0..b_len {
            let u_row = &u[(a * b_len + b) * c_len..(a * b_len + b + 1) * c_len];
            for jj in 0..j {
                let tq = t[jj * tstride0 + b * tstride1];
                let v_row = &mut v[(a * j + jj) * c_len..(a * j + jj + 1) * c_len];
                for (v_c, &u_c) in v_row.iter_mut().zip(u_row) {
                    *v_c += tq * u_c;
                }
            }
        }
    }
}

/// Apply one 1D operator per axis to `ncomp` tensors of dimension `dim`.
///
/// Every operator in `ops` is stored as a `rows x cols` row-major matrix. In
/// [`TransposeMode::NoTranspose`] the chain maps tensors with `cols` entries per axis to tensors
/// with `rows` entries per axis; in [`TransposeMode::Transpose`] the roles are reversed.
/// Pass `d` contracts axis `d` with `ops[d]`, where axis 0 varies fastest.
///
/// Intermediate results alternate between the two scratch buffers, which are grown as needed.
/// The final pass writes (or, with `add`, accumulates) into `v`.
#[allow(clippy::too_many_arguments)]
pub fn contract_chain<T: Real>(
    ncomp: usize,
    [rows, cols]: [usize; 2],
    ops: &[&[T]],
    tmode: TransposeMode,
    add: bool,
    u: &[T],
    v: &mut [T],
    scratch: &mut [Vec<T>; 2],
) {
    let dim = ops.len();
    assert!(dim > 0, "contraction chain needs at least one operator");
    let (b_len, j_len) = match tmode {
        TransposeMode::NoTranspose => (cols, rows),
        TransposeMode::Transpose => (rows, cols),
    };

    let buf_len = ncomp * pow(b_len.max(j_len), dim);
    let [s0, s1] = scratch;
    if s0.len() < buf_len {
        s0.resize(buf_len, T::zero());
    }
    if s1.len() < buf_len {
        s1.resize(buf_len, T::zero());
    }

    let mut pre = ncomp * pow(b_len, dim - 1);
    let mut post = 1;
    for (d, op) in ops.iter().enumerate() {
        let shape = [pre, b_len, post];
        let in_len = pre * b_len * post;
        let out_len = pre * j_len * post;
        let last = d + 1 == dim;

        match (d == 0, last) {
            (true, true) => contract(shape, j_len, op, tmode, add, &u[..in_len], v),
            (true, false) => contract(shape, j_len, op, tmode, false, &u[..in_len], &mut s0[..out_len]),
            (false, true) => {
                let input = if d % 2 == 1 { &s0[..in_len] } else { &s1[..in_len] };
                contract(shape, j_len, op, tmode, add, input, v)
            }
            (false, false) => {
                let (input, output) = if d % 2 == 1 { (&*s0, &mut *s1) } else { (&*s1, &mut *s0) };
                contract(shape, j_len, op, tmode, false, &input[..in_len], &mut output[..out_len])
            }
        }

        pre /= b_len;
        post *= j_len;
    }
}
