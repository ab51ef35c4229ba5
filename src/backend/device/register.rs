//! Register-blocked device kernels.
//!
//! Every lane of a warp owns one element and keeps the whole element tensor (one component at
//! a time) in fixed-size local arrays. This avoids block-shared memory entirely, at the cost of
//! limiting the 1D sizes to [`MAX_1D`].
use crate::backend::device::LaunchConfig;
use crate::basis::{BasisKernel, TensorBasis};
use crate::error::{Error, Result};
use crate::tensor::{contract, pow};
use crate::vector::MemSpace;
use crate::{EvalMode, Real, TransposeMode};
use fenris_paradis::ParallelIndexedCollection;
use log::debug;
use rayon::prelude::*;
use std::mem::swap;
use std::sync::Arc;

/// Number of lanes in a warp.
pub const WARP_SIZE: usize = 32;

/// Largest supported `p1d` and `q1d`.
pub const MAX_1D: usize = 8;

const CAPACITY: usize = MAX_1D * MAX_1D * MAX_1D;

type Registers<T> = [T; CAPACITY];

/// Basis kernel with one lane per element.
#[derive(Debug)]
pub struct RegisterBasis<T> {
    basis: Arc<TensorBasis<T>>,
}

impl<T: Real> RegisterBasis<T> {
    pub fn new(basis: Arc<TensorBasis<T>>) -> Result<Self> {
        if basis.p1d() > MAX_1D || basis.q1d() > MAX_1D {
            return Err(Error::UnsupportedConfig(format!(
                "register-blocked kernels support p1d, q1d <= {}, got p1d = {}, q1d = {}",
                MAX_1D,
                basis.p1d(),
                basis.q1d()
            )));
        }
        debug!("Register-blocked device basis kernel with warp size {}", WARP_SIZE);
        Ok(Self { basis })
    }

    fn launch_config(nelem: usize) -> LaunchConfig {
        LaunchConfig {
            grid_dim: (nelem + WARP_SIZE - 1) / WARP_SIZE,
            block_dim: WARP_SIZE,
        }
    }

    /// Evaluate the basis for the element owned by one lane.
    fn run_lane(&self, tmode: TransposeMode, emode: EvalMode, u: &[T], v: &mut [T]) {
        let basis = &*self.basis;
        let dim = basis.dim();
        let ncomp = basis.ncomp();
        let nnodes = basis.num_nodes();
        let nqpt = basis.num_qpts();
        let sizes = [basis.q1d(), basis.p1d()];

        let mut r_u = [T::zero(); CAPACITY];
        let mut r_t = [T::zero(); CAPACITY];
        let mut r_v = [T::zero(); CAPACITY];

        match (emode, tmode) {
            (EvalMode::Interp, _) => {
                let (in_len, out_len) = match tmode {
                    TransposeMode::NoTranspose => (nnodes, nqpt),
                    TransposeMode::Transpose => (nqpt, nnodes),
                };
                let ops = [basis.interp1d(); 3];
                for comp in 0..ncomp {
                    r_u[..in_len].copy_from_slice(&u[comp * in_len..(comp + 1) * in_len]);
                    chain_in_registers(&ops[..dim], sizes, tmode, false, &mut r_u, &mut r_t, &mut r_v);
                    v[comp * out_len..(comp + 1) * out_len].copy_from_slice(&r_v[..out_len]);
                }
            }
            (EvalMode::Grad, TransposeMode::NoTranspose) => {
                for p in 0..dim {
                    let mut ops = [basis.interp1d(); 3];
                    ops[p] = basis.grad1d();
                    for comp in 0..ncomp {
                        r_u[..nnodes].copy_from_slice(&u[comp * nnodes..(comp + 1) * nnodes]);
                        chain_in_registers(&ops[..dim], sizes, tmode, false, &mut r_u, &mut r_t, &mut r_v);
                        let offset = (p * ncomp + comp) * nqpt;
                        v[offset..offset + nqpt].copy_from_slice(&r_v[..nqpt]);
                    }
                }
            }
            (EvalMode::Grad, TransposeMode::Transpose) => {
                for comp in 0..ncomp {
                    for p in 0..dim {
                        let mut ops = [basis.interp1d(); 3];
                        ops[p] = basis.grad1d();
                        let offset = (p * ncomp + comp) * nqpt;
                        r_u[..nqpt].copy_from_slice(&u[offset..offset + nqpt]);
                        chain_in_registers(&ops[..dim], sizes, tmode, p > 0, &mut r_u, &mut r_t, &mut r_v);
                    }
                    v[comp * nnodes..(comp + 1) * nnodes].copy_from_slice(&r_v[..nnodes]);
                }
            }
            (EvalMode::Weight, _) => {
                r_v[..nqpt].fill(T::one());
                let q = basis.q1d();
                for (k, w) in r_v[..nqpt].iter_mut().enumerate() {
                    for d in 0..dim {
                        *w *= basis.qweight1d()[(k / pow(q, d)) % q];
                    }
                }
                v.copy_from_slice(&r_v[..nqpt]);
            }
            (EvalMode::None | EvalMode::Div | EvalMode::Curl, _) => {}
        }
    }
}

/// Apply one operator per axis to the tensor in `r_u`, leaving the result in `r_v`.
///
/// `r_u` and `r_t` are clobbered. With `add`, the final pass accumulates into `r_v`.
fn chain_in_registers<T: Real>(
    ops: &[&[T]],
    [rows, cols]: [usize; 2],
    tmode: TransposeMode,
    add: bool,
    r_u: &mut Registers<T>,
    r_t: &mut Registers<T>,
    r_v: &mut Registers<T>,
) {
    let dim = ops.len();
    let (b_len, j_len) = match tmode {
        TransposeMode::NoTranspose => (cols, rows),
        TransposeMode::Transpose => (rows, cols),
    };

    let mut input = r_u;
    let mut output = r_t;
    let mut pre = pow(b_len, dim - 1);
    let mut post = 1;
    for (d, op) in ops.iter().enumerate() {
        let shape = [pre, b_len, post];
        let in_len = pre * b_len * post;
        let out_len = pre * j_len * post;
        if d + 1 == dim {
            contract(shape, j_len, op, tmode, add, &input[..in_len], &mut r_v[..out_len]);
        } else {
            contract(shape, j_len, op, tmode, false, &input[..in_len], &mut output[..out_len]);
            swap(&mut input, &mut output);
        }
        pre /= b_len;
        post *= j_len;
    }
}

impl<T: Real> BasisKernel<T> for RegisterBasis<T> {
    fn name(&self) -> &'static str {
        "device-register"
    }

    fn mem_space(&self) -> MemSpace {
        MemSpace::Device
    }

    fn apply(&self, nelem: usize, tmode: TransposeMode, emode: EvalMode, u: &[T], v: &mut [T]) -> Result<()> {
        if !matches!(emode, EvalMode::Interp | EvalMode::Grad | EvalMode::Weight) {
            return Err(Error::UnsupportedEvalMode {
                emode,
                kernel: self.name(),
            });
        }

        let basis = &*self.basis;
        let in_stride = basis.input_len(1, tmode, emode);
        let out_stride = basis.output_len(1, tmode, emode);
        let launch = Self::launch_config(nelem);
        let v = unsafe { v.create_access() };

        (0..launch.grid_dim).into_par_iter().for_each(|warp| {
            for lane in 0..launch.block_dim {
                let elem = warp * launch.block_dim + lane;
                if elem < nelem {
                    // SAFETY: each element belongs to exactly one lane of one warp
                    let v_e = unsafe { v.subslice_mut(elem * out_stride..(elem + 1) * out_stride) };
                    let u_e = &u[elem * in_stride..(elem + 1) * in_stride];
                    self.run_lane(tmode, emode, u_e, v_e);
                }
            }
        });
        Ok(())
    }
}
