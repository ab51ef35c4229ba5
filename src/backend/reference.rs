//! Sequential reference kernels.
use crate::basis::{BasisKernel, TensorBasis};
use crate::error::{Error, Result};
use crate::restriction::{RestrictionKernel, RestrictionLayout};
use crate::tensor::contract_chain;
use crate::vector::MemSpace;
use crate::workspace::{PassBuffers, Workspace};
use crate::{EvalMode, Real, TransposeMode};
use std::cell::RefCell;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// Interpolate the nodal values of one element to quadrature points, or the reverse.
pub(crate) fn interp_element<T: Real>(
    basis: &TensorBasis<T>,
    tmode: TransposeMode,
    u: &[T],
    v: &mut [T],
    scratch: &mut [Vec<T>; 2],
) {
    let interp = basis.interp1d();
    let ops = [interp; 3];
    contract_chain(
        basis.ncomp(),
        [basis.q1d(), basis.p1d()],
        &ops[..basis.dim()],
        tmode,
        false,
        u,
        v,
        scratch,
    );
}

/// Gradient of one element at quadrature points, or its transpose.
///
/// Derivative `p` is computed by a chain that uses `grad1d` along axis `p` and `interp1d`
/// along all other axes. In transpose mode, the contributions of all derivatives are summed
/// into `v`.
pub(crate) fn grad_element<T: Real>(
    basis: &TensorBasis<T>,
    tmode: TransposeMode,
    u: &[T],
    v: &mut [T],
    scratch: &mut [Vec<T>; 2],
) {
    let dim = basis.dim();
    let slice_len = basis.ncomp() * basis.num_qpts();
    for p in 0..dim {
        let mut ops = [basis.interp1d(); 3];
        ops[p] = basis.grad1d();
        let sizes = [basis.q1d(), basis.p1d()];
        let slice = p * slice_len..(p + 1) * slice_len;
        match tmode {
            TransposeMode::NoTranspose => {
                contract_chain(basis.ncomp(), sizes, &ops[..dim], tmode, false, u, &mut v[slice], scratch)
            }
            TransposeMode::Transpose => {
                contract_chain(basis.ncomp(), sizes, &ops[..dim], tmode, p > 0, &u[slice], v, scratch)
            }
        }
    }
}

/// Fill `v` with the quadrature weights of consecutive elements.
pub(crate) fn broadcast_weights<T: Real>(basis: &TensorBasis<T>, v: &mut [T]) {
    let weights = basis.tensor_weights();
    for element_weights in v.chunks_exact_mut(weights.len()) {
        element_weights.copy_from_slice(&weights);
    }
}

pub(crate) type ElementKernel<T> = fn(&TensorBasis<T>, TransposeMode, &[T], &mut [T], &mut [Vec<T>; 2]);

/// Basis kernel that processes one element at a time.
#[derive(Debug)]
pub struct ReferenceBasis<T> {
    basis: Arc<TensorBasis<T>>,
    workspace: ThreadLocal<RefCell<Workspace>>,
}

impl<T: Real> ReferenceBasis<T> {
    pub fn new(basis: Arc<TensorBasis<T>>) -> Self {
        Self {
            basis,
            workspace: ThreadLocal::new(),
        }
    }
}

impl<T: Real> BasisKernel<T> for ReferenceBasis<T> {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn mem_space(&self) -> MemSpace {
        MemSpace::Host
    }

    fn apply(&self, nelem: usize, tmode: TransposeMode, emode: EvalMode, u: &[T], v: &mut [T]) -> Result<()> {
        let basis = &*self.basis;
        let in_stride = basis.input_len(1, tmode, emode);
        let out_stride = basis.output_len(1, tmode, emode);

        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        let scratch = &mut ws.get_or_default::<PassBuffers<T>>().buffers;

        match emode {
            EvalMode::Interp | EvalMode::Grad => {
                let element_kernel: ElementKernel<T> = if emode == EvalMode::Interp {
                    interp_element
                } else {
                    grad_element
                };
                for (u_e, v_e) in u
                    .chunks_exact(in_stride)
                    .zip(v.chunks_exact_mut(out_stride))
                    .take(nelem)
                {
                    element_kernel(basis, tmode, u_e, v_e, scratch);
                }
                Ok(())
            }
            EvalMode::Weight => {
                broadcast_weights(basis, v);
                Ok(())
            }
            EvalMode::None | EvalMode::Div | EvalMode::Curl => Err(Error::UnsupportedEvalMode {
                emode,
                kernel: self.name(),
            }),
        }
    }
}

/// Restriction kernel with sequential loops over the local buffer.
#[derive(Debug, Copy, Clone, Default)]
pub struct ReferenceRestriction;

impl<T: Real> RestrictionKernel<T> for ReferenceRestriction {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn mem_space(&self) -> MemSpace {
        MemSpace::Host
    }

    fn apply(
        &self,
        layout: &RestrictionLayout,
        indices: Option<&[usize]>,
        tmode: TransposeMode,
        lmode: TransposeMode,
        u: &[T],
        v: &mut [T],
    ) -> Result<()> {
        match tmode {
            TransposeMode::NoTranspose => {
                for (i, v_i) in v.iter_mut().enumerate() {
                    *v_i = u[layout.global_index(indices, lmode, i)];
                }
            }
            TransposeMode::Transpose => {
                for (i, &u_i) in u.iter().enumerate() {
                    v[layout.global_index(indices, lmode, i)] += u_i;
                }
            }
        }
        Ok(())
    }
}
