//! Tensor-product bases and the basis evaluation operator.
use crate::backend::Backend;
use crate::error::{check_len, Error, Result};
use crate::tensor::pow;
use crate::vector::{MemSpace, Vector};
use crate::{EvalMode, Real, Scalar, TransposeMode};
use itertools::iproduct;
use log::{debug, trace};
use nalgebra::{convert, DMatrix};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use sumfact_quadrature::univariate::{gauss, gauss_lobatto};

/// Point distribution for the quadrature of a Lagrange basis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuadMode {
    #[default]
    Gauss,
    GaussLobatto,
}

/// Immutable data of a tensor-product basis on the reference domain `[-1, 1]^dim`.
///
/// The 1D matrices `interp1d` and `grad1d` have `q1d` rows and `p1d` columns and are stored
/// row-major, so that entry `(q, p)` is found at `q * p1d + p`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBasis<T> {
    dim: usize,
    ncomp: usize,
    p1d: usize,
    q1d: usize,
    interp1d: Vec<T>,
    grad1d: Vec<T>,
    qref1d: Vec<T>,
    qweight1d: Vec<T>,
}

impl<T: Real> TensorBasis<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dim: usize,
        ncomp: usize,
        p1d: usize,
        q1d: usize,
        interp1d: &[T],
        grad1d: &[T],
        qref1d: &[T],
        qweight1d: &[T],
    ) -> Result<Self> {
        if !(1..=3).contains(&dim) {
            return Err(Error::InvalidBasis(format!("dimension must be 1, 2 or 3, got {}", dim)));
        }
        if ncomp == 0 || p1d == 0 || q1d == 0 {
            return Err(Error::InvalidBasis(format!(
                "ncomp, p1d and q1d must be positive, got ncomp = {}, p1d = {}, q1d = {}",
                ncomp, p1d, q1d
            )));
        }
        check_len("interp1d", q1d * p1d, interp1d.len())?;
        check_len("grad1d", q1d * p1d, grad1d.len())?;
        check_len("qref1d", q1d, qref1d.len())?;
        check_len("qweight1d", q1d, qweight1d.len())?;

        Ok(Self {
            dim,
            ncomp,
            p1d,
            q1d,
            interp1d: interp1d.to_vec(),
            grad1d: grad1d.to_vec(),
            qref1d: qref1d.to_vec(),
            qweight1d: qweight1d.to_vec(),
        })
    }

    /// An H1 Lagrange basis with Gauss-Lobatto nodes.
    ///
    /// The `p1d` nodes of the 1D basis are the Gauss-Lobatto points, and the `q1d` quadrature
    /// points are either Gauss or Gauss-Lobatto points.
    pub fn lagrange(dim: usize, ncomp: usize, p1d: usize, q1d: usize, qmode: QuadMode) -> Result<Self> {
        let (_, nodes) = gauss_lobatto(p1d)
            .map_err(|err| Error::InvalidBasis(format!("{} for {} Lagrange nodes", err, p1d)))?;
        let (weights, points) = match qmode {
            QuadMode::Gauss if q1d == 0 => {
                return Err(Error::InvalidBasis("Gauss quadrature needs at least 1 point".to_string()))
            }
            QuadMode::Gauss => gauss(q1d),
            QuadMode::GaussLobatto => gauss_lobatto(q1d)
                .map_err(|err| Error::InvalidBasis(format!("{} for {} quadrature points", err, q1d)))?,
        };

        let nodes: Vec<T> = nodes.iter().map(|x| convert(x[0])).collect();
        let qref1d: Vec<T> = points.iter().map(|x| convert(x[0])).collect();
        let qweight1d: Vec<T> = weights.into_iter().map(convert).collect();
        let (interp1d, grad1d) = lagrange_matrices(&nodes, &qref1d);

        Self::new(dim, ncomp, p1d, q1d, &interp1d, &grad1d, &qref1d, &qweight1d)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn p1d(&self) -> usize {
        self.p1d
    }

    pub fn q1d(&self) -> usize {
        self.q1d
    }

    pub fn interp1d(&self) -> &[T] {
        &self.interp1d
    }

    pub fn grad1d(&self) -> &[T] {
        &self.grad1d
    }

    pub fn qref1d(&self) -> &[T] {
        &self.qref1d
    }

    pub fn qweight1d(&self) -> &[T] {
        &self.qweight1d
    }

    /// Compute the `q1d x q1d` matrix that differentiates at quadrature points.
    ///
    /// Returns `None` when `q1d < p1d`, and an error if `interp1d` does not have full column rank.
    pub fn colocated_grad1d(&self) -> Result<Option<Vec<T>>> {
        if self.q1d < self.p1d {
            return Ok(None);
        }
        colocated_grad(self.p1d, self.q1d, &self.interp1d, &self.grad1d).map(Some)
    }

    /// Number of nodes per element and component.
    pub fn num_nodes(&self) -> usize {
        pow(self.p1d, self.dim)
    }

    /// Number of quadrature points per element.
    pub fn num_qpts(&self) -> usize {
        pow(self.q1d, self.dim)
    }

    /// Length of the nodal representation of `nelem` elements.
    pub fn nodal_len(&self, nelem: usize) -> usize {
        nelem * self.ncomp * self.num_nodes()
    }

    /// Length of the quadrature point representation of `nelem` elements for `emode`.
    pub fn qpt_len(&self, nelem: usize, emode: EvalMode) -> usize {
        match emode {
            EvalMode::Interp => nelem * self.ncomp * self.num_qpts(),
            EvalMode::Grad => nelem * self.dim * self.ncomp * self.num_qpts(),
            EvalMode::Weight => nelem * self.num_qpts(),
            EvalMode::None | EvalMode::Div | EvalMode::Curl => 0,
        }
    }

    /// Length of the input buffer of an application. WEIGHT has no input.
    pub fn input_len(&self, nelem: usize, tmode: TransposeMode, emode: EvalMode) -> usize {
        match (tmode, emode) {
            (_, EvalMode::Weight) => 0,
            (TransposeMode::NoTranspose, _) => self.nodal_len(nelem),
            (TransposeMode::Transpose, _) => self.qpt_len(nelem, emode),
        }
    }

    /// Length of the output buffer of an application.
    pub fn output_len(&self, nelem: usize, tmode: TransposeMode, emode: EvalMode) -> usize {
        match tmode {
            TransposeMode::NoTranspose => self.qpt_len(nelem, emode),
            TransposeMode::Transpose => self.nodal_len(nelem),
        }
    }

    /// Tensor-product quadrature weights for a single element.
    pub fn tensor_weights(&self) -> Vec<T> {
        let q = self.q1d;
        let nqpt = self.num_qpts();
        let mut w = vec![T::zero(); nqpt];
        let mut post = 1;
        for d in 0..self.dim {
            let pre = nqpt / (post * q);
            for i in 0..pre {
                for j in 0..q {
                    for k in 0..post {
                        let idx = (i * q + j) * post + k;
                        w[idx] = if d == 0 {
                            self.qweight1d[j]
                        } else {
                            self.qweight1d[j] * w[idx]
                        };
                    }
                }
            }
            post *= q;
        }
        w
    }
}

/// Interpolation and derivative matrices of the Lagrange polynomials on `nodes`, evaluated
/// at `points`, in barycentric form.
///
/// A point that coincides exactly with a node yields an exact unit row in the interpolation
/// matrix.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
fn lagrange_matrices<T: Real>(nodes: &[T], points: &[T]) -> (Vec<T>, Vec<T>) {
    let p = nodes.len();
    let q = points.len();

    let bary: Vec<T> = (0..p)
        .map(|k| {
            let prod = (0..p)
                .filter(|&j| j != k)
                .fold(1.0, |acc, j| acc * (nodes[k] - nodes[j]));
            1.0 / prod
        })
        .collect();

    let mut interp = vec![0.0; q * p];
    let mut grad = vec![0.0; q * p];
    for (i, &x) in points.iter().enumerate() {
        let row_interp = &mut interp[i * p..(i + 1) * p];
        let row_grad = &mut grad[i * p..(i + 1) * p];

        if let Some(m) = nodes.iter().position(|&node| node == x) {
            row_interp[m] = 1.0;
            let mut diag = 0.0;
            for k in (0..p).filter(|&k| k != m) {
                let d_mk = (bary[k] / bary[m]) / (nodes[m] - nodes[k]);
                row_grad[k] = d_mk;
                diag -= d_mk;
            }
            row_grad[m] = diag;
        } else {
            let ell = nodes.iter().fold(1.0, |acc, &node| acc * (x - node));
            let inv_sum = nodes.iter().fold(0.0, |acc, &node| acc + 1.0 / (x - node));
            for k in 0..p {
                let value = ell * bary[k] / (x - nodes[k]);
                row_interp[k] = value;
                row_grad[k] = value * (inv_sum - 1.0 / (x - nodes[k]));
            }
        }
    }
    (interp, grad)
}

/// Compute the matrix `C` with `C B = G` on the span of `B`, i.e. `C = G B⁺`.
fn colocated_grad<T: Real>(p1d: usize, q1d: usize, interp1d: &[T], grad1d: &[T]) -> Result<Vec<T>> {
    let b = DMatrix::from_row_slice(q1d, p1d, interp1d);
    let g = DMatrix::from_row_slice(q1d, p1d, grad1d);
    let svd = b.svd(true, true);
    let sigma_max = svd
        .singular_values
        .iter()
        .fold(T::zero(), |max, &sigma| max.max(sigma));
    let tol = sigma_max * convert::<f64, T>(q1d as f64) * T::default_epsilon();
    let rank = svd.rank(tol);
    if rank < p1d {
        return Err(Error::InvalidBasis(format!(
            "interp1d must have full column rank {}, got rank {}",
            p1d, rank
        )));
    }
    let b_pinv = svd
        .pseudo_inverse(tol)
        .map_err(|msg| Error::InvalidBasis(msg.to_string()))?;
    let c = g * b_pinv;
    Ok(iproduct!(0..q1d, 0..q1d).map(|(i, j)| c[(i, j)]).collect())
}

/// The computational kernel behind a [`Basis`].
///
/// Kernels receive buffers that have already been validated against the basis dimensions,
/// and must not modify the output before all of their own preconditions have been checked.
pub trait BasisKernel<T>: Debug + Send + Sync {
    /// Short name of the kernel, used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Memory space that the kernel reads from and writes to.
    fn mem_space(&self) -> MemSpace;

    fn apply(&self, nelem: usize, tmode: TransposeMode, emode: EvalMode, u: &[T], v: &mut [T]) -> Result<()>;
}

/// A tensor-product basis bound to a backend.
#[derive(Debug)]
pub struct Basis<T> {
    data: Arc<TensorBasis<T>>,
    backend: Backend,
    kernel: Box<dyn BasisKernel<T>>,
}

impl<T: Scalar> Basis<T> {
    /// Create a basis from explicit 1D data.
    #[allow(clippy::too_many_arguments)]
    pub fn create_tensor(
        backend: Backend,
        dim: usize,
        ncomp: usize,
        p1d: usize,
        q1d: usize,
        interp1d: &[T],
        grad1d: &[T],
        qref1d: &[T],
        qweight1d: &[T],
    ) -> Result<Self> {
        let data = TensorBasis::new(dim, ncomp, p1d, q1d, interp1d, grad1d, qref1d, qweight1d)?;
        Self::from_tensor_basis(backend, data)
    }

    /// Create an H1 Lagrange basis, see [`TensorBasis::lagrange`].
    pub fn create_tensor_lagrange(
        backend: Backend,
        dim: usize,
        ncomp: usize,
        p1d: usize,
        q1d: usize,
        qmode: QuadMode,
    ) -> Result<Self> {
        Self::from_tensor_basis(backend, TensorBasis::lagrange(dim, ncomp, p1d, q1d, qmode)?)
    }

    pub fn from_tensor_basis(backend: Backend, data: TensorBasis<T>) -> Result<Self> {
        let data = Arc::new(data);
        let kernel = backend.basis_kernel(Arc::clone(&data))?;
        debug!(
            "Created basis (dim = {}, ncomp = {}, p1d = {}, q1d = {}) with {} kernel",
            data.dim(),
            data.ncomp(),
            data.p1d(),
            data.q1d(),
            kernel.name()
        );
        Ok(Self { data, backend, kernel })
    }

    pub fn tensor_basis(&self) -> &TensorBasis<T> {
        &self.data
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Apply the basis to `nelem` elements, accessing the vectors in the kernel's memory space.
    ///
    /// For [`EvalMode::Weight`], `u` is not accessed at all.
    pub fn apply(
        &self,
        nelem: usize,
        tmode: TransposeMode,
        emode: EvalMode,
        u: &Vector<T>,
        v: &mut Vector<T>,
    ) -> Result<()> {
        let mem = self.kernel.mem_space();
        if emode == EvalMode::Weight {
            let mut v = v.write(mem);
            self.apply_slices(nelem, tmode, emode, &[], &mut v)
        } else {
            let u = u.read(mem);
            let mut v = v.write(mem);
            self.apply_slices(nelem, tmode, emode, &u, &mut v)
        }
    }

    /// Apply the basis to `nelem` elements stored in raw slices.
    ///
    /// In transpose mode, the output is overwritten with the result.
    pub fn apply_slices(
        &self,
        nelem: usize,
        tmode: TransposeMode,
        emode: EvalMode,
        u: &[T],
        v: &mut [T],
    ) -> Result<()> {
        match (tmode, emode) {
            (_, EvalMode::None | EvalMode::Div | EvalMode::Curl) => {
                return Err(Error::UnsupportedEvalMode {
                    emode,
                    kernel: self.kernel.name(),
                })
            }
            (TransposeMode::Transpose, EvalMode::Weight) => return Err(Error::IncompatibleTranspose { emode }),
            _ => {}
        }

        if emode != EvalMode::Weight {
            check_len("basis input", self.data.input_len(nelem, tmode, emode), u.len())?;
        }
        check_len("basis output", self.data.output_len(nelem, tmode, emode), v.len())?;

        trace!(
            "Applying basis: kernel = {}, nelem = {}, tmode = {:?}, emode = {:?}",
            self.kernel.name(),
            nelem,
            tmode,
            emode
        );
        self.kernel.apply(nelem, tmode, emode, u, v)
    }
}
