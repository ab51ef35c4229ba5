//! SIMD-blocked host kernels.
//!
//! The basis kernel processes a batch of exactly [`BLOCK_SIZE`] elements (a single element is
//! padded to a full batch). Element data is interleaved so that the element index varies
//! fastest, which turns every contraction into a product with `C` a multiple of the batch size.
//! Contractions are then computed one [`TILE_J`] x [`TILE_C`] output tile at a time, with the
//! tile held in registers for the entire sum.
//!
//! Restriction scatter processes element colors in parallel, where the elements of a color
//! touch pairwise disjoint global entries.
use crate::basis::{BasisKernel, TensorBasis};
use crate::error::{Error, Result};
use crate::restriction::{RestrictionKernel, RestrictionLayout};
use crate::tensor::pow;
use crate::vector::MemSpace;
use crate::workspace::Workspace;
use crate::{EvalMode, Real, TransposeMode};
use fenris_nested_vec::NestedVec;
use fenris_paradis::coloring::sequential_greedy_coloring;
use fenris_paradis::slice::ParallelSliceAccess;
use fenris_paradis::{DisjointSubsets, ParallelIndexedAccess, ParallelIndexedCollection};
use log::debug;
use rayon::prelude::*;
use std::cell::RefCell;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, OnceLock};
use thread_local::ThreadLocal;

#[cfg(target_arch = "x86_64")]
mod avx;

/// Number of elements processed per batch.
pub const BLOCK_SIZE: usize = 8;

/// Number of output rows in a register tile.
pub const TILE_J: usize = 4;

/// Number of output columns in a register tile.
pub const TILE_C: usize = 8;

/// Element batch sizes accepted by the basis kernel.
pub const SUPPORTED_BATCHES: &[usize] = &[1, BLOCK_SIZE];

/// Instruction set used for the register tiles.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimdLevel {
    /// 256-bit AVX vectors, two per tile row.
    Avx,
    /// Portable scalar code operating on the same tiles.
    Portable,
}

impl Display for SimdLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avx => write!(f, "AVX"),
            Self::Portable => write!(f, "portable"),
        }
    }
}

/// The SIMD level available for `f64` tiles on this machine, detected once.
pub fn detect_simd_level() -> SimdLevel {
    static LEVEL: OnceLock<SimdLevel> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            if avx::is_available() {
                return SimdLevel::Avx;
            }
            log::warn!("AVX is not available, falling back to portable tile kernels");
        }
        SimdLevel::Portable
    })
}

/// Scalar types with a register-tiled contraction kernel.
pub trait TileKernel: Real {
    /// Accumulate `V[a, j, c] += Σ_b T[j, b] U[a, b, c]` (or with `T` transposed), one tile at
    /// a time, for a shape already checked against the tile sizes.
    fn accumulate_tiles(shape: [usize; 3], j: usize, t: &[Self], tmode: TransposeMode, u: &[Self], v: &mut [Self]) {
        accumulate_tiles_portable(shape, j, t, tmode, u, v)
    }
}

impl TileKernel for f32 {}

impl TileKernel for f64 {
    fn accumulate_tiles(shape: [usize; 3], j: usize, t: &[Self], tmode: TransposeMode, u: &[Self], v: &mut [Self]) {
        #[cfg(target_arch = "x86_64")]
        {
            if detect_simd_level() == SimdLevel::Avx {
                // SAFETY: AVX support was detected at runtime
                unsafe { avx::accumulate_tiles(shape, j, t, tmode, u, v) };
                return;
            }
        }
        accumulate_tiles_portable(shape, j, t, tmode, u, v)
    }
}

fn tensor_strides(b_len: usize, j_len: usize, tmode: TransposeMode) -> (usize, usize) {
    match tmode {
        TransposeMode::NoTranspose => (b_len, 1),
        TransposeMode::Transpose => (1, j_len),
    }
}

fn accumulate_tiles_portable<T: Real>(
    [a_len, b_len, c_len]: [usize; 3],
    j_len: usize,
    t: &[T],
    tmode: TransposeMode,
    u: &[T],
    v: &mut [T],
) {
    let (tstride0, tstride1) = tensor_strides(b_len, j_len, tmode);
    for a in 0..a_len {
        for j in (0..j_len).step_by(TILE_J) {
            for c in (0..c_len).step_by(TILE_C) {
                let mut vv = [[T::zero(); TILE_C]; TILE_J];
                for (jj, row) in vv.iter_mut().enumerate() {
                    let offset = (a * j_len + j + jj) * c_len + c;
                    row.copy_from_slice(&v[offset..offset + TILE_C]);
                }

                for b in 0..b_len {
                    let offset = (a * b_len + b) * c_len + c;
                    let u_row = &u[offset..offset + TILE_C];
                    for (jj, row) in vv.iter_mut().enumerate() {
                        let tq = t[(j + jj) * tstride0 + b * tstride1];
                        for (v_c, &u_c) in row.iter_mut().zip(u_row) {
                            *v_c += tq * u_c;
                        }
                    }
                }

                for (jj, row) in vv.iter().enumerate() {
                    let offset = (a * j_len + j + jj) * c_len + c;
                    v[offset..offset + TILE_C].copy_from_slice(row);
                }
            }
        }
    }
}

/// Tiled variant of [`contract`](crate::tensor::contract).
///
/// Fails with [`Error::TileMismatch`] unless `C` is a multiple of [`TILE_C`] and `J` a multiple
/// of [`TILE_J`]; `v` is left untouched in that case.
pub fn contract_blocked<T: TileKernel>(
    shape: [usize; 3],
    j: usize,
    t: &[T],
    tmode: TransposeMode,
    add: bool,
    u: &[T],
    v: &mut [T],
) -> Result<()> {
    let [a_len, b_len, c_len] = shape;
    if c_len % TILE_C != 0 || j % TILE_J != 0 {
        return Err(Error::TileMismatch {
            shape,
            j,
            tile: [TILE_J, TILE_C],
        });
    }

    let v = &mut v[..a_len * j * c_len];
    if !add {
        v.fill(T::zero());
    }
    T::accumulate_tiles(shape, j, &t[..j * b_len], tmode, &u[..a_len * b_len * c_len], v);
    Ok(())
}

/// Blocked counterpart of [`contract_chain`](crate::tensor::contract_chain), for data
/// interleaved over a batch of [`BLOCK_SIZE`] elements.
#[allow(clippy::too_many_arguments)]
fn blocked_chain<T: TileKernel>(
    ncomp: usize,
    [rows, cols]: [usize; 2],
    ops: &[&[T]],
    tmode: TransposeMode,
    add: bool,
    u: &[T],
    v: &mut [T],
    scratch: &mut [Vec<T>; 2],
) -> Result<()> {
    let dim = ops.len();
    let (b_len, j_len) = match tmode {
        TransposeMode::NoTranspose => (cols, rows),
        TransposeMode::Transpose => (rows, cols),
    };

    let buf_len = BLOCK_SIZE * ncomp * pow(b_len.max(j_len), dim);
    let [s0, s1] = scratch;
    s0.resize(buf_len.max(s0.len()), T::zero());
    s1.resize(buf_len.max(s1.len()), T::zero());

    let mut pre = ncomp * pow(b_len, dim - 1);
    let mut post = BLOCK_SIZE;
    for (d, op) in ops.iter().enumerate() {
        let shape = [pre, b_len, post];
        let in_len = pre * b_len * post;
        let last = d + 1 == dim;
        let (input, output) = if d % 2 == 1 { (&*s0, &mut *s1) } else { (&*s1, &mut *s0) };
        let input = if d == 0 { u } else { &input[..in_len] };
        if last {
            contract_blocked(shape, j_len, op, tmode, add, input, v)?;
        } else {
            contract_blocked(shape, j_len, op, tmode, false, input, output)?;
        }
        pre /= b_len;
        post *= j_len;
    }
    Ok(())
}

/// Interleave `nelem` element-major records of length `stride` into `blocked`, padding the
/// unused lanes with zeros.
fn block_elements<T: Real>(input: &[T], nelem: usize, stride: usize, blocked: &mut Vec<T>) {
    blocked.clear();
    blocked.resize(stride * BLOCK_SIZE, T::zero());
    for (e, record) in input.chunks_exact(stride).take(nelem).enumerate() {
        for (k, &value) in record.iter().enumerate() {
            blocked[k * BLOCK_SIZE + e] = value;
        }
    }
}

/// Inverse of [`block_elements`] for the first `nelem` lanes.
fn unblock_elements<T: Real>(blocked: &[T], nelem: usize, stride: usize, output: &mut [T]) {
    for (e, record) in output.chunks_exact_mut(stride).take(nelem).enumerate() {
        for (k, value) in record.iter_mut().enumerate() {
            *value = blocked[k * BLOCK_SIZE + e];
        }
    }
}

#[derive(Debug)]
struct BlockedScratch<T> {
    u: Vec<T>,
    v: Vec<T>,
    interp: Vec<T>,
    passes: [Vec<T>; 2],
}

impl<T> Default for BlockedScratch<T> {
    fn default() -> Self {
        Self {
            u: Vec::new(),
            v: Vec::new(),
            interp: Vec::new(),
            passes: [Vec::new(), Vec::new()],
        }
    }
}

/// Basis kernel operating on interleaved batches of elements.
#[derive(Debug)]
pub struct VectorizedBasis<T> {
    basis: Arc<TensorBasis<T>>,
    colocated_grad1d: Option<Vec<T>>,
    workspace: ThreadLocal<RefCell<Workspace>>,
}

impl<T: TileKernel> VectorizedBasis<T> {
    pub fn new(basis: Arc<TensorBasis<T>>) -> Result<Self> {
        let colocated_grad1d = basis.colocated_grad1d()?;
        debug!(
            "Vectorized basis kernel with {} tiles, colocated gradient {}",
            detect_simd_level(),
            if colocated_grad1d.is_some() {
                "enabled"
            } else {
                "unavailable"
            }
        );
        Ok(Self {
            basis,
            colocated_grad1d,
            workspace: ThreadLocal::new(),
        })
    }

    /// Gradient on blocked data through the colocated differentiation matrix.
    fn grad_colocated(&self, colo: &[T], tmode: TransposeMode, scratch: &mut BlockedScratch<T>) -> Result<()> {
        let basis = &*self.basis;
        let dim = basis.dim();
        let ncomp = basis.ncomp();
        let q = basis.q1d();
        let sizes = [q, basis.p1d()];
        let slice_len = BLOCK_SIZE * ncomp * basis.num_qpts();
        let interp_ops = [basis.interp1d(); 3];
        let BlockedScratch { u, v, interp, passes } = scratch;
        interp.resize(slice_len, T::zero());

        match tmode {
            TransposeMode::NoTranspose => {
                blocked_chain(ncomp, sizes, &interp_ops[..dim], tmode, false, u, interp, passes)?;
                for p in 0..dim {
                    let shape = [ncomp * pow(q, dim - 1 - p), q, BLOCK_SIZE * pow(q, p)];
                    let out = &mut v[p * slice_len..(p + 1) * slice_len];
                    contract_blocked(shape, q, colo, tmode, false, interp, out)?;
                }
            }
            TransposeMode::Transpose => {
                for p in 0..dim {
                    let shape = [ncomp * pow(q, dim - 1 - p), q, BLOCK_SIZE * pow(q, p)];
                    let input = &u[p * slice_len..(p + 1) * slice_len];
                    contract_blocked(shape, q, colo, tmode, p > 0, input, interp)?;
                }
                blocked_chain(ncomp, sizes, &interp_ops[..dim], tmode, false, interp, v, passes)?;
            }
        }
        Ok(())
    }

    /// Gradient on blocked data with one chain per derivative.
    fn grad_direct(&self, tmode: TransposeMode, scratch: &mut BlockedScratch<T>) -> Result<()> {
        let basis = &*self.basis;
        let dim = basis.dim();
        let ncomp = basis.ncomp();
        let sizes = [basis.q1d(), basis.p1d()];
        let slice_len = BLOCK_SIZE * ncomp * basis.num_qpts();
        let BlockedScratch { u, v, passes, .. } = scratch;

        for p in 0..dim {
            let mut ops = [basis.interp1d(); 3];
            ops[p] = basis.grad1d();
            match tmode {
                TransposeMode::NoTranspose => {
                    let out = &mut v[p * slice_len..(p + 1) * slice_len];
                    blocked_chain(ncomp, sizes, &ops[..dim], tmode, false, u, out, passes)?;
                }
                TransposeMode::Transpose => {
                    let input = &u[p * slice_len..(p + 1) * slice_len];
                    blocked_chain(ncomp, sizes, &ops[..dim], tmode, p > 0, input, v, passes)?;
                }
            }
        }
        Ok(())
    }
}

impl<T: TileKernel> BasisKernel<T> for VectorizedBasis<T> {
    fn name(&self) -> &'static str {
        "vectorized"
    }

    fn mem_space(&self) -> MemSpace {
        MemSpace::Host
    }

    fn apply(&self, nelem: usize, tmode: TransposeMode, emode: EvalMode, u: &[T], v: &mut [T]) -> Result<()> {
        if !SUPPORTED_BATCHES.contains(&nelem) {
            return Err(Error::UnsupportedBatch {
                nelem,
                supported: SUPPORTED_BATCHES,
            });
        }

        let basis = &*self.basis;
        if emode == EvalMode::Weight {
            crate::backend::reference::broadcast_weights(basis, v);
            return Ok(());
        }

        let in_stride = basis.input_len(1, tmode, emode);
        let out_stride = basis.output_len(1, tmode, emode);
        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        let scratch: &mut BlockedScratch<T> = ws.get_or_default();
        block_elements(u, nelem, in_stride, &mut scratch.u);
        scratch.v.clear();
        scratch.v.resize(out_stride * BLOCK_SIZE, T::zero());

        match emode {
            EvalMode::Interp => {
                let ops = [basis.interp1d(); 3];
                let sizes = [basis.q1d(), basis.p1d()];
                let BlockedScratch {
                    u: blocked_u,
                    v: blocked_v,
                    passes,
                    ..
                } = &mut *scratch;
                blocked_chain(basis.ncomp(), sizes, &ops[..basis.dim()], tmode, false, blocked_u, blocked_v, passes)?;
            }
            EvalMode::Grad => match self.colocated_grad1d.as_deref() {
                Some(colo) => self.grad_colocated(colo, tmode, scratch)?,
                None => self.grad_direct(tmode, scratch)?,
            },
            EvalMode::Weight | EvalMode::None | EvalMode::Div | EvalMode::Curl => {
                return Err(Error::UnsupportedEvalMode {
                    emode,
                    kernel: self.name(),
                })
            }
        }

        unblock_elements(&scratch.v, nelem, out_stride, v);
        Ok(())
    }
}

/// Restriction kernel that parallelizes over elements.
#[derive(Debug, Clone)]
pub struct VectorizedRestriction {
    colors: Option<Vec<DisjointSubsets>>,
}

impl VectorizedRestriction {
    pub fn new(layout: &RestrictionLayout, indices: Option<&[usize]>) -> Self {
        let colors = indices.map(|indices| {
            let mut element_nodes = NestedVec::new();
            for e in 0..layout.nelem {
                element_nodes.push(&indices[e * layout.elemsize..(e + 1) * layout.elemsize]);
            }
            sequential_greedy_coloring(&element_nodes)
        });
        if let Some(colors) = &colors {
            debug!("Colored {} elements with {} colors", layout.nelem, colors.len());
        }
        Self { colors }
    }

    pub fn num_colors(&self) -> Option<usize> {
        self.colors.as_ref().map(Vec::len)
    }

    /// Element labels of each color, if the restriction has explicit indices.
    pub fn color_labels(&self) -> Option<Vec<&[usize]>> {
        self.colors
            .as_ref()
            .map(|colors| colors.iter().map(DisjointSubsets::labels).collect())
    }
}

impl<T: Real> RestrictionKernel<T> for VectorizedRestriction {
    fn name(&self) -> &'static str {
        "vectorized"
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
        let stride = layout.ncomp * layout.elemsize;
        match tmode {
            TransposeMode::NoTranspose => {
                v.par_chunks_mut(stride).enumerate().for_each(|(e, v_e)| {
                    for (k, v_k) in v_e.iter_mut().enumerate() {
                        *v_k = u[layout.global_index(indices, lmode, e * stride + k)];
                    }
                });
            }
            TransposeMode::Transpose => {
                let scatter_element = |access: &ParallelSliceAccess<T>, e: usize| {
                    for k in 0..stride {
                        let i = e * stride + k;
                        // SAFETY: elements processed concurrently touch disjoint global entries
                        unsafe { *access.get_unchecked_mut(layout.global_index(indices, lmode, i)) += u[i] };
                    }
                };

                let access = unsafe { v.create_access() };
                match (indices, &self.colors) {
                    (None, _) => (0..layout.nelem)
                        .into_par_iter()
                        .for_each(|e| scatter_element(&access, e)),
                    (Some(_), Some(colors)) => {
                        for color in colors {
                            color
                                .labels()
                                .par_iter()
                                .for_each(|&e| scatter_element(&access, e));
                        }
                    }
                    (Some(_), None) => (0..layout.nelem).for_each(|e| scatter_element(&access, e)),
                }
            }
        }
        Ok(())
    }
}
