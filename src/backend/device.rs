//! Block-parallel kernels operating on device memory.
//!
//! The device strategy is organized like a GPU launch: a grid of blocks, each with a fixed
//! number of threads. Blocks run in parallel on the rayon thread pool. The threads of a block
//! cooperate on one element at a time and stage the 1D matrices and intermediate tensors in
//! block-shared buffers; consecutive contraction passes are separated by a barrier, which is
//! implicit since the threads of a block are executed in lock-step, one pass after the other.
use crate::backend::DeviceConfig;
use crate::backend::DeviceVariant;
use crate::basis::{BasisKernel, TensorBasis};
use crate::error::{Error, Result};
use crate::restriction::{RestrictionKernel, RestrictionLayout};
use crate::vector::MemSpace;
use crate::workspace::Workspace;
use crate::{EvalMode, Real, Scalar, TransposeMode};
use fenris_paradis::slice::ParallelSliceAccess;
use fenris_paradis::{ParallelIndexedAccess, ParallelIndexedCollection};
use log::debug;
use rayon::prelude::*;
use std::cell::RefCell;
use std::sync::Arc;
use thread_local::ThreadLocal;

pub mod register;

/// Grid and block dimensions of a kernel launch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: usize,
    pub block_dim: usize,
}

impl LaunchConfig {
    /// Total number of threads in the launch.
    pub fn num_threads(&self) -> usize {
        self.grid_dim * self.block_dim
    }
}

fn validate_config(config: &DeviceConfig) -> Result<()> {
    if config.block_size == 0 {
        return Err(Error::UnsupportedConfig("block size must be positive".to_string()));
    }
    if config.grid_size == Some(0) {
        return Err(Error::UnsupportedConfig("grid size must be positive".to_string()));
    }
    Ok(())
}

pub(crate) fn basis_kernel<T: Scalar>(
    config: &DeviceConfig,
    basis: Arc<TensorBasis<T>>,
) -> Result<Box<dyn BasisKernel<T>>> {
    validate_config(config)?;
    match config.variant {
        DeviceVariant::SharedMemory => Ok(Box::new(SharedMemoryBasis::new(*config, basis))),
        DeviceVariant::RegisterBlocked => Ok(Box::new(register::RegisterBasis::new(basis)?)),
    }
}

pub(crate) fn restriction_kernel<T: Scalar>(config: &DeviceConfig) -> Result<Box<dyn RestrictionKernel<T>>> {
    validate_config(config)?;
    Ok(Box::new(DeviceRestriction { config: *config }))
}

/// Run `f(k)` for every `k < len`, distributing the indices over the threads of a block
/// in the usual strided pattern.
#[inline]
fn for_each_thread(block_dim: usize, len: usize, mut f: impl FnMut(usize)) {
    for tid in 0..block_dim {
        for k in (tid..len).step_by(block_dim) {
            f(k);
        }
    }
}

/// Copy `src` into the block-shared buffer `dst`.
fn stage<T: Real>(block_dim: usize, dst: &mut Vec<T>, src: &[T]) {
    dst.resize(src.len(), T::zero());
    for_each_thread(block_dim, src.len(), |k| dst[k] = src[k]);
}

/// Block-shared memory of one block.
#[derive(Debug)]
struct SharedMemory<T> {
    interp1d: Vec<T>,
    grad1d: Vec<T>,
    weights: Vec<T>,
    buf: [Vec<T>; 2],
}

impl<T> Default for SharedMemory<T> {
    fn default() -> Self {
        Self {
            interp1d: Vec::new(),
            grad1d: Vec::new(),
            weights: Vec::new(),
            buf: [Vec::new(), Vec::new()],
        }
    }
}

/// Operator sizes of one contraction pass, oriented for the direction of application.
#[derive(Debug, Copy, Clone)]
struct PassGeometry {
    p: usize,
    q: usize,
    stride0: usize,
    stride1: usize,
}

impl PassGeometry {
    fn new(p1d: usize, q1d: usize, tmode: TransposeMode) -> Self {
        match tmode {
            TransposeMode::NoTranspose => Self {
                p: p1d,
                q: q1d,
                stride0: p1d,
                stride1: 1,
            },
            TransposeMode::Transpose => Self {
                p: q1d,
                q: p1d,
                stride0: 1,
                stride1: p1d,
            },
        }
    }
}

/// One contraction pass computed cooperatively by the threads of a block.
///
/// Each thread computes a strided subset of the `pre * q * post` outputs.
#[allow(clippy::too_many_arguments)]
fn block_pass<T: Real>(
    block_dim: usize,
    geometry: PassGeometry,
    pre: usize,
    post: usize,
    t: &[T],
    input: &[T],
    output: &mut [T],
    accumulate: bool,
) {
    let PassGeometry { p, q, stride0, stride1 } = geometry;
    for_each_thread(block_dim, pre * post * q, |k| {
        let c = k % post;
        let j = (k / post) % q;
        let a = k / (post * q);
        let mut vk = T::zero();
        for b in 0..p {
            vk += t[j * stride0 + b * stride1] * input[(a * p + b) * post + c];
        }
        if accumulate {
            output[k] += vk;
        } else {
            output[k] = vk;
        }
    });
}

/// Apply one operator per axis to the element data staged in `buf[0]`, writing the result of
/// the final pass to `out`.
fn block_chain<T: Real>(
    block_dim: usize,
    geometry: PassGeometry,
    mut pre: usize,
    ops: &[&[T]],
    buf: &mut [Vec<T>; 2],
    out: &mut [T],
    accumulate: bool,
) {
    let dim = ops.len();
    let mut post = 1;
    let [buf1, buf2] = buf;
    for (d, t) in ops.iter().enumerate() {
        pre /= geometry.p;
        let (input, output) = if d % 2 == 1 { (&*buf2, &mut *buf1) } else { (&*buf1, &mut *buf2) };
        if d + 1 == dim {
            block_pass(block_dim, geometry, pre, post, t, input, out, accumulate);
        } else {
            block_pass(block_dim, geometry, pre, post, t, input, output, false);
        }
        post *= geometry.q;
    }
}

/// Basis kernel with block-shared staging.
#[derive(Debug)]
pub struct SharedMemoryBasis<T> {
    basis: Arc<TensorBasis<T>>,
    config: DeviceConfig,
    workspace: ThreadLocal<RefCell<Workspace>>,
}

impl<T: Real> SharedMemoryBasis<T> {
    pub fn new(config: DeviceConfig, basis: Arc<TensorBasis<T>>) -> Self {
        debug!(
            "Device basis kernel with block size {} and grid size {:?}",
            config.block_size, config.grid_size
        );
        Self {
            basis,
            config,
            workspace: ThreadLocal::new(),
        }
    }

    fn launch_config(&self, nelem: usize) -> LaunchConfig {
        let grid_dim = self.config.grid_size.unwrap_or(nelem).min(nelem).max(1);
        LaunchConfig {
            grid_dim,
            block_dim: self.config.block_size,
        }
    }

    /// Process the elements assigned to one block.
    #[allow(clippy::too_many_arguments)]
    fn run_block(
        &self,
        launch: LaunchConfig,
        block_idx: usize,
        nelem: usize,
        tmode: TransposeMode,
        emode: EvalMode,
        u: &[T],
        v: &ParallelSliceAccess<T>,
    ) {
        let basis = &*self.basis;
        let block_dim = launch.block_dim;
        let ws = &mut *self.workspace.get_or_default().borrow_mut();
        let shared: &mut SharedMemory<T> = ws.get_or_default();

        let buf_len = basis.ncomp() * basis.p1d().max(basis.q1d()).pow(basis.dim() as u32);
        for buf in &mut shared.buf {
            buf.resize(buf_len, T::zero());
        }
        stage(block_dim, &mut shared.interp1d, basis.interp1d());
        match emode {
            EvalMode::Grad => stage(block_dim, &mut shared.grad1d, basis.grad1d()),
            EvalMode::Weight => stage(block_dim, &mut shared.weights, &basis.tensor_weights()),
            _ => {}
        }

        let geometry = PassGeometry::new(basis.p1d(), basis.q1d(), tmode);
        let in_stride = basis.input_len(1, tmode, emode);
        let out_stride = basis.output_len(1, tmode, emode);
        let dim = basis.dim();

        for elem in (block_idx..nelem).step_by(launch.grid_dim) {
            // SAFETY: every element is processed by exactly one block, and element output
            // ranges do not overlap
            let cur_v = unsafe { v.subslice_mut(elem * out_stride..(elem + 1) * out_stride) };
            let cur_u = &u[elem * in_stride..(elem + 1) * in_stride];
            let SharedMemory {
                interp1d,
                grad1d,
                weights,
                buf,
            } = &mut *shared;

            match emode {
                EvalMode::Interp => {
                    stage_input(block_dim, &mut buf[0], cur_u);
                    block_chain(block_dim, geometry, in_stride, &[&interp1d[..]; 3][..dim], buf, cur_v, false);
                }
                EvalMode::Grad => {
                    let nodal_len = basis.nodal_len(1);
                    let slice_len = basis.ncomp() * basis.num_qpts();
                    if tmode == TransposeMode::Transpose {
                        for_each_thread(block_dim, cur_v.len(), |k| cur_v[k] = T::zero());
                    }
                    for p in 0..dim {
                        let mut ops = [&interp1d[..]; 3];
                        ops[p] = &grad1d[..];
                        match tmode {
                            TransposeMode::NoTranspose => {
                                stage_input(block_dim, &mut buf[0], cur_u);
                                let out = &mut cur_v[p * slice_len..(p + 1) * slice_len];
                                block_chain(block_dim, geometry, nodal_len, &ops[..dim], buf, out, false);
                            }
                            TransposeMode::Transpose => {
                                stage_input(block_dim, &mut buf[0], &cur_u[p * slice_len..(p + 1) * slice_len]);
                                block_chain(block_dim, geometry, slice_len, &ops[..dim], buf, cur_v, true);
                            }
                        }
                    }
                }
                EvalMode::Weight => {
                    for_each_thread(block_dim, cur_v.len(), |k| cur_v[k] = weights[k]);
                }
                EvalMode::None | EvalMode::Div | EvalMode::Curl => {}
            }
        }
    }
}

/// Copy element input into the first block-shared buffer.
fn stage_input<T: Real>(block_dim: usize, buf: &mut [T], input: &[T]) {
    for_each_thread(block_dim, input.len(), |k| buf[k] = input[k]);
}

impl<T: Real> BasisKernel<T> for SharedMemoryBasis<T> {
    fn name(&self) -> &'static str {
        "device"
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
        if nelem == 0 {
            return Ok(());
        }

        let launch = self.launch_config(nelem);
        let v = unsafe { v.create_access() };
        (0..launch.grid_dim)
            .into_par_iter()
            .for_each(|block_idx| self.run_block(launch, block_idx, nelem, tmode, emode, u, &v));
        Ok(())
    }
}

/// Restriction kernel with one device thread per local entry and atomic scatter-add.
#[derive(Debug, Copy, Clone)]
pub struct DeviceRestriction {
    config: DeviceConfig,
}

impl DeviceRestriction {
    fn launch_config(&self, nelem: usize) -> LaunchConfig {
        let block_dim = self.config.block_size;
        let grid_dim = self
            .config
            .grid_size
            .unwrap_or_else(|| (nelem + block_dim - 1) / block_dim)
            .max(1);
        LaunchConfig { grid_dim, block_dim }
    }
}

impl<T: Real> RestrictionKernel<T> for DeviceRestriction {
    fn name(&self) -> &'static str {
        "device"
    }

    fn mem_space(&self) -> MemSpace {
        MemSpace::Device
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
        let launch = self.launch_config(layout.nelem);
        let num_threads = launch.num_threads();
        let esize = layout.local_len();

        match (tmode, indices) {
            (TransposeMode::NoTranspose, _) => {
                let v = unsafe { v.create_access() };
                (0..num_threads).into_par_iter().for_each(|thread| {
                    for i in (thread..esize).step_by(num_threads) {
                        // SAFETY: local entry i is written by exactly one thread
                        unsafe { *v.get_unchecked_mut(i) = u[layout.global_index(indices, lmode, i)] };
                    }
                });
            }
            (TransposeMode::Transpose, Some(_)) => {
                let v = T::atomic_view(v);
                (0..num_threads).into_par_iter().for_each(|thread| {
                    for i in (thread..esize).step_by(num_threads) {
                        T::atomic_add(&v[layout.global_index(indices, lmode, i)], u[i]);
                    }
                });
            }
            (TransposeMode::Transpose, None) => {
                // Strided elements touch pairwise distinct global entries
                let v = unsafe { v.create_access() };
                (0..num_threads).into_par_iter().for_each(|thread| {
                    for i in (thread..esize).step_by(num_threads) {
                        // SAFETY: the map from local to global entries is injective without indices
                        unsafe { *v.get_unchecked_mut(layout.global_index(None, lmode, i)) += u[i] };
                    }
                });
            }
        }
        Ok(())
    }
}
