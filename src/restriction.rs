//! Element restriction: gather from global vectors into element-local buffers, and
//! scatter-add back.
//!
//! The local buffer of a restriction holds `nelem * ncomp * elemsize` values ordered by element,
//! then component, then node. Entry `i` therefore belongs to element
//! `e = i / (ncomp * elemsize)`, component `d = (i / elemsize) % ncomp` and local node
//! `s = i % elemsize`. The global vector holds `ndof * ncomp` values, either component-major
//! (`node + ndof * d`, selected by [`TransposeMode::NoTranspose`]) or interleaved
//! (`ncomp * node + d`, selected by [`TransposeMode::Transpose`]).
use crate::backend::Backend;
use crate::error::{check_len, Error, Result};
use crate::vector::{MemSpace, Vector};
use crate::{Scalar, TransposeMode};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Sizes of an element restriction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestrictionLayout {
    pub nelem: usize,
    pub elemsize: usize,
    pub ncomp: usize,
    pub ndof: usize,
}

impl RestrictionLayout {
    pub fn new(nelem: usize, elemsize: usize, ncomp: usize, ndof: usize) -> Self {
        Self {
            nelem,
            elemsize,
            ncomp,
            ndof,
        }
    }

    /// Length of the element-local buffer.
    pub fn local_len(&self) -> usize {
        self.nelem * self.ncomp * self.elemsize
    }

    /// Length of the global vector.
    pub fn global_len(&self) -> usize {
        self.ndof * self.ncomp
    }

    /// Split a local index into `(element, component, node)`.
    #[inline]
    pub fn decompose(&self, i: usize) -> (usize, usize, usize) {
        let e = i / (self.ncomp * self.elemsize);
        let d = (i / self.elemsize) % self.ncomp;
        let s = i % self.elemsize;
        (e, d, s)
    }

    /// Position in the global vector that local entry `i` is connected to.
    #[inline]
    pub fn global_index(&self, indices: Option<&[usize]>, lmode: TransposeMode, i: usize) -> usize {
        let (e, d, s) = self.decompose(i);
        let node = match indices {
            Some(indices) => indices[s + self.elemsize * e],
            None => s + self.elemsize * e,
        };
        match lmode {
            TransposeMode::NoTranspose => node + self.ndof * d,
            TransposeMode::Transpose => self.ncomp * node + d,
        }
    }
}

/// Index data handed to [`ElemRestriction::create`], together with the desired ownership.
#[derive(Debug)]
pub enum IndexArray<'a> {
    /// Copy the indices into storage private to the restriction.
    Copy(&'a [usize]),
    /// Borrow the indices for the lifetime of the restriction.
    Use(&'a [usize]),
    /// Transfer ownership of the indices to the restriction.
    Own(Vec<usize>),
}

impl<'a> IndexArray<'a> {
    pub fn as_slice(&self) -> &[usize] {
        match self {
            Self::Copy(indices) | Self::Use(indices) => indices,
            Self::Own(indices) => indices,
        }
    }
}

/// Index storage of a restriction, tagged with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStorage<'a> {
    Owned(Vec<usize>),
    Borrowed(&'a [usize]),
    Copied(Vec<usize>),
}

impl<'a> IndexStorage<'a> {
    pub fn as_slice(&self) -> &[usize] {
        match self {
            Self::Owned(indices) | Self::Copied(indices) => indices,
            Self::Borrowed(indices) => indices,
        }
    }
}

impl<'a> From<IndexArray<'a>> for IndexStorage<'a> {
    fn from(array: IndexArray<'a>) -> Self {
        match array {
            IndexArray::Copy(indices) => Self::Copied(indices.to_vec()),
            IndexArray::Use(indices) => Self::Borrowed(indices),
            IndexArray::Own(indices) => Self::Owned(indices),
        }
    }
}

/// Completion token for restriction applications.
///
/// All applications complete before returning, so a request passed to
/// [`ElemRestriction::apply`] is always set to [`Request::Complete`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Request {
    #[default]
    Pending,
    Complete,
}

/// The computational kernel behind an [`ElemRestriction`].
pub trait RestrictionKernel<T>: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Memory space that the kernel reads its vectors and indices from.
    fn mem_space(&self) -> MemSpace;

    /// Gather (`tmode = NoTranspose`) or scatter-add (`tmode = Transpose`).
    ///
    /// Scatter accumulates into the existing contents of `v`.
    fn apply(
        &self,
        layout: &RestrictionLayout,
        indices: Option<&[usize]>,
        tmode: TransposeMode,
        lmode: TransposeMode,
        u: &[T],
        v: &mut [T],
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct IndexMirrors<'a> {
    host: Option<IndexStorage<'a>>,
    device: Option<IndexStorage<'a>>,
}

impl<'a> IndexMirrors<'a> {
    fn get(&self, mem: MemSpace) -> Option<&[usize]> {
        match mem {
            MemSpace::Host => self.host.as_ref().map(IndexStorage::as_slice),
            MemSpace::Device => self.device.as_ref().map(IndexStorage::as_slice),
        }
    }
}

/// Restriction between a global vector and element-local buffers.
#[derive(Debug)]
pub struct ElemRestriction<'a, T> {
    layout: RestrictionLayout,
    backend: Backend,
    indices: Option<IndexMirrors<'a>>,
    kernel: Box<dyn RestrictionKernel<T>>,
}

impl<'a, T: Scalar> ElemRestriction<'a, T> {
    /// Create a restriction from an index array residing in memory space `mem`.
    ///
    /// The indices are materialized in the memory space of the backend, copying them there if
    /// they are given in a different space. Host-only backends reject device indices.
    pub fn create(backend: Backend, layout: RestrictionLayout, mem: MemSpace, indices: IndexArray<'a>) -> Result<Self> {
        validate_layout(&layout)?;
        check_len("restriction indices", layout.nelem * layout.elemsize, indices.as_slice().len())?;
        if let Some(&idx) = indices.as_slice().iter().find(|&&idx| idx >= layout.ndof) {
            return Err(Error::InvalidRestriction(format!(
                "index {} out of bounds for {} degrees of freedom",
                idx, layout.ndof
            )));
        }

        let storage = IndexStorage::from(indices);
        let mirrors = match (mem, backend.mem_space()) {
            (MemSpace::Host, MemSpace::Host) => IndexMirrors {
                host: Some(storage),
                device: None,
            },
            (MemSpace::Host, MemSpace::Device) => IndexMirrors {
                device: Some(IndexStorage::Copied(storage.as_slice().to_vec())),
                host: Some(storage),
            },
            (MemSpace::Device, MemSpace::Device) => IndexMirrors {
                host: None,
                device: Some(storage),
            },
            (MemSpace::Device, MemSpace::Host) => {
                return Err(Error::UnsupportedMemSpace {
                    mem,
                    what: "restriction indices for a host backend",
                })
            }
        };

        let kernel = backend.restriction_kernel(&layout, mirrors.get(backend.mem_space()))?;
        debug!(
            "Created restriction (nelem = {}, elemsize = {}, ncomp = {}, ndof = {}) with {} kernel",
            layout.nelem,
            layout.elemsize,
            layout.ncomp,
            layout.ndof,
            kernel.name()
        );
        Ok(Self {
            layout,
            backend,
            indices: Some(mirrors),
            kernel,
        })
    }

    /// Create a restriction without indices, where element `e` covers the nodes
    /// `e * elemsize .. (e + 1) * elemsize`.
    pub fn create_strided(backend: Backend, layout: RestrictionLayout) -> Result<Self> {
        validate_layout(&layout)?;
        if layout.nelem * layout.elemsize > layout.ndof {
            return Err(Error::InvalidRestriction(format!(
                "{} elements of size {} do not fit into {} degrees of freedom",
                layout.nelem, layout.elemsize, layout.ndof
            )));
        }
        let kernel = backend.restriction_kernel(&layout, None)?;
        debug!("Created strided restriction {:?} with {} kernel", layout, kernel.name());
        Ok(Self {
            layout,
            backend,
            indices: None,
            kernel,
        })
    }

    pub fn layout(&self) -> &RestrictionLayout {
        &self.layout
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The index array as materialized in `mem`, or `None` for a strided restriction.
    pub fn indices(&self, mem: MemSpace) -> Result<Option<&[usize]>> {
        match &self.indices {
            None => Ok(None),
            Some(mirrors) => mirrors.get(mem).map(Some).ok_or(Error::UnsupportedMemSpace {
                mem,
                what: "restriction indices",
            }),
        }
    }

    /// Apply the restriction, accessing the vectors in the kernel's memory space.
    ///
    /// In [`TransposeMode::NoTranspose`], `u` is the global vector and `v` the local buffer;
    /// in [`TransposeMode::Transpose`], the roles are reversed and the local values are added
    /// to `v`. `lmode` selects the layout of the global vector.
    pub fn apply(
        &self,
        tmode: TransposeMode,
        lmode: TransposeMode,
        u: &Vector<T>,
        v: &mut Vector<T>,
        request: Option<&mut Request>,
    ) -> Result<()> {
        let mem = self.kernel.mem_space();
        let u = u.read(mem);
        let mut v = v.write(mem);
        self.apply_slices(tmode, lmode, &u, &mut v, request)
    }

    pub fn apply_slices(
        &self,
        tmode: TransposeMode,
        lmode: TransposeMode,
        u: &[T],
        v: &mut [T],
        request: Option<&mut Request>,
    ) -> Result<()> {
        let (u_len, v_len) = match tmode {
            TransposeMode::NoTranspose => (self.layout.global_len(), self.layout.local_len()),
            TransposeMode::Transpose => (self.layout.local_len(), self.layout.global_len()),
        };
        check_len("restriction input", u_len, u.len())?;
        check_len("restriction output", v_len, v.len())?;
        let indices = self.indices(self.kernel.mem_space())?;

        trace!(
            "Applying restriction: kernel = {}, tmode = {:?}, lmode = {:?}",
            self.kernel.name(),
            tmode,
            lmode
        );
        self.kernel.apply(&self.layout, indices, tmode, lmode, u, v)?;

        if let Some(request) = request {
            *request = Request::Complete;
        }
        Ok(())
    }
}

fn validate_layout(layout: &RestrictionLayout) -> Result<()> {
    if layout.elemsize == 0 || layout.ncomp == 0 {
        Err(Error::InvalidRestriction(format!(
            "elemsize and ncomp must be positive, got elemsize = {}, ncomp = {}",
            layout.elemsize, layout.ncomp
        )))
    } else {
        Ok(())
    }
}
