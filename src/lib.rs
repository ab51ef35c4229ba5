//! Sum-factorized evaluation of tensor-product finite element bases, together with the
//! element restriction operators that gather element-local data from global vectors and
//! scatter it back.
//!
//! The typical pipeline for an operator application is
//!
//! 1. [`ElemRestriction::apply`] in [`TransposeMode::NoTranspose`] to gather element data,
//! 2. [`Basis::apply`] with [`EvalMode::Interp`] or [`EvalMode::Grad`] to obtain values at
//!    quadrature points,
//! 3. a pointwise physics kernel (not part of this crate),
//! 4. [`Basis::apply`] in [`TransposeMode::Transpose`],
//! 5. [`ElemRestriction::apply`] in [`TransposeMode::Transpose`] to scatter-add the result.
//!
//! Every operator is bound to a [`Backend`] at construction. All backends share the same data
//! layout, so results can be compared across backends directly.
use serde::{Deserialize, Serialize};

pub mod backend;
pub mod basis;
pub mod error;
pub mod restriction;
pub mod tensor;
pub mod vector;

pub(crate) mod workspace;

#[cfg(feature = "proptest")]
pub mod proptest;

pub use backend::vectorized::TileKernel;
pub use backend::{Backend, DeviceConfig, DeviceVariant};
pub use basis::{Basis, QuadMode, TensorBasis};
pub use error::{Error, ErrorKind, Result};
pub use restriction::{ElemRestriction, IndexArray, IndexStorage, Request, RestrictionLayout};
pub use vector::{MemSpace, Vector};

pub extern crate nalgebra;
pub extern crate sumfact_quadrature as quadrature;
pub use sumfact_traits::Real;

/// A scalar type supported by every backend.
///
/// Used as a trait alias for the traits required by the generic operators.
pub trait Scalar: Real + TileKernel {}

impl<T> Scalar for T where T: Real + TileKernel {}

/// Whether an operator is applied as is or transposed.
///
/// For restrictions, the same type also selects the layout of the global vector: `NoTranspose`
/// is component-major (`node + ndof * comp`), `Transpose` is interleaved (`ncomp * node + comp`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransposeMode {
    #[default]
    NoTranspose,
    Transpose,
}

/// The quantity a basis evaluates at quadrature points.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalMode {
    None,
    Interp,
    Grad,
    Div,
    Curl,
    Weight,
}
