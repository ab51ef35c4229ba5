//! Error types for basis and restriction operations.
use crate::vector::MemSpace;
use crate::EvalMode;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Library-wide error type.
///
/// Every fallible operation reports its failure to the immediate caller. Nothing is retried,
/// and a failed precondition aborts the call before any output is written.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The evaluation mode cannot be applied by the given kernel.
    UnsupportedEvalMode { emode: EvalMode, kernel: &'static str },
    /// The evaluation mode is only defined in the forward direction.
    IncompatibleTranspose { emode: EvalMode },
    /// A contraction shape is not a multiple of the SIMD tile.
    TileMismatch {
        shape: [usize; 3],
        j: usize,
        tile: [usize; 2],
    },
    /// The number of elements per call is not one that the kernel can tile.
    UnsupportedBatch { nelem: usize, supported: &'static [usize] },
    /// Data was requested in a memory space it has not been materialized in.
    UnsupportedMemSpace { mem: MemSpace, what: &'static str },
    /// The backend configuration cannot handle the requested operator.
    UnsupportedConfig(String),
    /// A buffer does not have the length implied by the operator.
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The basis data is inconsistent or degenerate.
    InvalidBasis(String),
    /// The restriction data is inconsistent.
    InvalidRestriction(String),
    /// An execution resource failed.
    Backend(String),
}

/// Coarse classification of [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested combination of operator, mode and backend is not supported.
    Configuration,
    /// The caller passed data that violates the operator's contract.
    Precondition,
    /// The execution resource itself failed.
    Backend,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedEvalMode { .. }
            | Self::IncompatibleTranspose { .. }
            | Self::TileMismatch { .. }
            | Self::UnsupportedBatch { .. }
            | Self::UnsupportedMemSpace { .. }
            | Self::UnsupportedConfig(_) => ErrorKind::Configuration,
            Self::DimensionMismatch { .. } | Self::InvalidBasis(_) | Self::InvalidRestriction(_) => {
                ErrorKind::Precondition
            }
            Self::Backend(_) => ErrorKind::Backend,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedEvalMode { emode, kernel } => {
                write!(f, "Evaluation mode {:?} is not supported by the {} kernel", emode, kernel)
            }
            Self::IncompatibleTranspose { emode } => {
                write!(f, "Evaluation mode {:?} cannot be applied in transpose mode", emode)
            }
            Self::TileMismatch { shape, j, tile } => {
                let [a, b, c] = shape;
                write!(
                    f,
                    "Contraction of shape [{a}, {b}, {c}] to J = {j} does not fit the {}x{} tile \
                     (J must be a multiple of {} and C a multiple of {})",
                    tile[0], tile[1], tile[0], tile[1]
                )
            }
            Self::UnsupportedBatch { nelem, supported } => {
                write!(f, "Cannot apply to {} elements at once (supported: {:?})", nelem, supported)
            }
            Self::UnsupportedMemSpace { mem, what } => {
                write!(f, "{} is not available in memory space {:?}", what, mem)
            }
            Self::UnsupportedConfig(msg) => write!(f, "Unsupported configuration: {}", msg),
            Self::DimensionMismatch { what, expected, actual } => {
                write!(f, "{} has length {}, expected {}", what, actual, expected)
            }
            Self::InvalidBasis(msg) => write!(f, "Invalid basis: {}", msg),
            Self::InvalidRestriction(msg) => write!(f, "Invalid restriction: {}", msg),
            Self::Backend(msg) => write!(f, "Backend failure: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Check that a buffer has exactly the expected length.
pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { what, expected, actual })
    }
}
