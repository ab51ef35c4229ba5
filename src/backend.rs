//! Execution strategies for bases and restrictions.
//!
//! A [`Backend`] is chosen once, when an operator is constructed. It determines which kernel
//! the operator holds and which memory space its vectors are accessed in.
use crate::basis::{BasisKernel, TensorBasis};
use crate::error::{Error, Result};
use crate::restriction::{RestrictionKernel, RestrictionLayout};
use crate::vector::MemSpace;
use crate::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

pub mod device;
pub mod reference;
pub mod vectorized;

/// Kernel variant used by [`Backend::DeviceParallel`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceVariant {
    /// Blocks of threads cooperate on one element at a time, staging data in block-shared
    /// memory.
    #[default]
    SharedMemory,
    /// One lane per element in warps of 32 lanes, with the element tensor held in registers.
    /// Limited to `p1d, q1d <= 8`.
    RegisterBlocked,
}

/// Launch configuration of the device strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of threads per block.
    pub block_size: usize,
    /// Number of blocks in the grid. `None` launches one block per element.
    pub grid_size: Option<usize>,
    pub variant: DeviceVariant,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            block_size: 64,
            grid_size: None,
            variant: DeviceVariant::SharedMemory,
        }
    }
}

impl DeviceConfig {
    pub fn with_variant(self, variant: DeviceVariant) -> Self {
        Self { variant, ..self }
    }

    pub fn with_block_size(self, block_size: usize) -> Self {
        Self { block_size, ..self }
    }

    pub fn with_grid_size(self, grid_size: usize) -> Self {
        Self {
            grid_size: Some(grid_size),
            ..self
        }
    }
}

/// Selects the execution strategy of an operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Backend {
    /// Sequential loops over elements, the baseline all other strategies are compared to.
    #[default]
    Reference,
    /// Block-parallel kernels operating on device memory.
    DeviceParallel(DeviceConfig),
    /// SIMD-blocked host kernels operating on batches of 8 elements.
    VectorizedHost,
}

impl Backend {
    /// The memory space operators of this backend access vectors in.
    pub fn mem_space(&self) -> MemSpace {
        match self {
            Self::Reference | Self::VectorizedHost => MemSpace::Host,
            Self::DeviceParallel(_) => MemSpace::Device,
        }
    }

    /// The resource string that selects this backend.
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Reference => "/cpu/self/ref",
            Self::VectorizedHost => "/cpu/self/opt",
            Self::DeviceParallel(config) => match config.variant {
                DeviceVariant::SharedMemory => "/gpu/cuda/ref",
                DeviceVariant::RegisterBlocked => "/gpu/cuda/reg",
            },
        }
    }

    pub(crate) fn basis_kernel<T: Scalar>(&self, basis: Arc<TensorBasis<T>>) -> Result<Box<dyn BasisKernel<T>>> {
        match self {
            Self::Reference => Ok(Box::new(reference::ReferenceBasis::new(basis))),
            Self::DeviceParallel(config) => device::basis_kernel(config, basis),
            Self::VectorizedHost => Ok(Box::new(vectorized::VectorizedBasis::new(basis)?)),
        }
    }

    /// Create the restriction kernel, given the indices in this backend's memory space.
    pub(crate) fn restriction_kernel<T: Scalar>(
        &self,
        layout: &RestrictionLayout,
        indices: Option<&[usize]>,
    ) -> Result<Box<dyn RestrictionKernel<T>>> {
        match self {
            Self::Reference => Ok(Box::new(reference::ReferenceRestriction)),
            Self::DeviceParallel(config) => device::restriction_kernel(config),
            Self::VectorizedHost => Ok(Box::new(vectorized::VectorizedRestriction::new(layout, indices))),
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource())
    }
}

impl FromStr for Backend {
    type Err = Error;

    /// Parse a resource string such as `/cpu/self/ref`.
    ///
    /// Device resources may carry a device number (`/gpu/cuda/ref:0`), which is ignored since
    /// there is a single emulated device.
    fn from_str(resource: &str) -> Result<Self> {
        let path = resource.split(':').next().unwrap_or(resource);
        match path {
            "/cpu/self" | "/cpu/self/ref" => Ok(Self::Reference),
            "/cpu/self/opt" => Ok(Self::VectorizedHost),
            "/gpu/cuda" | "/gpu/cuda/ref" => Ok(Self::DeviceParallel(DeviceConfig::default())),
            "/gpu/cuda/reg" => Ok(Self::DeviceParallel(
                DeviceConfig::default().with_variant(DeviceVariant::RegisterBlocked),
            )),
            _ => Err(Error::UnsupportedConfig(format!("unknown resource '{}'", resource))),
        }
    }
}
