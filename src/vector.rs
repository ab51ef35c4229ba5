//! Vectors with mirrors in host and device memory.
//!
//! Operators access a [`Vector`] through guards that are scoped to a single call. Reading
//! from a memory space first synchronizes that space from the most recently written one,
//! writing marks the written space as the only valid one once the guard is released.
use crate::Real;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Address space that data lives in.
///
/// Device memory is emulated with a separate host allocation. Copies between the two spaces
/// happen lazily, exactly when data is requested in a space holding a stale copy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemSpace {
    #[default]
    Host,
    Device,
}

impl MemSpace {
    fn index(self) -> usize {
        match self {
            Self::Host => 0,
            Self::Device => 1,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Host => Self::Device,
            Self::Device => Self::Host,
        }
    }
}

#[derive(Debug)]
struct Mirrors<T> {
    spaces: [Vec<T>; 2],
    valid: [bool; 2],
}

impl<T: Real> Mirrors<T> {
    fn sync(&mut self, mem: MemSpace) {
        let dst = mem.index();
        let src = mem.other().index();
        if !self.valid[dst] {
            debug_assert!(self.valid[src], "at least one memory space must hold valid data");
            let [host, device] = &mut self.spaces;
            let (from, to) = if src == 0 { (&*host, device) } else { (&*device, host) };
            to.clone_from(from);
            self.valid[dst] = true;
        }
    }
}

/// A vector of scalars with a host and a device mirror.
#[derive(Debug)]
pub struct Vector<T> {
    len: usize,
    state: RwLock<Mirrors<T>>,
}

impl<T: Real> Vector<T> {
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            len: values.len(),
            state: RwLock::new(Mirrors {
                spaces: [values, Vec::new()],
                valid: [true, false],
            }),
        }
    }

    pub fn from_slice(values: &[T]) -> Self {
        Self::from_vec(values.to_vec())
    }

    pub fn zeros(len: usize) -> Self {
        Self::from_vec(vec![T::zero(); len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the given memory space currently holds an up-to-date copy.
    pub fn is_valid(&self, mem: MemSpace) -> bool {
        self.state.read().valid[mem.index()]
    }

    /// Read access to the data in the given memory space.
    ///
    /// Copies the data into `mem` first if that mirror is stale.
    pub fn read(&self, mem: MemSpace) -> MappedRwLockReadGuard<'_, [T]> {
        {
            let state = self.state.upgradable_read();
            if !state.valid[mem.index()] {
                RwLockUpgradableReadGuard::upgrade(state).sync(mem);
            }
        }
        RwLockReadGuard::map(self.state.read(), |state| state.spaces[mem.index()].as_slice())
    }

    /// Write access to the data in the given memory space.
    ///
    /// The guard exposes the current contents (synchronized if necessary), and marks all other
    /// mirrors stale when it is dropped.
    pub fn write(&mut self, mem: MemSpace) -> VectorWriteGuard<'_, T> {
        let state = self.state.get_mut();
        state.sync(mem);
        VectorWriteGuard { state, mem }
    }

    /// Copy the data to a new `Vec`, read from host memory.
    pub fn to_vec(&self) -> Vec<T> {
        self.read(MemSpace::Host).to_vec()
    }

    /// Set every entry to `value`.
    pub fn set_value(&mut self, value: T) {
        self.write(MemSpace::Host).fill(value);
    }
}

impl<T: Real> From<Vec<T>> for Vector<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

/// Scoped write access to one memory space of a [`Vector`].
#[derive(Debug)]
pub struct VectorWriteGuard<'a, T> {
    state: &'a mut Mirrors<T>,
    mem: MemSpace,
}

impl<'a, T> Deref for VectorWriteGuard<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.state.spaces[self.mem.index()]
    }
}

impl<'a, T> DerefMut for VectorWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.state.spaces[self.mem.index()]
    }
}

impl<'a, T> Drop for VectorWriteGuard<'a, T> {
    fn drop(&mut self) {
        self.state.valid[self.mem.index()] = true;
        self.state.valid[self.mem.other().index()] = false;
    }
}
