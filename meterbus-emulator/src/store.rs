//! Per-device holding register storage.
//!
//! Every unit id owns a dense, zero-initialised address space behind its own
//! `RwLock`. A single write, or a whole batch, is applied under one lock
//! acquisition, so a concurrent read never sees half of it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Errors raised by register access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{count} registers at {address} exceed the address space of {size}")]
    OutOfRange {
        address: u16,
        count: usize,
        size: usize,
    },

    #[error("Unknown unit id {0}")]
    NotFound(u8),
}

impl StoreError {
    /// First address of the rejected range, if the error is range related.
    pub fn address(&self) -> Option<u16> {
        match self {
            StoreError::OutOfRange { address, .. } => Some(*address),
            StoreError::NotFound(_) => None,
        }
    }
}

/// Holding registers for a set of unit ids.
///
/// Cloning is cheap and shares the underlying storage.
#[derive(Debug, Clone)]
pub struct RegisterStore {
    spaces: Arc<HashMap<u8, RwLock<Vec<u16>>>>,
    size: usize,
}

impl RegisterStore {
    /// Create a zeroed space of `size` registers for every unit id.
    pub fn new(unit_ids: &[u8], size: usize) -> Self {
        let spaces = unit_ids
            .iter()
            .map(|id| (*id, RwLock::new(vec![0u16; size])))
            .collect();

        Self {
            spaces: Arc::new(spaces),
            size,
        }
    }

    /// Number of registers per unit id.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Configured unit ids, ascending.
    pub fn unit_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.spaces.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, unit_id: u8) -> bool {
        self.spaces.contains_key(&unit_id)
    }

    /// Replace the registers starting at `address` with `words`.
    pub fn write(&self, unit_id: u8, address: u16, words: &[u16]) -> Result<(), StoreError> {
        let space = self.space(unit_id)?;
        let range = self.range(address, words.len())?;

        space.write()[range].copy_from_slice(words);
        Ok(())
    }

    /// Apply several writes as one unit.
    ///
    /// Every range is checked before anything is written; on error the space
    /// is left untouched.
    pub fn write_batch<W: AsRef<[u16]>>(
        &self,
        unit_id: u8,
        writes: &[(u16, W)],
    ) -> Result<(), StoreError> {
        let space = self.space(unit_id)?;
        let ranges = writes
            .iter()
            .map(|(address, words)| self.range(*address, words.as_ref().len()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut registers = space.write();
        for (range, (_, words)) in ranges.into_iter().zip(writes) {
            registers[range].copy_from_slice(words.as_ref());
        }
        Ok(())
    }

    /// Copy `count` registers starting at `address`.
    pub fn read(&self, unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>, StoreError> {
        let space = self.space(unit_id)?;
        let range = self.range(address, count as usize)?;

        Ok(space.read()[range].to_vec())
    }

    fn space(&self, unit_id: u8) -> Result<&RwLock<Vec<u16>>, StoreError> {
        self.spaces
            .get(&unit_id)
            .ok_or(StoreError::NotFound(unit_id))
    }

    fn range(&self, address: u16, count: usize) -> Result<std::ops::Range<usize>, StoreError> {
        let start = address as usize;
        let end = start + count;
        if end > self.size {
            return Err(StoreError::OutOfRange {
                address,
                count,
                size: self.size,
            });
        }
        Ok(start..end)
    }
}
