// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Generation-tagged slot storage.
//!
//! Every entry is addressed by a [`SlotKey`] made of a slot index and the
//! generation the slot had when the entry was inserted. Removing an entry
//! bumps the generation, so a key that outlives its entry never matches a
//! later occupant of the same slot.

use std::{fmt, num::NonZeroU32};

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: u32,
    generation: NonZeroU32,
}

impl SlotKey {
    /// Packs the key into a non-zero `u64`. Zero is reserved for "null".
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation.get()) << 32) | (u64::from(self.index) + 1)
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        let low = (raw & 0xffff_ffff) as u32;
        let generation = NonZeroU32::new((raw >> 32) as u32)?;
        let index = low.checked_sub(1)?;
        Some(Self { index, generation })
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation.get()
    }
}

impl fmt::Debug for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: NonZeroU32,
    value: Option<T>,
}

pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> SlotKey {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SlotKey {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: NonZeroU32::MIN,
            value: Some(value),
        });
        SlotKey {
            index,
            generation: NonZeroU32::MIN,
        }
    }

    pub fn get(&self, key: SlotKey) -> Option<&T> {
        match self.slots.get(key.index as usize) {
            Some(slot) if slot.generation == key.generation => slot.value.as_ref(),
            _ => None,
        }
    }

    /// Removes the entry for `key`, retiring the key for good.
    ///
    /// Returns `None` when the key is stale or was never issued.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.len -= 1;

        // A slot whose generation would wrap is never reused.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(key.index);
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_key_misses_reused_slot() {
        let mut table = SlotTable::new();
        let a = table.insert("a");
        assert_eq!(table.remove(a), Some("a"));

        let b = table.insert("b");
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(table.get(a), None);
        assert_eq!(table.remove(a), None);
        assert_eq!(table.get(b), Some(&"b"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn raw_keys() {
        let mut table = SlotTable::new();
        let key = table.insert(7u8);
        let raw = key.to_raw();
        assert_ne!(raw, 0);
        assert_eq!(SlotKey::from_raw(raw), Some(key));
        assert_eq!(SlotKey::from_raw(0), None);
        assert_eq!(SlotKey::from_raw(1), None);
    }

    #[test]
    fn double_remove() {
        let mut table = SlotTable::new();
        let key = table.insert(1);
        assert!(table.remove(key).is_some());
        assert!(table.remove(key).is_none());
        assert!(table.is_empty());
    }
}
