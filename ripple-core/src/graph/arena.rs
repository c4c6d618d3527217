//! Generational Arena
//!
//! Dependencies, links, subscribers and scopes all live in slab-backed
//! arenas and refer to each other through small copyable keys. A slab slot
//! is reused after removal, so every key also carries the generation the
//! slot had when the key was issued. Looking up a key whose slot has since
//! been freed (and possibly reused) returns `None` instead of aliasing the
//! new occupant.

use std::fmt::Debug;
use std::marker::PhantomData;

use slab::Slab;

/// A typed handle into an [`Arena`].
pub trait ArenaKey: Copy + Eq + Debug {
    /// Build a key from a slot index and generation.
    fn from_parts(index: usize, generation: u32) -> Self;

    /// The slab slot this key points at.
    fn index(self) -> usize;

    /// The generation the slot had when this key was issued.
    fn generation(self) -> u32;
}

/// Declare a generational key type for use with [`Arena`].
macro_rules! arena_key {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name {
            index: u32,
            generation: u32,
        }

        impl $crate::graph::arena::ArenaKey for $name {
            fn from_parts(index: usize, generation: u32) -> Self {
                Self {
                    index: index as u32,
                    generation,
                }
            }

            fn index(self) -> usize {
                self.index as usize
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }
    };
}

pub(crate) use arena_key;

struct Slot<T> {
    generation: u32,
    value: T,
}

/// Slab storage addressed by generational keys.
pub struct Arena<K, T> {
    slots: Slab<Slot<T>>,
    next_generation: u32,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            next_generation: 0,
            _key: PhantomData,
        }
    }

    /// Store a value and return its key.
    pub fn insert(&mut self, value: T) -> K {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let index = self.slots.insert(Slot { generation, value });
        K::from_parts(index, generation)
    }

    /// Look up a live value.
    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .map(|slot| &slot.value)
    }

    /// Look up a live value mutably.
    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .map(|slot| &mut slot.value)
    }

    /// Remove a value, returning it if the key was still live.
    pub fn remove(&mut self, key: K) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        Some(self.slots.remove(key.index()).value)
    }

    /// Whether the key still refers to a live value.
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the arena holds no values.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterate over live keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots
            .iter()
            .map(|(index, slot)| (K::from_parts(index, slot.generation), &slot.value))
    }
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
