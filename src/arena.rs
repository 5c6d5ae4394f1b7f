//! Arena of in-flight descriptors indexed by [`RequestToken`].
//!
//! This is the only mutable state a host keeps beyond its configuration. Slots
//! are reused through a free list; each reuse bumps the slot's generation so a
//! stale token never resolves to a newer descriptor.
//!
//! The arena lives on the host thread and is never touched by workers.

use crate::descriptor::{RequestToken, WorkDescriptor};

/// Initial slot capacity.
pub const DEFAULT_ARENA_CAPACITY: usize = 16;

struct Slot {
    generation: u32,
    entry: Option<WorkDescriptor>,
}

pub(crate) struct DescriptorArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl DescriptorArena {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ARENA_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of descriptors currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store a descriptor and return its token.
    pub fn insert(&mut self, descriptor: WorkDescriptor) -> RequestToken {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(descriptor);
            return RequestToken {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(descriptor),
        });
        RequestToken {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, token: RequestToken) -> Option<&WorkDescriptor> {
        self.slots
            .get(token.index as usize)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, token: RequestToken) -> Option<&mut WorkDescriptor> {
        self.slots
            .get_mut(token.index as usize)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Remove and return the descriptor for `token`, if it is still live.
    pub fn remove(&mut self, token: RequestToken) -> Option<WorkDescriptor> {
        let slot = self.slots.get_mut(token.index as usize)?;
        if slot.generation != token.generation {
            return None;
        }
        let descriptor = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(token.index);
        self.len -= 1;
        Some(descriptor)
    }

    /// Remove every live descriptor.
    pub fn drain(&mut self) -> Vec<WorkDescriptor> {
        let mut out = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(descriptor) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                out.push(descriptor);
            }
        }
        self.len = 0;
        out
    }
}

impl Default for DescriptorArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Callback, Job, TaskPhase};

    fn descriptor() -> WorkDescriptor {
        WorkDescriptor::new(&Job::sleep_ms(1), Callback::new(|| {}))
    }

    fn retire(d: WorkDescriptor) {
        d.disarm();
    }

    #[test]
    fn test_insert_and_remove() {
        let mut arena = DescriptorArena::new();
        assert!(arena.is_empty());

        let a = arena.insert(descriptor());
        let b = arena.insert(descriptor());
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);

        retire(arena.remove(a).unwrap());
        assert_eq!(arena.len(), 1);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());

        retire(arena.remove(b).unwrap());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_stale_token_after_reuse() {
        let mut arena = DescriptorArena::new();
        let first = arena.insert(descriptor());
        retire(arena.remove(first).unwrap());

        let second = arena.insert(descriptor());
        // Same slot, new generation
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        assert!(arena.get(first).is_none());
        assert!(arena.remove(first).is_none());
        assert_eq!(arena.len(), 1);

        retire(arena.remove(second).unwrap());
    }

    #[test]
    fn test_double_remove() {
        let mut arena = DescriptorArena::new();
        let token = arena.insert(descriptor());
        retire(arena.remove(token).unwrap());
        assert!(arena.remove(token).is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn test_get_mut_advances_phase() {
        let mut arena = DescriptorArena::new();
        let token = arena.insert(descriptor());
        arena
            .get_mut(token)
            .unwrap()
            .advance(TaskPhase::Submitted)
            .unwrap();
        assert_eq!(arena.get(token).unwrap().phase(), TaskPhase::Submitted);
        retire(arena.remove(token).unwrap());
    }

    #[test]
    fn test_drain() {
        let mut arena = DescriptorArena::new();
        let tokens: Vec<_> = (0..5).map(|_| arena.insert(descriptor())).collect();
        retire(arena.remove(tokens[2]).unwrap());

        let drained = arena.drain();
        assert_eq!(drained.len(), 4);
        assert!(arena.is_empty());
        for token in tokens {
            assert!(arena.get(token).is_none());
        }
        drained.into_iter().for_each(retire);
    }
}
