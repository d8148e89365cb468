// SPDX-License-Identifier: CEPL-1.0
//! Index arena with a free list. Handles carry a generation so a handle to a removed value
//! never reaches the value that later reuses its slot.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Slots<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> SlotId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SlotId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SlotId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Takes the value out; the slot goes on the free list under a new generation.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|s| s.value.as_ref())
    }

    /// Empties the arena, yielding every live value.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.slots.drain(..).filter_map(|s| s.value)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_cycles_reuse_the_same_slot() {
        let mut slots = Slots::new();
        let keep = slots.insert("default");
        for i in 0..100 {
            let id = slots.insert("textured");
            assert_eq!(slots.len(), 2);
            assert_eq!(slots.remove(id), Some("textured"), "cycle {i}");
        }
        assert_eq!(slots.capacity(), 2);
        assert_eq!(slots.get(keep), Some(&"default"));
    }

    #[test]
    fn stale_handle_misses_the_reused_slot() {
        let mut slots = Slots::new();
        let old = slots.insert(1);
        slots.remove(old);
        let new = slots.insert(2);
        assert_eq!(old.index(), new.index());
        assert_eq!(slots.get(old), None);
        assert_eq!(slots.remove(old), None);
        assert_eq!(slots.get(new), Some(&2));
    }

    #[test]
    fn double_remove_is_a_no_op() {
        let mut slots = Slots::new();
        let id = slots.insert('a');
        assert_eq!(slots.remove(id), Some('a'));
        assert_eq!(slots.remove(id), None);
        assert!(slots.is_empty());
        assert_eq!(slots.insert('b').index(), id.index());
    }

    #[test]
    fn drain_yields_only_live_values() {
        let mut slots = Slots::new();
        let a = slots.insert(1);
        slots.insert(2);
        slots.remove(a);
        let mut live: Vec<i32> = slots.drain().collect();
        live.sort();
        assert_eq!(live, vec![2]);
        assert_eq!(slots.capacity(), 0);
    }
}
