//! Index-stable arena with grouped dense storage.
//!
//! Values live in per-group contiguous vectors so they can be streamed to the
//! device without holes. External handles stay valid while other handles are
//! inserted and removed:
//!
//! - `index_map[handle] = (group, slot)` resolves a handle to its storage
//! - `reverse_ids[group][slot] = handle` lets a moved value patch its entry
//! - removal swaps the group's last value into the freed slot
//! - retired handles go on a LIFO free list and are reused first

use crate::util::{Error, Result};

/// External, storage-independent identifier.
pub type Handle = u32;

/// Marker for retired `index_map` entries.
const RETIRED: (u32, u32) = (u32::MAX, u32::MAX);

/// Result of [`SlotArena::remove`].
#[derive(Debug, Clone, PartialEq)]
pub struct Removal<T> {
    pub value: T,
    pub group: usize,
    /// Slot the value occupied.
    pub slot: usize,
    /// Slot whose value was moved into `slot`, if the removed value was not last.
    pub moved_from: Option<usize>,
}

/// Grouped arena with stable handles.
#[derive(Debug, Clone)]
pub struct SlotArena<T> {
    kind: &'static str,
    groups: Vec<Vec<T>>,
    reverse_ids: Vec<Vec<Handle>>,
    index_map: Vec<(u32, u32)>,
    free_ids: Vec<Handle>,
}

impl<T> SlotArena<T> {
    /// Create an arena with `num_groups` empty groups.
    ///
    /// `kind` names the handle type in error messages.
    pub fn new(kind: &'static str, num_groups: usize) -> Self {
        Self {
            kind,
            groups: (0..num_groups).map(|_| Vec::new()).collect(),
            reverse_ids: (0..num_groups).map(|_| Vec::new()).collect(),
            index_map: Vec::new(),
            free_ids: Vec::new(),
        }
    }

    /// Insert into `group`, returning a handle. O(1) amortized.
    pub fn insert(&mut self, group: usize, value: T) -> Result<Handle> {
        let count = self.groups.len();
        let (values, reverse) = match (self.groups.get_mut(group), self.reverse_ids.get_mut(group)) {
            (Some(v), Some(r)) => (v, r),
            _ => return Err(Error::OutOfRange { what: "group", index: group, count }),
        };
        let slot = values.len() as u32;
        values.push(value);

        let handle = match self.free_ids.pop() {
            Some(id) => {
                self.index_map[id as usize] = (group as u32, slot);
                id
            }
            None => {
                self.index_map.push((group as u32, slot));
                (self.index_map.len() - 1) as Handle
            }
        };
        reverse.push(handle);
        Ok(handle)
    }

    /// Remove a live handle. O(1).
    pub fn remove(&mut self, handle: Handle) -> Result<Removal<T>> {
        let (group, slot) = self.locate(handle)?;
        let values = &mut self.groups[group];
        let reverse = &mut self.reverse_ids[group];
        let last = values.len() - 1;

        let value = values.swap_remove(slot);
        reverse.swap_remove(slot);
        let moved_from = if slot != last {
            let moved = reverse[slot];
            self.index_map[moved as usize].1 = slot as u32;
            Some(last)
        } else {
            None
        };

        self.index_map[handle as usize] = RETIRED;
        self.free_ids.push(handle);
        Ok(Removal { value, group, slot, moved_from })
    }

    /// Resolve a handle to `(group, slot)`.
    pub fn locate(&self, handle: Handle) -> Result<(usize, usize)> {
        match self.index_map.get(handle as usize) {
            Some(&(g, s)) if (g, s) != RETIRED => Ok((g as usize, s as usize)),
            _ => Err(Error::InvalidHandle { kind: self.kind, id: handle }),
        }
    }

    pub fn get(&self, handle: Handle) -> Result<&T> {
        let (g, s) = self.locate(handle)?;
        Ok(&self.groups[g][s])
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        let (g, s) = self.locate(handle)?;
        Ok(&mut self.groups[g][s])
    }

    #[inline]
    pub fn is_live(&self, handle: Handle) -> bool {
        self.locate(handle).is_ok()
    }

    /// Dense values of one group.
    #[inline]
    pub fn group(&self, group: usize) -> &[T] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Handles of one group, parallel to [`SlotArena::group`].
    #[inline]
    pub fn group_handles(&self, group: usize) -> &[Handle] {
        self.reverse_ids.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Number of live values across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live `(handle, value)` pairs, group by group in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.groups
            .iter()
            .zip(&self.reverse_ids)
            .flat_map(|(values, ids)| ids.iter().copied().zip(values.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Small deterministic generator for property-style tests.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }
    }

    #[test]
    fn test_insert_remove_basic() {
        let mut arena = SlotArena::new("instance", 2);
        let a = arena.insert(0, 'a').unwrap();
        let b = arena.insert(0, 'b').unwrap();
        let c = arena.insert(1, 'c').unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(arena.len(), 3);

        let removal = arena.remove(a).unwrap();
        assert_eq!(removal.value, 'a');
        assert_eq!(removal.slot, 0);
        assert_eq!(removal.moved_from, Some(1));
        // b moved into slot 0 and still resolves
        assert_eq!(arena.locate(b).unwrap(), (0, 0));
        assert_eq!(*arena.get(b).unwrap(), 'b');
        assert_eq!(arena.group(0), &['b']);
        assert_eq!(arena.group_handles(0), &[b]);
    }

    #[test]
    fn test_remove_last_moves_nothing() {
        let mut arena = SlotArena::new("light", 1);
        let a = arena.insert(0, 1).unwrap();
        let b = arena.insert(0, 2).unwrap();
        let removal = arena.remove(b).unwrap();
        assert_eq!(removal.moved_from, None);
        assert_eq!(*arena.get(a).unwrap(), 1);

        // removing the sole element leaves an addressable empty group
        arena.remove(a).unwrap();
        assert!(arena.group(0).is_empty());
        let c = arena.insert(0, 3).unwrap();
        assert_eq!(arena.locate(c).unwrap(), (0, 0));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut arena = SlotArena::new("instance", 1);
        let ids: Vec<Handle> = (0..5).map(|i| arena.insert(0, i).unwrap()).collect();
        arena.remove(ids[1]).unwrap();
        arena.remove(ids[3]).unwrap();
        arena.remove(ids[0]).unwrap();
        assert_eq!(arena.insert(0, 10).unwrap(), ids[0]);
        assert_eq!(arena.insert(0, 11).unwrap(), ids[3]);
        assert_eq!(arena.insert(0, 12).unwrap(), ids[1]);
        assert_eq!(arena.insert(0, 13).unwrap(), 5);
    }

    #[test]
    fn test_invalid_handles() {
        let mut arena: SlotArena<u8> = SlotArena::new("instance", 1);
        assert!(matches!(arena.remove(0), Err(Error::InvalidHandle { kind: "instance", id: 0 })));
        let h = arena.insert(0, 1).unwrap();
        arena.remove(h).unwrap();
        assert!(arena.remove(h).is_err());
        assert!(arena.get(h).is_err());
        assert!(!arena.is_live(h));
        assert!(matches!(arena.insert(4, 1), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn test_random_churn_keeps_mapping() {
        let groups = 4;
        let mut arena = SlotArena::new("instance", groups);
        let mut model: HashMap<Handle, (usize, u64)> = HashMap::new();
        let mut rng = Lcg(7);

        for step in 0..1500u64 {
            let roll = rng.next() % 10;
            if roll < 6 || model.is_empty() {
                let g = (rng.next() % groups as u64) as usize;
                let h = arena.insert(g, step).unwrap();
                assert!(model.insert(h, (g, step)).is_none(), "live handle reissued");
            } else if roll < 9 {
                let keys: Vec<Handle> = model.keys().copied().collect();
                let h = keys[(rng.next() as usize) % keys.len()];
                let removal = arena.remove(h).unwrap();
                let (g, v) = model.remove(&h).unwrap();
                assert_eq!((removal.group, removal.value), (g, v));
            } else {
                let keys: Vec<Handle> = model.keys().copied().collect();
                let h = keys[(rng.next() as usize) % keys.len()];
                *arena.get_mut(h).unwrap() = step;
                model.get_mut(&h).unwrap().1 = step;
            }

            // every live handle resolves to its latest value
            for (&h, &(g, v)) in &model {
                let (ag, slot) = arena.locate(h).unwrap();
                assert_eq!(ag, g);
                assert_eq!(arena.group(g)[slot], v);
                assert_eq!(arena.group_handles(g)[slot], h);
            }
            // groups stay dense: exactly as many values as live handles
            for g in 0..groups {
                let live = model.values().filter(|(mg, _)| *mg == g).count();
                assert_eq!(arena.group(g).len(), live);
            }
        }
        assert_eq!(arena.len(), model.len());
        assert_eq!(arena.iter().count(), model.len());
    }
}
