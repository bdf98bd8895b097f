//! Handle table
//!
//! The module cannot hold host references, so every host object it sees is
//! parked in a slot here and referred to by index. Slots form a slab: a freed
//! slot stores the index of the next free slot, making the free list LIFO.
//!
//! The table is not reference counted. Each handle has exactly one owner, and
//! that owner decides when to release it.

use std::fmt;

/// Slots below this index are never handed out (`0` therefore means "absent")
pub const RESERVED_SLOTS: u32 = 128;

/// Permanent sentinel handles
pub const UNDEFINED: Handle = Handle(RESERVED_SLOTS);
pub const NULL: Handle = Handle(RESERVED_SLOTS + 1);
pub const TRUE: Handle = Handle(RESERVED_SLOTS + 2);
pub const FALSE: Handle = Handle(RESERVED_SLOTS + 3);

/// First handle that can be issued and released
pub const FIRST_DYNAMIC: u32 = RESERVED_SLOTS + 4;

/// Index of a slot in a `HandleTable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    #[inline(always)]
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Sentinels and reserved slots are never released
    pub const fn is_permanent(self) -> bool {
        self.0 < FIRST_DYNAMIC
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

enum Slot<T> {
    Reserved,
    Occupied(T),
    Free { next: u32 },
}

/// Slab of host objects addressed by `Handle`
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    /// Head of the free list; equals `slots.len()` when the list is empty
    next_free: u32,
}

impl<T> HandleTable<T> {
    /// Table with `RESERVED_SLOTS` unusable slots followed by the four sentinels
    /// (`undefined`, `null`, `true`, `false`, in that order)
    pub fn with_sentinels(sentinels: [T; 4]) -> Self {
        let mut slots = Vec::with_capacity(FIRST_DYNAMIC as usize + 32);
        slots.extend((0..RESERVED_SLOTS).map(|_| Slot::Reserved));
        slots.extend(sentinels.into_iter().map(Slot::Occupied));
        HandleTable { next_free: slots.len() as u32, slots }
    }

    /// Park `object` in the first free slot (or a new one)
    pub fn insert(&mut self, object: T) -> Handle {
        if self.next_free as usize == self.slots.len() {
            self.slots.push(Slot::Free { next: self.next_free + 1 });
        }
        let idx = self.next_free;
        self.next_free = match self.slots[idx as usize] {
            Slot::Free { next } => next,
            _ => panic!("handle table free list corrupted at slot {}", idx),
        };
        self.slots[idx as usize] = Slot::Occupied(object);
        Handle(idx)
    }

    pub fn try_get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(object)) => Some(object),
            _ => None,
        }
    }

    /// Borrow the object behind `handle`
    ///
    /// # Panics
    /// On a freed, reserved or out-of-range handle. Holding such a handle is a
    /// bug in the caller's ownership discipline, not a recoverable condition.
    pub fn get(&self, handle: Handle) -> &T {
        match self.try_get(handle) {
            Some(object) => object,
            None => panic!("invalid handle {}: slot is not occupied", handle),
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut T {
        match self.slots.get_mut(handle.0 as usize) {
            Some(Slot::Occupied(object)) => object,
            _ => panic!("invalid handle {}: slot is not occupied", handle),
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.try_get(handle).is_some()
    }

    /// Return the slot to the free list, dropping the object
    ///
    /// Permanent handles are ignored.
    ///
    /// # Panics
    /// On a slot that is not occupied (double release).
    pub fn release(&mut self, handle: Handle) {
        let _ = self.remove(handle);
    }

    /// `get` followed by `release`, moving the object out
    ///
    /// For permanent handles this returns `None` and leaves the slot alone.
    pub fn take(&mut self, handle: Handle) -> Option<T> {
        self.remove(handle)
    }

    fn remove(&mut self, handle: Handle) -> Option<T> {
        if handle.is_permanent() {
            return None;
        }
        let idx = handle.0 as usize;
        if !matches!(self.slots.get(idx), Some(Slot::Occupied(_))) {
            panic!("invalid handle {}: released twice or never issued", handle);
        }
        let freed = std::mem::replace(&mut self.slots[idx], Slot::Free { next: self.next_free });
        self.next_free = handle.0;
        match freed {
            Slot::Occupied(object) => Some(object),
            _ => None,
        }
    }

    /// Number of live, releasable handles
    pub fn live(&self) -> usize {
        self.slots[FIRST_DYNAMIC as usize..]
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count()
    }

    /// Total slots, including reserved ones and free ones
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn table() -> HandleTable<Rc<str>> {
        HandleTable::with_sentinels(["undefined".into(), "null".into(), "true".into(), "false".into()])
    }

    #[test]
    fn test_sentinels_are_resident() {
        let t = table();
        assert_eq!(&**t.get(UNDEFINED), "undefined");
        assert_eq!(&**t.get(FALSE), "false");
        assert_eq!(t.live(), 0);
    }

    #[test]
    fn test_first_handle_after_sentinels() {
        let mut t = table();
        let h = t.insert("a".into());
        assert_eq!(h.raw(), FIRST_DYNAMIC);
    }

    #[test]
    fn test_get_returns_same_object() {
        let mut t = table();
        let obj: Rc<str> = "context".into();
        let h = t.insert(obj.clone());
        assert!(Rc::ptr_eq(t.get(h), &obj));
        assert!(Rc::ptr_eq(t.get(h), &obj));
    }

    #[test]
    fn test_lifo_reuse() {
        let mut t = table();
        let h1 = t.insert("one".into());
        let h2 = t.insert("two".into());
        t.release(h1);
        let h3 = t.insert("three".into());
        assert_eq!(h3, h1);
        assert_ne!(h3, h2);

        t.release(h2);
        t.release(h3);
        // last released comes back first
        assert_eq!(t.insert("four".into()), h3);
        assert_eq!(t.insert("five".into()), h2);
    }

    #[test]
    fn test_sentinels_survive_release() {
        let mut t = table();
        t.release(NULL);
        t.release(TRUE);
        assert_eq!(&**t.get(NULL), "null");
        assert!(t.take(TRUE).is_none());
    }

    #[test]
    fn test_take_moves_object_out() {
        let mut t = table();
        let h = t.insert("payload".into());
        assert_eq!(t.take(h).as_deref(), Some("payload"));
        assert!(!t.contains(h));
        assert_eq!(t.live(), 0);
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn test_get_after_release_panics() {
        let mut t = table();
        let h = t.insert("gone".into());
        t.release(h);
        t.get(h);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let mut t = table();
        let h = t.insert("x".into());
        t.release(h);
        t.release(h);
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn test_reserved_slot_is_not_dereferenceable() {
        let t = table();
        t.get(Handle::from_raw(0));
    }
}
