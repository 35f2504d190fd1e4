use super::{Handle, Pool};

/// Arena plus the explicit membership list a device keeps for one kind of
/// ref.
///
/// Storage and membership are separate: `insert` allocates a slot, `link`
/// makes it visible to bulk operations such as [`ResourceList::for_each_linked_mut`].
/// A handle is a member of the list at most once.
pub struct ResourceList<T> {
    pub pool: Pool<T>,
    pub entries: Vec<Handle<T>>,
}

impl<T> Default for ResourceList<T> {
    fn default() -> Self {
        Self {
            pool: Default::default(),
            entries: Default::default(),
        }
    }
}

impl<T> ResourceList<T> {
    pub fn new(size: usize) -> Self {
        Self {
            pool: Pool::new(size),
            entries: Vec::with_capacity(size),
        }
    }

    /// Allocates storage for `v` without linking it.
    pub fn insert(&mut self, v: T) -> Handle<T> {
        self.pool
            .insert(v)
            .unwrap_or_else(|| panic!("ResourceList ran out of 16-bit slots"))
    }

    /// Allocates and links in one step.
    pub fn push(&mut self, v: T) -> Handle<T> {
        let h = self.insert(v);
        self.link(h);
        h
    }

    pub fn is_linked(&self, h: Handle<T>) -> bool {
        self.entries.contains(&h)
    }

    pub fn link(&mut self, h: Handle<T>) {
        assert!(self.pool.is_live(h), "Trying to link a released ref");
        assert!(
            !self.is_linked(h),
            "Trying to link a ref that's already linked"
        );
        self.entries.push(h);
    }

    pub fn unlink(&mut self, h: Handle<T>) {
        let idx = self
            .entries
            .iter()
            .position(|a| *a == h)
            .unwrap_or_else(|| panic!("Ref not in list"));
        self.entries.remove(idx);
    }

    /// Unlinks `h` if needed and frees its slot, returning the stored value.
    ///
    /// # Panics
    /// When `h` was already released.
    pub fn release(&mut self, h: Handle<T>) -> T {
        if let Some(idx) = self.entries.iter().position(|a| *a == h) {
            self.entries.remove(idx);
        }
        self.pool
            .release(h)
            .unwrap_or_else(|| panic!("Ref released twice"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_ref(&self, h: Handle<T>) -> &T {
        self.pool
            .get_ref(h)
            .unwrap_or_else(|| panic!("Stale ref handle {:?}", h))
    }

    pub fn get_ref_mut(&mut self, h: Handle<T>) -> &mut T {
        self.pool
            .get_mut_ref(h)
            .unwrap_or_else(|| panic!("Stale ref handle {:?}", h))
    }

    pub fn try_get_ref(&self, h: Handle<T>) -> Option<&T> {
        self.pool.get_ref(h)
    }

    pub fn for_each_handle<F>(&self, mut func: F)
    where
        F: FnMut(Handle<T>),
    {
        for h in &self.entries {
            func(*h);
        }
    }

    pub fn for_each_linked_mut<F>(&mut self, mut func: F)
    where
        F: FnMut(&mut T),
    {
        for h in &self.entries {
            if let Some(r) = self.pool.get_mut_ref(*h) {
                func(r);
            }
        }
    }

    /// Unlinks and frees everything, linked or not.
    pub fn drain<F>(&mut self, func: F)
    where
        F: FnMut(T),
    {
        self.entries.clear();
        self.pool.drain(func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get_round_trip() {
        let mut list = ResourceList::default();
        let handle = list.push(42u32);
        assert_eq!(*list.get_ref(handle), 42);
        assert_eq!(*list.get_ref_mut(handle), 42);
        assert!(list.is_linked(handle));
    }

    #[test]
    fn release_removes_entries() {
        let mut list = ResourceList::new(4);
        let handle_a = list.push("a");
        let handle_b = list.push("b");

        assert_eq!(list.release(handle_a), "a");
        assert_eq!(list.entries.len(), 1);
        assert_eq!(*list.get_ref(handle_b), "b");
    }

    #[test]
    fn insert_does_not_link() {
        let mut list = ResourceList::default();
        let h = list.insert(1u8);
        assert!(!list.is_linked(h));
        list.link(h);
        list.unlink(h);
        assert!(!list.is_linked(h));
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn double_link_panics() {
        let mut list = ResourceList::default();
        let h = list.push(1u8);
        list.link(h);
    }

    #[test]
    #[should_panic(expected = "not in list")]
    fn unlink_unlinked_panics() {
        let mut list = ResourceList::default();
        let h = list.insert(1u8);
        list.unlink(h);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        let mut list = ResourceList::default();
        let h = list.push(1u8);
        list.release(h);
        list.release(h);
    }
}
