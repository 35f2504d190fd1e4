use std::hash::Hash;
use std::marker::PhantomData;

/// Generation-checked index into a [`Pool`].
///
/// A handle stays valid until the slot it points at is released. Releasing
/// bumps the slot generation, so stale copies stop resolving instead of
/// aliasing whatever is inserted next.
pub struct Handle<T> {
    pub slot: u16,
    pub generation: u16,
    phantom: PhantomData<T>,
}

impl<T> Handle<T> {
    pub fn new(slot: u16, generation: u16) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u16>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        const INITIAL_SIZE: usize = 64;
        Self::new(INITIAL_SIZE)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            // Popped from the back, so reverse to hand out low slots first.
            empty: (0..initial_size).rev().collect(),
            generation: vec![0; initial_size],
        };

        p.items.resize_with(initial_size, || None);
        p
    }

    /// Stores `item`, growing the pool when every slot is taken. Returns
    /// `None` only once the 16-bit slot space is exhausted.
    pub fn insert(&mut self, item: T) -> Option<Handle<T>> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.items.len();
                if slot > u16::MAX as usize {
                    return None;
                }
                self.items.push(None);
                self.generation.push(0);
                slot
            }
        };

        self.items[slot] = Some(item);

        Some(Handle::new(slot as u16, self.generation[slot]))
    }

    /// Removes the item behind `item`, returning it. Stale handles return
    /// `None` and leave the pool untouched.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if !self.is_live(item) {
            return None;
        }

        let value = self.items[slot].take();
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        self.empty.push(slot);
        value
    }

    pub fn is_live(&self, item: Handle<T>) -> bool {
        let slot = item.slot as usize;
        slot < self.items.len()
            && self.generation[slot] == item.generation
            && self.items[slot].is_some()
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        if !self.is_live(item) {
            return None;
        }
        self.items[item.slot as usize].as_ref()
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        if !self.is_live(item) {
            return None;
        }
        self.items[item.slot as usize].as_mut()
    }

    pub fn len(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each_occupied_mut<F>(&mut self, mut func: F)
    where
        F: FnMut(&mut T),
    {
        for item in self.items.iter_mut().flatten() {
            func(item);
        }
    }

    /// Empties the pool, handing every live item to `func`.
    pub fn drain<F>(&mut self, mut func: F)
    where
        F: FnMut(T),
    {
        for slot in 0..self.items.len() {
            if let Some(item) = self.items[slot].take() {
                self.generation[slot] = self.generation[slot].wrapping_add(1);
                self.empty.push(slot);
                func(item);
            }
        }
    }
}
