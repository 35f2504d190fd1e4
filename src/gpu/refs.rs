//! Engine-side records tying a CPU source to the GPU objects built from it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use bitflags::bitflags;

use super::source::{Compression, GroupKey, TextureKey};
use super::state::VertexFormat;
use super::structs::Format;
use super::Backend;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RefFlags: u32 {
        const DIRTY = 0x1;
        /// Rebuilt and not drawn from since.
        const REBUILT_SINCE_USED = 0x10;
        /// Rewritten every frame.
        const VOLATILE = 0x20;
        const SKINNED = 0x40;
    }
}

/// Dirty bit that can be shared with an object living outside the device.
///
/// The owner sets it when its data changes; whoever holds the device side
/// consumes it before the next use.
#[derive(Debug, Clone, Default)]
pub struct DirtyFlag(Arc<AtomicBool>);

impl DirtyFlag {
    pub fn new(dirty: bool) -> Self {
        Self(Arc::new(AtomicBool::new(dirty)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Bookkeeping shared by every ref kind.
#[derive(Debug, Clone, Default)]
pub struct RefState {
    flags: RefFlags,
    ref_time: u32,
    lock_owner: Option<ThreadId>,
    rebuilds: u32,
}

impl RefState {
    pub fn new(flags: RefFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    pub fn flags(&self) -> RefFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: RefFlags, on: bool) {
        self.flags.set(flag, on);
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(RefFlags::DIRTY)
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.set_flag(RefFlags::DIRTY, dirty);
    }

    pub fn volatile(&self) -> bool {
        self.flags.contains(RefFlags::VOLATILE)
    }

    pub fn set_volatile(&mut self, volatile: bool) {
        self.set_flag(RefFlags::VOLATILE, volatile);
    }

    pub fn skinned(&self) -> bool {
        self.flags.contains(RefFlags::SKINNED)
    }

    pub fn set_skinned(&mut self, skinned: bool) {
        self.set_flag(RefFlags::SKINNED, skinned);
    }

    pub fn rebuilt_since_used(&self) -> bool {
        self.flags.contains(RefFlags::REBUILT_SINCE_USED)
    }

    pub fn set_rebuilt_since_used(&mut self, rebuilt: bool) {
        self.set_flag(RefFlags::REBUILT_SINCE_USED, rebuilt);
    }

    /// A volatile ref is stale when dirty or when it was last filled in a
    /// different frame.
    pub fn expired(&self, frame: u32) -> bool {
        self.volatile() && (self.is_dirty() || self.ref_time != frame)
    }

    pub fn ref_time(&self) -> u32 {
        self.ref_time
    }

    pub fn set_ref_time(&mut self, frame: u32) {
        self.ref_time = frame;
    }

    /// Number of times the GPU side has been (re)built.
    pub fn rebuilds(&self) -> u32 {
        self.rebuilds
    }

    pub(crate) fn mark_rebuilt(&mut self) {
        self.rebuilds += 1;
        self.set_dirty(false);
        self.set_rebuilt_since_used(true);
    }

    /// Takes the advisory write lock for the calling thread.
    ///
    /// # Panics
    /// When another thread holds the lock.
    pub fn lock(&mut self) {
        let me = std::thread::current().id();
        match self.lock_owner {
            Some(owner) if owner != me => {
                panic!("Ref locked by {:?}, lock attempted from {:?}", owner, me)
            }
            _ => self.lock_owner = Some(me),
        }
    }

    /// Like [`RefState::lock`] but reports contention instead of panicking.
    pub fn try_lock(&mut self) -> bool {
        let me = std::thread::current().id();
        match self.lock_owner {
            Some(owner) if owner != me => false,
            _ => {
                self.lock_owner = Some(me);
                true
            }
        }
    }

    /// # Panics
    /// When the lock is held by another thread.
    pub fn unlock(&mut self) {
        if let Some(owner) = self.lock_owner {
            assert_eq!(
                owner,
                std::thread::current().id(),
                "Ref unlocked by a thread that doesn't own it"
            );
        }
        self.lock_owner = None;
    }

    pub fn is_locked(&self) -> bool {
        self.lock_owner.is_some()
    }

    pub fn lock_owner(&self) -> Option<ThreadId> {
        self.lock_owner
    }
}

/// Common access to the [`RefState`] embedded in every ref.
pub trait DeviceRef {
    fn state(&self) -> &RefState;
    fn state_mut(&mut self) -> &mut RefState;
    /// Whether GPU objects currently back this ref.
    fn is_built(&self) -> bool;

    fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.state_mut().set_dirty(dirty)
    }

    fn volatile(&self) -> bool {
        self.state().volatile()
    }

    fn lock(&mut self) {
        self.state_mut().lock()
    }

    fn try_lock(&mut self) -> bool {
        self.state_mut().try_lock()
    }

    fn unlock(&mut self) {
        self.state_mut().unlock()
    }

    fn is_locked(&self) -> bool {
        self.state().is_locked()
    }
}

pub struct VertexBufferRef<B: Backend> {
    pub owner: GroupKey,
    pub index: u32,
    pub count: u32,
    pub vertex_size: u32,
    pub offset: u32,
    pub format: VertexFormat,
    pub state: RefState,
    pub(crate) buffer: Option<B::Buffer>,
}

impl<B: Backend> VertexBufferRef<B> {
    pub(crate) fn new(owner: GroupKey, index: u32) -> Self {
        Self {
            owner,
            index,
            count: 0,
            vertex_size: 0,
            offset: 0,
            format: VertexFormat::default(),
            state: RefState::new(RefFlags::DIRTY),
            buffer: None,
        }
    }

    pub fn buffer(&self) -> Option<&B::Buffer> {
        self.buffer.as_ref()
    }
}

impl<B: Backend> DeviceRef for VertexBufferRef<B> {
    fn state(&self) -> &RefState {
        &self.state
    }
    fn state_mut(&mut self) -> &mut RefState {
        &mut self.state
    }
    fn is_built(&self) -> bool {
        self.buffer.is_some()
    }
}

pub struct IndexBufferRef<B: Backend> {
    pub owner: GroupKey,
    pub index: u32,
    pub count: u32,
    pub offset: u32,
    pub state: RefState,
    pub(crate) buffer: Option<B::Buffer>,
}

impl<B: Backend> IndexBufferRef<B> {
    pub(crate) fn new(owner: GroupKey, index: u32) -> Self {
        Self {
            owner,
            index,
            count: 0,
            offset: 0,
            state: RefState::new(RefFlags::DIRTY),
            buffer: None,
        }
    }

    pub fn buffer(&self) -> Option<&B::Buffer> {
        self.buffer.as_ref()
    }
}

impl<B: Backend> DeviceRef for IndexBufferRef<B> {
    fn state(&self) -> &RefState {
        &self.state
    }
    fn state_mut(&mut self) -> &mut RefState {
        &mut self.state
    }
    fn is_built(&self) -> bool {
        self.buffer.is_some()
    }
}

pub struct TextureRef<B: Backend> {
    pub owner: TextureKey,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// Levels uploaded to the GPU.
    pub levels: u32,
    /// Source levels skipped for exceeding the device's max dimension.
    pub first_level: u32,
    pub compressed: bool,
    pub compression: Compression,
    pub cube: bool,
    pub state: RefState,
    pub(crate) texture: Option<B::Texture>,
}

impl<B: Backend> TextureRef<B> {
    pub(crate) fn new(owner: TextureKey, cube: bool) -> Self {
        Self {
            owner,
            width: 0,
            height: 0,
            format: Format::default(),
            levels: 0,
            first_level: 0,
            compressed: false,
            compression: Compression::Uncompressed,
            cube,
            state: RefState::new(RefFlags::DIRTY),
            texture: None,
        }
    }

    pub fn texture(&self) -> Option<&B::Texture> {
        self.texture.as_ref()
    }
}

impl<B: Backend> DeviceRef for TextureRef<B> {
    fn state(&self) -> &RefState {
        &self.state
    }
    fn state_mut(&mut self) -> &mut RefState {
        &mut self.state
    }
    fn is_built(&self) -> bool {
        self.texture.is_some()
    }
}

/// Small uniform buffer derived from an object outside the device, such as
/// a light. The owner signals changes through the shared [`DirtyFlag`].
pub struct UniformBufferRef<B: Backend> {
    pub source: DirtyFlag,
    pub size: usize,
    pub state: RefState,
    pub(crate) buffer: Option<B::Buffer>,
}

impl<B: Backend> UniformBufferRef<B> {
    pub(crate) fn new(source: DirtyFlag) -> Self {
        Self {
            source,
            size: 0,
            state: RefState::new(RefFlags::DIRTY),
            buffer: None,
        }
    }

    pub fn buffer(&self) -> Option<&B::Buffer> {
        self.buffer.as_ref()
    }

    /// Folds the owner's flag into the ref's own dirty bit.
    pub(crate) fn absorb_source(&mut self) -> bool {
        if self.source.take() {
            self.state.set_dirty(true);
        }
        self.state.is_dirty()
    }
}

impl<B: Backend> DeviceRef for UniformBufferRef<B> {
    fn state(&self) -> &RefState {
        &self.state
    }
    fn state_mut(&mut self) -> &mut RefState {
        &mut self.state
    }
    fn is_built(&self) -> bool {
        self.buffer.is_some()
    }
}
