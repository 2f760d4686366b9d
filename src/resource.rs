// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! GPU resource handles and their access bookkeeping.
//!
//! A [`GPUResource`] wraps a driver object (texture, buffer, view or sampler) together with the
//! state this crate needs to decide whether a use is legal:
//!
//! - the current [`Access`] the resource is in,
//! - whether it was written since it was last known to be readable (`dirty`),
//! - the frame of the last write.
//!
//! Anyone holding a handle can read this state. Only
//! [`TransitionValidator`](crate::transition::TransitionValidator) changes it.
//!
//! Depth-stencil resources keep two independent copies of the state, one per [`Plane`], so that
//! writing depth never implies permission to write stencil.
//!
//! The state lives in atomics because handles are shared by every command context that records
//! against the resource. Relaxed ordering is enough: at most one context transitions a given
//! resource during a frame.

use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`GPUResource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
    /// A view onto part of another resource.
    View,
    Sampler,
}

/// The role a resource is currently playing on the GPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Access {
    Undefined = 0,
    Readable = 1,
    Writable = 2,
    UnorderedAccess = 3,
    RenderTarget = 4,
    DepthWrite = 5,
    IndirectArgument = 6,
    CopySource = 7,
    CopyDest = 8,
}

impl Access {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Access::Writable
                | Access::UnorderedAccess
                | Access::RenderTarget
                | Access::DepthWrite
                | Access::CopyDest
        )
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            Access::Readable | Access::IndirectArgument | Access::CopySource
        )
    }

    fn from_u8(value: u8) -> Access {
        match value {
            1 => Access::Readable,
            2 => Access::Writable,
            3 => Access::UnorderedAccess,
            4 => Access::RenderTarget,
            5 => Access::DepthWrite,
            6 => Access::IndirectArgument,
            7 => Access::CopySource,
            8 => Access::CopyDest,
            _ => Access::Undefined,
        }
    }
}

impl Display for Access {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Independently tracked part of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Plane {
    /// The color or buffer contents, or the depth plane of a depth resource.
    Primary,
    Stencil,
}

impl Plane {
    fn index(self) -> usize {
        match self {
            Plane::Primary => 0,
            Plane::Stencil => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    DepthOnly,
    DepthStencil,
}

/// Whether consecutive writes and reads need an explicit barrier in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BarrierPolicy {
    /// A write must be followed by a barrier before the resource is read, or written again as
    /// a UAV, in the same frame.
    #[default]
    Explicit,
    /// The caller synchronizes by other means, typically overlapping UAV writes to disjoint
    /// ranges. Barriers keep the dirty flag.
    NoBarrier,
}

/// Configuration used to create a [`GPUResource`].
#[derive(Debug, Clone)]
pub struct ResourceDescriptor<'a> {
    pub kind: ResourceKind,
    pub width: u32,
    pub height: u32,
    pub depth_format: Option<DepthFormat>,
    pub barrier_policy: BarrierPolicy,
    pub debug_name: &'a str,
}

impl<'a> ResourceDescriptor<'a> {
    pub fn texture(debug_name: &'a str, width: u32, height: u32) -> Self {
        ResourceDescriptor {
            kind: ResourceKind::Texture,
            width,
            height,
            depth_format: None,
            barrier_policy: BarrierPolicy::Explicit,
            debug_name,
        }
    }

    pub fn depth_texture(debug_name: &'a str, width: u32, height: u32, format: DepthFormat) -> Self {
        ResourceDescriptor {
            depth_format: Some(format),
            ..Self::texture(debug_name, width, height)
        }
    }

    pub fn buffer(debug_name: &'a str, byte_len: u32) -> Self {
        ResourceDescriptor {
            kind: ResourceKind::Buffer,
            width: byte_len,
            height: 1,
            depth_format: None,
            barrier_policy: BarrierPolicy::Explicit,
            debug_name,
        }
    }

    pub fn sampler(debug_name: &'a str) -> Self {
        ResourceDescriptor {
            kind: ResourceKind::Sampler,
            width: 0,
            height: 0,
            depth_format: None,
            barrier_policy: BarrierPolicy::Explicit,
            debug_name,
        }
    }

    pub fn with_barrier_policy(mut self, policy: BarrierPolicy) -> Self {
        self.barrier_policy = policy;
        self
    }
}

/// Copy of one plane's bookkeeping at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneState {
    pub access: Access,
    pub dirty: bool,
    pub last_write_frame: u64,
}

impl PlaneState {
    pub const INITIAL: PlaneState = PlaneState {
        access: Access::Undefined,
        dirty: false,
        last_write_frame: 0,
    };
}

#[derive(Debug)]
struct PlaneCell {
    access: AtomicU8,
    dirty: AtomicBool,
    last_write_frame: AtomicU64,
}

impl PlaneCell {
    fn new() -> Self {
        PlaneCell {
            access: AtomicU8::new(Access::Undefined as u8),
            dirty: AtomicBool::new(false),
            last_write_frame: AtomicU64::new(0),
        }
    }
    fn load(&self) -> PlaneState {
        PlaneState {
            access: Access::from_u8(self.access.load(Ordering::Relaxed)),
            dirty: self.dirty.load(Ordering::Relaxed),
            last_write_frame: self.last_write_frame.load(Ordering::Relaxed),
        }
    }
    fn store(&self, state: PlaneState) {
        self.access.store(state.access as u8, Ordering::Relaxed);
        self.dirty.store(state.dirty, Ordering::Relaxed);
        self.last_write_frame
            .store(state.last_write_frame, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Shared {
    id: ResourceId,
    kind: ResourceKind,
    width: u32,
    height: u32,
    depth_format: Option<DepthFormat>,
    barrier_policy: BarrierPolicy,
    debug_name: String,
    planes: [PlaneCell; 2],
}

/// A handle to a GPU object plus its access bookkeeping.
///
/// Cloning is cheap and yields another handle to the same resource.
/// Equality and hashing use the [`ResourceId`].
#[derive(Clone)]
pub struct GPUResource {
    shared: Arc<Shared>,
}

impl GPUResource {
    pub fn new(descriptor: ResourceDescriptor<'_>) -> Self {
        GPUResource {
            shared: Arc::new(Shared {
                id: ResourceId::next(),
                kind: descriptor.kind,
                width: descriptor.width,
                height: descriptor.height,
                depth_format: descriptor.depth_format,
                barrier_policy: descriptor.barrier_policy,
                debug_name: descriptor.debug_name.to_string(),
                planes: [PlaneCell::new(), PlaneCell::new()],
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.shared.id
    }
    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }
    pub fn width(&self) -> u32 {
        self.shared.width
    }
    pub fn height(&self) -> u32 {
        self.shared.height
    }
    pub fn depth_format(&self) -> Option<DepthFormat> {
        self.shared.depth_format
    }
    pub fn barrier_policy(&self) -> BarrierPolicy {
        self.shared.barrier_policy
    }
    pub fn debug_name(&self) -> &str {
        &self.shared.debug_name
    }

    pub fn has_plane(&self, plane: Plane) -> bool {
        match plane {
            Plane::Primary => true,
            Plane::Stencil => self.shared.depth_format == Some(DepthFormat::DepthStencil),
        }
    }

    /// Access of the primary plane.
    pub fn current_access(&self) -> Access {
        self.state().access
    }
    pub fn dirty(&self) -> bool {
        self.state().dirty
    }
    pub fn last_write_frame(&self) -> u64 {
        self.state().last_write_frame
    }

    pub fn state(&self) -> PlaneState {
        self.shared.planes[Plane::Primary.index()].load()
    }

    /// State of `plane`, or `None` if the resource does not have it.
    pub fn plane_state(&self, plane: Plane) -> Option<PlaneState> {
        if self.has_plane(plane) {
            Some(self.shared.planes[plane.index()].load())
        } else {
            None
        }
    }

    pub(crate) fn store_plane(&self, plane: Plane, state: PlaneState) {
        debug_assert!(self.has_plane(plane));
        self.shared.planes[plane.index()].store(state);
    }

    pub fn downgrade(&self) -> WeakResource {
        WeakResource {
            id: self.shared.id,
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl PartialEq for GPUResource {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}
impl Eq for GPUResource {}

impl Hash for GPUResource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl Debug for GPUResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GPUResource")
            .field("id", &self.shared.id)
            .field("name", &self.shared.debug_name)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning reference to a [`GPUResource`].
#[derive(Clone, Debug)]
pub struct WeakResource {
    id: ResourceId,
    shared: Weak<Shared>,
}

impl WeakResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }
    pub fn upgrade(&self) -> Option<GPUResource> {
        self.shared.upgrade().map(|shared| GPUResource { shared })
    }
    pub fn is_released(&self) -> bool {
        self.shared.strong_count() == 0
    }
}

/// Requested use of one plane of a depth-stencil target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PlaneAccess {
    #[default]
    Nop,
    Read,
    Write,
}

/// Depth and stencil access requested for a depth-stencil target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ExclusiveDepthStencil {
    pub depth: PlaneAccess,
    pub stencil: PlaneAccess,
}

impl ExclusiveDepthStencil {
    pub const DEPTH_WRITE_STENCIL_WRITE: Self = Self::new(PlaneAccess::Write, PlaneAccess::Write);
    pub const DEPTH_WRITE_STENCIL_NOP: Self = Self::new(PlaneAccess::Write, PlaneAccess::Nop);
    pub const DEPTH_READ_STENCIL_READ: Self = Self::new(PlaneAccess::Read, PlaneAccess::Read);
    pub const DEPTH_READ_STENCIL_NOP: Self = Self::new(PlaneAccess::Read, PlaneAccess::Nop);

    pub const fn new(depth: PlaneAccess, stencil: PlaneAccess) -> Self {
        ExclusiveDepthStencil { depth, stencil }
    }

    pub fn is_depth_write(self) -> bool {
        self.depth == PlaneAccess::Write
    }
    pub fn is_stencil_write(self) -> bool {
        self.stencil == PlaneAccess::Write
    }
    pub fn is_any_write(self) -> bool {
        self.is_depth_write() || self.is_stencil_write()
    }

    /// Whether a view opened with `self` can serve a `requested` use.
    ///
    /// Writes need a writable plane; reads need the plane to be present in the view.
    pub fn permits(self, requested: ExclusiveDepthStencil) -> bool {
        fn plane(current: PlaneAccess, requested: PlaneAccess) -> bool {
            match requested {
                PlaneAccess::Nop => true,
                PlaneAccess::Read => current != PlaneAccess::Nop,
                PlaneAccess::Write => current == PlaneAccess::Write,
            }
        }
        plane(self.depth, requested.depth) && plane(self.stencil, requested.stencil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_identity_based() {
        let a = GPUResource::new(ResourceDescriptor::texture("a", 4, 4));
        let b = GPUResource::new(ResourceDescriptor::texture("a", 4, 4));
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn new_resource_is_undefined_and_clean() {
        let r = GPUResource::new(ResourceDescriptor::buffer("b", 256));
        assert_eq!(r.state(), PlaneState::INITIAL);
        assert_eq!(r.plane_state(Plane::Stencil), None);
    }

    #[test]
    fn stencil_plane_only_on_depth_stencil() {
        let d = GPUResource::new(ResourceDescriptor::depth_texture(
            "d",
            8,
            8,
            DepthFormat::DepthOnly,
        ));
        let ds = GPUResource::new(ResourceDescriptor::depth_texture(
            "ds",
            8,
            8,
            DepthFormat::DepthStencil,
        ));
        assert!(!d.has_plane(Plane::Stencil));
        assert!(ds.has_plane(Plane::Stencil));
    }

    #[test]
    fn weak_reference_does_not_keep_alive() {
        let r = GPUResource::new(ResourceDescriptor::texture("t", 1, 1));
        let weak = r.downgrade();
        assert_eq!(weak.upgrade(), Some(r.clone()));
        drop(r);
        assert!(weak.is_released());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn access_classes() {
        assert!(Access::CopyDest.is_write());
        assert!(Access::IndirectArgument.is_read());
        assert!(!Access::Undefined.is_read());
        assert!(!Access::Undefined.is_write());
        assert_eq!(Access::from_u8(Access::DepthWrite as u8), Access::DepthWrite);
    }

    #[test]
    fn depth_stencil_permits() {
        let current = ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_NOP;
        assert!(current.permits(ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_NOP));
        assert!(current.permits(ExclusiveDepthStencil::DEPTH_READ_STENCIL_NOP));
        assert!(!current.permits(ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_WRITE));
        assert!(!ExclusiveDepthStencil::DEPTH_READ_STENCIL_READ
            .permits(ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_NOP));
    }
}
