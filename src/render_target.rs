// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Render target, output UAV and depth-stencil binding.
//!
//! [`RenderTargetBinder::set_targets`] is all-or-nothing: every incoming target is validated
//! before any of them is transitioned or bound, and a resource may appear in a set only once.
//! Binding a target first removes it from every shader-input slot and every other UAV slot.
//! Re-binding the set that is already active costs no driver call.
//!
//! When the set does change, the default viewport covering color target 0 (or the depth target
//! when there is no color target) is handed back so the caller can apply it.

use std::sync::Arc;

use crate::bindings::cache::BindingCache;
use crate::bindings::slot::{MAX_RENDER_TARGETS, MAX_UAV_SLOTS, SlotKey, SlotKind};
use crate::bindings::stage::Stage;
use crate::error::{BindingError, CommandError};
use crate::imp::Driver;
use crate::resource::{Access, ExclusiveDepthStencil, GPUResource, Plane, PlaneAccess, ResourceId};
use crate::stats::TrackerStats;
use crate::transition::TransitionValidator;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepthStencilTarget {
    pub resource: GPUResource,
    pub access: ExclusiveDepthStencil,
}

/// Color targets, depth-stencil target and output UAVs, compared by resource identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderTargetSet {
    pub colors: Vec<GPUResource>,
    pub depth_stencil: Option<DepthStencilTarget>,
    pub uavs: Vec<GPUResource>,
}

impl RenderTargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(mut self, resource: &GPUResource) -> Self {
        self.colors.push(resource.clone());
        self
    }

    pub fn depth_stencil(mut self, resource: &GPUResource, access: ExclusiveDepthStencil) -> Self {
        self.depth_stencil = Some(DepthStencilTarget {
            resource: resource.clone(),
            access,
        });
        self
    }

    pub fn uav(mut self, resource: &GPUResource) -> Self {
        self.uavs.push(resource.clone());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.depth_stencil.is_none() && self.uavs.is_empty()
    }

    pub fn contains(&self, resource: &GPUResource) -> bool {
        self.resources().any(|r| r == resource)
    }

    /// Colors, then UAVs, then the depth target.
    pub fn resources(&self) -> impl Iterator<Item = &GPUResource> {
        self.colors
            .iter()
            .chain(&self.uavs)
            .chain(self.depth_stencil.as_ref().map(|d| &d.resource))
    }

    /// The first resource named twice, in any role.
    pub fn first_duplicate(&self) -> Option<ResourceId> {
        let mut seen = Vec::new();
        for resource in self.resources() {
            if seen.contains(&resource.id()) {
                return Some(resource.id());
            }
            seen.push(resource.id());
        }
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Covers `width` x `height` from the origin with the full depth range.
    pub fn sized(width: u32, height: u32) -> Self {
        Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Values for [`CommandContext::clear_targets`](crate::context::CommandContext::clear_targets).
/// `None` leaves that target alone.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetChange {
    /// Same set as before; the driver was not called.
    Unchanged,
    Changed { default_viewport: Option<Viewport> },
}

#[derive(Debug)]
pub struct RenderTargetBinder {
    current: RenderTargetSet,
    stats: Arc<TrackerStats>,
}

fn plane_access(access: PlaneAccess) -> Option<Access> {
    match access {
        PlaneAccess::Nop => None,
        PlaneAccess::Read => Some(Access::Readable),
        PlaneAccess::Write => Some(Access::DepthWrite),
    }
}

impl RenderTargetBinder {
    pub fn new(stats: Arc<TrackerStats>) -> Self {
        RenderTargetBinder {
            current: RenderTargetSet::default(),
            stats,
        }
    }

    pub fn current(&self) -> &RenderTargetSet {
        &self.current
    }

    /// Access the bound depth target was opened with.
    pub fn depth_access(&self) -> Option<ExclusiveDepthStencil> {
        self.current.depth_stencil.as_ref().map(|d| d.access)
    }

    fn settled(
        cache: &BindingCache,
        key: SlotKey,
        current: Option<&GPUResource>,
        next: &GPUResource,
        access: Access,
    ) -> bool {
        current == Some(next)
            && cache.get(key) == Some(next.id())
            && next.current_access() == access
    }

    fn depth_settled(&self, cache: &BindingCache, next: &DepthStencilTarget) -> bool {
        let key = SlotKey::new(Stage::Pixel, SlotKind::DepthStencil, 0);
        if self.current.depth_stencil.as_ref() != Some(next)
            || cache.get(key) != Some(next.resource.id())
        {
            return false;
        }
        [
            (Plane::Primary, next.access.depth),
            (Plane::Stencil, next.access.stencil),
        ]
        .into_iter()
        .all(|(plane, requested)| match plane_access(requested) {
            None => true,
            Some(access) => next
                .resource
                .plane_state(plane)
                .is_some_and(|s| s.access == access),
        })
    }

    /// Makes `next` the active target set.
    pub fn set_targets<D: Driver>(
        &mut self,
        next: RenderTargetSet,
        cache: &mut BindingCache,
        validator: &TransitionValidator,
        driver: &mut D,
    ) -> Result<TargetChange, CommandError> {
        if next.colors.len() > MAX_RENDER_TARGETS {
            return Err(BindingError::SlotOutOfRange {
                stage: Stage::Pixel,
                kind: SlotKind::RenderTarget,
                index: MAX_RENDER_TARGETS as u32,
            }
            .into());
        }
        if next.uavs.len() > MAX_UAV_SLOTS {
            return Err(BindingError::SlotOutOfRange {
                stage: Stage::Pixel,
                kind: SlotKind::UnorderedAccess,
                index: MAX_UAV_SLOTS as u32,
            }
            .into());
        }
        if let Some(resource) = next.first_duplicate() {
            return Err(BindingError::DuplicateTarget(resource).into());
        }

        //which targets still need a transition
        let colors: Vec<bool> = next
            .colors
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let key = SlotKey::new(Stage::Pixel, SlotKind::RenderTarget, i as u32);
                !Self::settled(cache, key, self.current.colors.get(i), r, Access::RenderTarget)
            })
            .collect();
        let uavs: Vec<bool> = next
            .uavs
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let key = SlotKey::new(Stage::Pixel, SlotKind::UnorderedAccess, i as u32);
                !Self::settled(cache, key, self.current.uavs.get(i), r, Access::UnorderedAccess)
            })
            .collect();
        let depth = next
            .depth_stencil
            .as_ref()
            .is_some_and(|d| !self.depth_settled(cache, d));

        for (resource, _) in next.colors.iter().zip(&colors).filter(|(_, t)| **t) {
            validator.check(resource, Access::RenderTarget)?;
        }
        for (resource, _) in next.uavs.iter().zip(&uavs).filter(|(_, t)| **t) {
            validator.check(resource, Access::UnorderedAccess)?;
        }
        if let Some(target) = next.depth_stencil.as_ref().filter(|_| depth) {
            validator.check_depth_stencil(&target.resource, target.access)?;
        }

        for (resource, _) in next.colors.iter().zip(&colors).filter(|(_, t)| **t) {
            validator.transition(resource, Access::RenderTarget)?;
        }
        for (resource, _) in next.uavs.iter().zip(&uavs).filter(|(_, t)| **t) {
            validator.transition(resource, Access::UnorderedAccess)?;
        }
        if let Some(target) = next.depth_stencil.as_ref().filter(|_| depth) {
            validator.transition_depth_stencil(&target.resource, target.access)?;
        }

        let mut slots_changed = false;
        let color_slots = next.colors.len().max(self.current.colors.len());
        for i in 0..color_slots {
            slots_changed |= cache.bind(
                Stage::Pixel,
                SlotKind::RenderTarget,
                i as u32,
                next.colors.get(i),
            )?;
        }
        let uav_slots = next.uavs.len().max(self.current.uavs.len());
        for i in 0..uav_slots {
            slots_changed |= cache.bind(
                Stage::Pixel,
                SlotKind::UnorderedAccess,
                i as u32,
                next.uavs.get(i),
            )?;
        }
        if next.depth_stencil.is_some() || self.current.depth_stencil.is_some() {
            slots_changed |= cache.bind(
                Stage::Pixel,
                SlotKind::DepthStencil,
                0,
                next.depth_stencil.as_ref().map(|d| &d.resource),
            )?;
        }
        //shader inputs of the new targets must be gone before the targets are set
        for key in cache.take_evicted() {
            driver.bind_slot(key, None);
            self.stats.inc_binds_issued();
        }

        //an output slot cleared behind our back still needs the targets re-sent
        if next == self.current && !slots_changed {
            self.stats.inc_render_target_skips();
            logwise::trace_sync!("set_targets: unchanged, skipping driver call");
            return Ok(TargetChange::Unchanged);
        }

        driver.set_render_targets(&next);
        self.stats.inc_render_target_changes();
        let default_viewport = next
            .colors
            .first()
            .or(next.depth_stencil.as_ref().map(|d| &d.resource))
            .map(|r| Viewport::sized(r.width(), r.height()));
        self.current = next;
        Ok(TargetChange::Changed { default_viewport })
    }

    /// Forgets the active set if it refers to `resource`, so the next set is always sent.
    pub fn release_resource(&mut self, resource: &GPUResource) {
        if self.current.contains(resource) {
            self.current = RenderTargetSet::default();
        }
    }

    pub fn reset(&mut self) {
        self.current = RenderTargetSet::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::slot::SlotKey;
    use crate::config::Severity;
    use crate::error::TransitionError;
    use crate::imp::{DriverCall, RecordingDriver};
    use crate::resource::{DepthFormat, ResourceDescriptor};
    use crate::transition::FrameClock;

    struct Fixture {
        binder: RenderTargetBinder,
        cache: BindingCache,
        validator: TransitionValidator,
        driver: RecordingDriver,
    }

    impl Fixture {
        fn new() -> Self {
            let stats = Arc::new(TrackerStats::new());
            Fixture {
                binder: RenderTargetBinder::new(stats.clone()),
                cache: BindingCache::new(stats.clone()),
                validator: TransitionValidator::new(FrameClock::new(), Severity::Fatal, stats),
                driver: RecordingDriver::new(),
            }
        }
        fn set(&mut self, set: RenderTargetSet) -> Result<TargetChange, CommandError> {
            self.binder
                .set_targets(set, &mut self.cache, &self.validator, &mut self.driver)
        }
    }

    fn texture(name: &str, w: u32, h: u32) -> GPUResource {
        GPUResource::new(ResourceDescriptor::texture(name, w, h))
    }

    #[test]
    fn identical_set_skips_driver() {
        let mut f = Fixture::new();
        let rt = texture("rt", 640, 480);
        let change = f.set(RenderTargetSet::new().color(&rt)).unwrap();
        assert_eq!(
            change,
            TargetChange::Changed {
                default_viewport: Some(Viewport::sized(640, 480))
            }
        );
        f.driver.take();
        assert_eq!(
            f.set(RenderTargetSet::new().color(&rt)).unwrap(),
            TargetChange::Unchanged
        );
        assert!(f.driver.calls().is_empty());
    }

    #[test]
    fn viewport_falls_back_to_depth() {
        let mut f = Fixture::new();
        let depth = GPUResource::new(ResourceDescriptor::depth_texture(
            "depth",
            256,
            128,
            DepthFormat::DepthOnly,
        ));
        let change = f
            .set(RenderTargetSet::new().depth_stencil(&depth, ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_NOP))
            .unwrap();
        assert_eq!(
            change,
            TargetChange::Changed {
                default_viewport: Some(Viewport::sized(256, 128))
            }
        );
        assert_eq!(depth.current_access(), Access::DepthWrite);
    }

    #[test]
    fn new_target_is_unbound_from_inputs_first() {
        let mut f = Fixture::new();
        let t = texture("t", 4, 4);
        f.cache.bind(Stage::Pixel, SlotKind::Texture, 2, Some(&t)).unwrap();
        f.set(RenderTargetSet::new().color(&t)).unwrap();
        assert!(!f.cache.is_bound_as_input(&t));
        let calls = f.driver.take();
        assert_eq!(
            calls[0],
            DriverCall::BindSlot {
                key: SlotKey::new(Stage::Pixel, SlotKind::Texture, 2),
                resource: None
            }
        );
        assert!(matches!(calls[1], DriverCall::SetRenderTargets { .. }));
        assert_eq!(f.binder.stats.snapshot().binds_issued, 1);
    }

    #[test]
    fn duplicate_targets_are_rejected_before_any_change() {
        let mut f = Fixture::new();
        let w = texture("w", 4, 4);
        let u = texture("u", 4, 4);
        let depth = GPUResource::new(ResourceDescriptor::depth_texture(
            "depth",
            4,
            4,
            DepthFormat::DepthOnly,
        ));
        for set in [
            RenderTargetSet::new().uav(&u).uav(&u),
            RenderTargetSet::new().color(&w).uav(&w),
            RenderTargetSet::new()
                .color(&depth)
                .depth_stencil(&depth, ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_NOP),
        ] {
            let dup = set.first_duplicate().unwrap();
            assert_eq!(
                f.set(set).unwrap_err(),
                CommandError::Binding(BindingError::DuplicateTarget(dup))
            );
        }
        for r in [&w, &u, &depth] {
            assert_eq!(r.current_access(), Access::Undefined);
            assert!(f.cache.slots_of(r).is_empty());
        }
        assert!(f.driver.calls().is_empty());
        assert!(f.binder.current().is_empty());
    }

    #[test]
    fn failed_validation_binds_nothing() {
        let mut f = Fixture::new();
        let good = texture("good", 4, 4);
        let busy = texture("busy", 4, 4);
        f.validator.transition(&busy, Access::UnorderedAccess).unwrap();
        let err = f
            .set(RenderTargetSet::new().color(&good).uav(&busy))
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Transition(TransitionError::UnsynchronizedHazard { .. })
        ));
        assert_eq!(good.current_access(), Access::Undefined);
        assert!(f.cache.slots_of(&good).is_empty());
        assert!(f.driver.calls().is_empty());
        assert!(f.binder.current().is_empty());
    }

    #[test]
    fn stencil_write_on_depth_only_is_rejected() {
        let mut f = Fixture::new();
        let depth = GPUResource::new(ResourceDescriptor::depth_texture(
            "depth",
            4,
            4,
            DepthFormat::DepthOnly,
        ));
        let err = f
            .set(RenderTargetSet::new().depth_stencil(&depth, ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_WRITE))
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::Transition(TransitionError::InvalidPlaneAccess {
                resource: Some(depth.id()),
                plane: Plane::Stencil
            })
        );
    }

    #[test]
    fn too_many_targets() {
        let mut f = Fixture::new();
        let mut set = RenderTargetSet::new();
        for i in 0..9 {
            set = set.color(&texture(&format!("rt{i}"), 1, 1));
        }
        assert!(matches!(
            f.set(set).unwrap_err(),
            CommandError::Binding(BindingError::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn shrinking_set_clears_old_slots() {
        let mut f = Fixture::new();
        let a = texture("a", 4, 4);
        let b = texture("b", 4, 4);
        f.set(RenderTargetSet::new().color(&a).color(&b)).unwrap();
        f.set(RenderTargetSet::new().color(&a)).unwrap();
        assert_eq!(
            f.cache.get(SlotKey::new(Stage::Pixel, SlotKind::RenderTarget, 1)),
            None
        );
        assert_eq!(f.binder.current().colors, vec![a]);
    }

    #[test]
    fn release_forces_next_set() {
        let mut f = Fixture::new();
        let a = texture("a", 4, 4);
        f.set(RenderTargetSet::new().color(&a)).unwrap();
        f.binder.release_resource(&a);
        assert!(matches!(
            f.set(RenderTargetSet::new().color(&a)).unwrap(),
            TargetChange::Changed { .. }
        ));
    }
}
