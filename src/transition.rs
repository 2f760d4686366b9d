// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Validated access transitions.
//!
//! [`TransitionValidator`] is the only code that changes a [`GPUResource`]'s access bookkeeping.
//! A transition is legal unless it would read (or UAV-write) memory that was written earlier in
//! the same frame without a barrier in between, for a resource whose [`BarrierPolicy`] asks for
//! explicit barriers. What happens to an illegal transition depends on the [`Severity`].
//!
//! [`TransitionValidator::barrier`] is the explicit synchronization point: it always succeeds,
//! and moving to a read state clears the dirty flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Severity;
use crate::error::TransitionError;
use crate::resource::{
    Access, BarrierPolicy, ExclusiveDepthStencil, GPUResource, Plane, PlaneAccess, PlaneState,
};
use crate::stats::TrackerStats;

/// The frame counter shared by every context recording for one device.
#[derive(Debug, Clone, Default)]
pub struct FrameClock(Arc<AtomicU64>);

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Starts the next frame and returns its number.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone)]
pub struct TransitionValidator {
    clock: FrameClock,
    severity: Severity,
    stats: Arc<TrackerStats>,
}

impl TransitionValidator {
    pub fn new(clock: FrameClock, severity: Severity, stats: Arc<TrackerStats>) -> Self {
        TransitionValidator {
            clock,
            severity,
            stats,
        }
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    fn plane(resource: &GPUResource, plane: Plane) -> Result<PlaneState, TransitionError> {
        resource
            .plane_state(plane)
            .ok_or(TransitionError::InvalidPlaneAccess {
                resource: Some(resource.id()),
                plane,
            })
    }

    fn hazard(
        &self,
        resource: &GPUResource,
        state: PlaneState,
        requested: Access,
    ) -> Option<TransitionError> {
        let unsynchronized = state.dirty
            && state.last_write_frame == self.clock.current()
            && resource.barrier_policy() == BarrierPolicy::Explicit;
        if !unsynchronized {
            return None;
        }
        let read_after_write = requested.is_read() && state.access.is_write();
        let uav_after_uav =
            requested == Access::UnorderedAccess && state.access == Access::UnorderedAccess;
        if read_after_write || uav_after_uav {
            Some(TransitionError::UnsynchronizedHazard {
                resource: resource.id(),
                name: resource.debug_name().to_string(),
                current: state.access,
                requested,
                frame: state.last_write_frame,
            })
        } else {
            None
        }
    }

    /// Validates a transition of the primary plane without performing it.
    pub fn check(&self, resource: &GPUResource, requested: Access) -> Result<(), TransitionError> {
        self.check_plane(resource, Plane::Primary, requested)
    }

    /// Validates a transition without performing it.
    ///
    /// Under [`Severity::Warn`] hazards are tolerated here and reported when the transition is
    /// performed.
    pub fn check_plane(
        &self,
        resource: &GPUResource,
        plane: Plane,
        requested: Access,
    ) -> Result<(), TransitionError> {
        let state = Self::plane(resource, plane)?;
        if let Some(err) = self.hazard(resource, state, requested) {
            if self.severity == Severity::Fatal {
                self.stats.inc_transition_hazards();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Moves the primary plane of `resource` to `requested`.
    pub fn transition(&self, resource: &GPUResource, requested: Access) -> Result<(), TransitionError> {
        self.transition_plane(resource, Plane::Primary, requested)
    }

    pub fn transition_plane(
        &self,
        resource: &GPUResource,
        plane: Plane,
        requested: Access,
    ) -> Result<(), TransitionError> {
        let state = Self::plane(resource, plane)?;
        let now = self.clock.current();
        if let Some(err) = self.hazard(resource, state, requested) {
            self.stats.inc_transition_hazards();
            match self.severity {
                Severity::Fatal => return Err(err),
                Severity::Warn => {
                    logwise::warn_sync!(
                        "Continuing past hazard: {err}",
                        err = logwise::privacy::LogIt(&err)
                    );
                }
            }
        }
        if requested.is_write()
            && state.access == Access::Readable
            && state.dirty
            && state.last_write_frame == now
        {
            logwise::info_sync!(
                "{name} is written again in frame {frame} after being read",
                name = logwise::privacy::LogIt(&resource.debug_name()),
                frame = logwise::privacy::LogIt(&now)
            );
        }
        let next = if requested.is_write() {
            PlaneState {
                access: requested,
                dirty: true,
                last_write_frame: now,
            }
        } else if requested.is_read() {
            PlaneState {
                access: requested,
                ..state
            }
        } else {
            PlaneState {
                access: Access::Undefined,
                dirty: false,
                ..state
            }
        };
        resource.store_plane(plane, next);
        Ok(())
    }

    fn depth_stencil_requests(
        resource: &GPUResource,
        access: ExclusiveDepthStencil,
    ) -> Result<[Option<(Plane, Access)>; 2], TransitionError> {
        if resource.depth_format().is_none() {
            return Err(TransitionError::InvalidPlaneAccess {
                resource: Some(resource.id()),
                plane: Plane::Primary,
            });
        }
        if access.stencil != PlaneAccess::Nop && !resource.has_plane(Plane::Stencil) {
            return Err(TransitionError::InvalidPlaneAccess {
                resource: Some(resource.id()),
                plane: Plane::Stencil,
            });
        }
        fn request(plane: Plane, access: PlaneAccess) -> Option<(Plane, Access)> {
            match access {
                PlaneAccess::Nop => None,
                PlaneAccess::Read => Some((plane, Access::Readable)),
                PlaneAccess::Write => Some((plane, Access::DepthWrite)),
            }
        }
        Ok([
            request(Plane::Primary, access.depth),
            request(Plane::Stencil, access.stencil),
        ])
    }

    /// Validates the per-plane transitions implied by `access` without performing them.
    pub fn check_depth_stencil(
        &self,
        resource: &GPUResource,
        access: ExclusiveDepthStencil,
    ) -> Result<(), TransitionError> {
        for (plane, requested) in Self::depth_stencil_requests(resource, access)?
            .into_iter()
            .flatten()
        {
            self.check_plane(resource, plane, requested)?;
        }
        Ok(())
    }

    /// Transitions each plane named by `access`. Either both planes move or neither does.
    pub fn transition_depth_stencil(
        &self,
        resource: &GPUResource,
        access: ExclusiveDepthStencil,
    ) -> Result<(), TransitionError> {
        self.check_depth_stencil(resource, access)?;
        for (plane, requested) in Self::depth_stencil_requests(resource, access)?
            .into_iter()
            .flatten()
        {
            self.transition_plane(resource, plane, requested)?;
        }
        Ok(())
    }

    /// Issues an explicit barrier, returning the primary plane's previous access.
    ///
    /// Barriers to a read state cover every plane and clear the dirty flag unless the resource
    /// opted out of barriers. Barriers to a write state only cover the primary plane; a barrier
    /// to [`Access::UnorderedAccess`] also clears the dirty flag so the next dispatch may write
    /// the UAV again.
    pub fn barrier(&self, resource: &GPUResource, to: Access) -> Result<Access, TransitionError> {
        let before = self.barrier_plane(resource, Plane::Primary, to)?;
        if !to.is_write() && resource.has_plane(Plane::Stencil) {
            self.barrier_plane(resource, Plane::Stencil, to)?;
        }
        Ok(before)
    }

    pub fn barrier_plane(
        &self,
        resource: &GPUResource,
        plane: Plane,
        to: Access,
    ) -> Result<Access, TransitionError> {
        let state = Self::plane(resource, plane)?;
        let synchronizes = resource.barrier_policy() == BarrierPolicy::Explicit;
        let next = if to == Access::UnorderedAccess {
            //orders earlier UAV writes before later ones
            PlaneState {
                access: to,
                dirty: state.dirty && !synchronizes,
                ..state
            }
        } else if to.is_write() {
            PlaneState {
                access: to,
                dirty: true,
                last_write_frame: self.clock.current(),
            }
        } else if to.is_read() {
            PlaneState {
                access: to,
                dirty: state.dirty && !synchronizes,
                ..state
            }
        } else {
            PlaneState {
                access: Access::Undefined,
                dirty: false,
                ..state
            }
        };
        logwise::trace_sync!(
            "barrier {name} {from} -> {to}",
            name = logwise::privacy::LogIt(&resource.debug_name()),
            from = logwise::privacy::LogIt(&state.access),
            to = logwise::privacy::LogIt(&to)
        );
        resource.store_plane(plane, next);
        Ok(state.access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DepthFormat, ResourceDescriptor};

    fn validator(severity: Severity) -> TransitionValidator {
        TransitionValidator::new(FrameClock::new(), severity, Arc::new(TrackerStats::new()))
    }

    fn texture() -> GPUResource {
        GPUResource::new(ResourceDescriptor::texture("t", 4, 4))
    }

    #[test]
    fn write_sets_dirty_and_frame() {
        let v = validator(Severity::Fatal);
        v.clock().advance();
        v.clock().advance();
        let t = texture();
        v.transition(&t, Access::RenderTarget).unwrap();
        let state = t.state();
        assert_eq!(state.access, Access::RenderTarget);
        assert!(state.dirty);
        assert_eq!(state.last_write_frame, 2);
    }

    #[test]
    fn read_after_uav_write_needs_barrier() {
        let v = validator(Severity::Fatal);
        let t = texture();
        v.transition(&t, Access::UnorderedAccess).unwrap();
        let err = v.transition(&t, Access::Readable).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::UnsynchronizedHazard {
                current: Access::UnorderedAccess,
                requested: Access::Readable,
                ..
            }
        ));
        //nothing changed
        assert_eq!(t.current_access(), Access::UnorderedAccess);
        assert_eq!(v.stats.snapshot().transition_hazards, 1);

        assert_eq!(v.barrier(&t, Access::Readable).unwrap(), Access::UnorderedAccess);
        assert!(!t.dirty());
        v.transition(&t, Access::Readable).unwrap();
    }

    #[test]
    fn uav_after_uav_needs_barrier_unless_opted_out() {
        let v = validator(Severity::Fatal);
        let t = texture();
        v.transition(&t, Access::UnorderedAccess).unwrap();
        assert!(v.transition(&t, Access::UnorderedAccess).is_err());
        assert_eq!(
            v.barrier(&t, Access::UnorderedAccess).unwrap(),
            Access::UnorderedAccess
        );
        assert!(!t.dirty());
        v.transition(&t, Access::UnorderedAccess).unwrap();
        assert!(t.dirty());

        let overlapping = GPUResource::new(
            ResourceDescriptor::texture("o", 4, 4).with_barrier_policy(BarrierPolicy::NoBarrier),
        );
        v.transition(&overlapping, Access::UnorderedAccess).unwrap();
        v.transition(&overlapping, Access::UnorderedAccess).unwrap();
        v.transition(&overlapping, Access::Readable).unwrap();
        assert!(overlapping.dirty());
        v.barrier(&overlapping, Access::Readable).unwrap();
        assert!(overlapping.dirty());
    }

    #[test]
    fn next_frame_clears_the_hazard() {
        let v = validator(Severity::Fatal);
        let t = texture();
        v.transition(&t, Access::RenderTarget).unwrap();
        v.clock().advance();
        v.transition(&t, Access::Readable).unwrap();
        assert_eq!(t.current_access(), Access::Readable);
        //reads leave dirty alone
        assert!(t.dirty());
    }

    #[test]
    fn writer_may_reacquire_after_read() {
        let v = validator(Severity::Fatal);
        let t = GPUResource::new(
            ResourceDescriptor::texture("t", 4, 4).with_barrier_policy(BarrierPolicy::NoBarrier),
        );
        v.transition(&t, Access::RenderTarget).unwrap();
        v.transition(&t, Access::Readable).unwrap();
        v.transition(&t, Access::Writable).unwrap();
        assert_eq!(t.current_access(), Access::Writable);
    }

    #[test]
    fn warn_severity_applies_and_counts() {
        let v = validator(Severity::Warn);
        let t = texture();
        v.transition(&t, Access::UnorderedAccess).unwrap();
        v.check(&t, Access::Readable).unwrap();
        v.transition(&t, Access::Readable).unwrap();
        assert_eq!(t.current_access(), Access::Readable);
        assert_eq!(v.stats.snapshot().transition_hazards, 1);
    }

    #[test]
    fn check_does_not_mutate() {
        let v = validator(Severity::Fatal);
        let t = texture();
        v.check(&t, Access::RenderTarget).unwrap();
        assert_eq!(t.current_access(), Access::Undefined);
    }

    #[test]
    fn depth_write_does_not_grant_stencil() {
        let v = validator(Severity::Fatal);
        let ds = GPUResource::new(ResourceDescriptor::depth_texture(
            "ds",
            8,
            8,
            DepthFormat::DepthStencil,
        ));
        v.transition_depth_stencil(&ds, ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_NOP)
            .unwrap();
        assert_eq!(ds.current_access(), Access::DepthWrite);
        assert_eq!(
            ds.plane_state(Plane::Stencil).map(|s| s.access),
            Some(Access::Undefined)
        );
        v.transition(&ds, Access::DepthWrite).unwrap();
        assert_eq!(
            ds.plane_state(Plane::Stencil).map(|s| s.access),
            Some(Access::Undefined)
        );
    }

    #[test]
    fn stencil_on_depth_only_is_invalid() {
        let v = validator(Severity::Warn);
        let d = GPUResource::new(ResourceDescriptor::depth_texture(
            "d",
            8,
            8,
            DepthFormat::DepthOnly,
        ));
        let err = v
            .transition_depth_stencil(&d, ExclusiveDepthStencil::DEPTH_WRITE_STENCIL_WRITE)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidPlaneAccess {
                resource: Some(d.id()),
                plane: Plane::Stencil
            }
        );
        //depth plane untouched as well
        assert_eq!(d.current_access(), Access::Undefined);
        assert!(v.transition_plane(&d, Plane::Stencil, Access::Readable).is_err());
    }

    #[test]
    fn failed_depth_stencil_transition_moves_no_plane() {
        let v = validator(Severity::Fatal);
        let ds = GPUResource::new(ResourceDescriptor::depth_texture(
            "ds",
            8,
            8,
            DepthFormat::DepthStencil,
        ));
        v.transition_plane(&ds, Plane::Stencil, Access::DepthWrite).unwrap();
        let err = v.transition_depth_stencil(
            &ds,
            ExclusiveDepthStencil::new(PlaneAccess::Write, PlaneAccess::Read),
        );
        assert!(err.is_err());
        assert_eq!(ds.current_access(), Access::Undefined);
    }
}
