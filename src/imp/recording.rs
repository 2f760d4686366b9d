// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::sync::Arc;

use crate::bindings::slot::SlotKey;
use crate::imp::{DrawCommand, Driver};
use crate::pipeline::{ComputeState, PipelineId, PipelineState};
use crate::render_target::{ClearValues, RenderTargetSet, ScissorRect, Viewport};
use crate::resource::{Access, ExclusiveDepthStencil, GPUResource, ResourceId};

/// One call received by a [`RecordingDriver`].
#[derive(Clone, Debug, PartialEq)]
pub enum DriverCall {
    BindSlot {
        key: SlotKey,
        resource: Option<ResourceId>,
    },
    SetRenderTargets {
        colors: Vec<ResourceId>,
        depth_stencil: Option<(ResourceId, ExclusiveDepthStencil)>,
        uavs: Vec<ResourceId>,
    },
    SetViewport(Viewport),
    SetScissor(Option<ScissorRect>),
    SetStencilRef(u32),
    SetBlendFactor([f32; 4]),
    SetPipeline(PipelineId),
    SetComputeState(PipelineId),
    Barrier {
        resource: ResourceId,
        before: Access,
        after: Access,
    },
    Clear(ClearValues),
    Submit(DrawCommand),
    Reset,
}

impl DriverCall {
    pub fn is_bind(&self) -> bool {
        matches!(self, DriverCall::BindSlot { .. })
    }
}

/// A [`Driver`] that only remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: Vec<DriverCall>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    /// Returns the recorded calls and starts over.
    pub fn take(&mut self) -> Vec<DriverCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn bind_count(&self) -> usize {
        self.calls.iter().filter(|c| c.is_bind()).count()
    }
}

impl Driver for RecordingDriver {
    fn bind_slot(&mut self, key: SlotKey, resource: Option<&GPUResource>) {
        self.calls.push(DriverCall::BindSlot {
            key,
            resource: resource.map(GPUResource::id),
        });
    }

    fn set_render_targets(&mut self, targets: &RenderTargetSet) {
        self.calls.push(DriverCall::SetRenderTargets {
            colors: targets.colors.iter().map(GPUResource::id).collect(),
            depth_stencil: targets
                .depth_stencil
                .as_ref()
                .map(|d| (d.resource.id(), d.access)),
            uavs: targets.uavs.iter().map(GPUResource::id).collect(),
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.calls.push(DriverCall::SetViewport(viewport));
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.calls.push(DriverCall::SetScissor(rect));
    }

    fn set_stencil_ref(&mut self, value: u32) {
        self.calls.push(DriverCall::SetStencilRef(value));
    }

    fn set_blend_factor(&mut self, factor: [f32; 4]) {
        self.calls.push(DriverCall::SetBlendFactor(factor));
    }

    fn set_pipeline(&mut self, pipeline: &Arc<PipelineState>) {
        self.calls.push(DriverCall::SetPipeline(pipeline.id()));
    }

    fn set_compute_state(&mut self, state: &Arc<ComputeState>) {
        self.calls.push(DriverCall::SetComputeState(state.id()));
    }

    fn barrier(&mut self, resource: &GPUResource, before: Access, after: Access) {
        self.calls.push(DriverCall::Barrier {
            resource: resource.id(),
            before,
            after,
        });
    }

    fn clear(&mut self, _targets: &RenderTargetSet, values: &ClearValues) {
        self.calls.push(DriverCall::Clear(*values));
    }

    fn submit(&mut self, command: &DrawCommand) {
        self.calls.push(DriverCall::Submit(command.clone()));
    }

    fn reset(&mut self) {
        self.calls.push(DriverCall::Reset);
    }
}
