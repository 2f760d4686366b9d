// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The seam between the tracker and a graphics API.
//!
//! The tracker decides *what* has to reach the driver; a [`Driver`] decides how. Every call
//! made here has already been deduplicated and validated.

use std::sync::Arc;

use crate::bindings::slot::SlotKey;
use crate::pipeline::{ComputeState, PipelineState};
use crate::render_target::{ClearValues, RenderTargetSet, ScissorRect, Viewport};
use crate::resource::{Access, GPUResource};

mod recording;
pub use recording::{DriverCall, RecordingDriver};

#[cfg(feature = "backend_wgpu")]
mod wgpu;
#[cfg(feature = "backend_wgpu")]
pub use wgpu::{WgpuDriver, WgpuError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// A draw or dispatch, submitted after every dirty stage has been resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawCommand {
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_buffer: GPUResource,
        index_format: IndexFormat,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    DrawIndirect {
        arguments: GPUResource,
        offset: u64,
    },
    DrawIndexedIndirect {
        index_buffer: GPUResource,
        index_format: IndexFormat,
        arguments: GPUResource,
        offset: u64,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        arguments: GPUResource,
        offset: u64,
    },
}

impl DrawCommand {
    pub fn is_dispatch(&self) -> bool {
        matches!(
            self,
            DrawCommand::Dispatch { .. } | DrawCommand::DispatchIndirect { .. }
        )
    }
}

pub trait Driver {
    /// `None` unbinds the slot.
    fn bind_slot(&mut self, key: SlotKey, resource: Option<&GPUResource>);
    fn set_render_targets(&mut self, targets: &RenderTargetSet);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_scissor(&mut self, rect: Option<ScissorRect>);
    fn set_stencil_ref(&mut self, value: u32);
    fn set_blend_factor(&mut self, factor: [f32; 4]);
    fn set_pipeline(&mut self, pipeline: &Arc<PipelineState>);
    fn set_compute_state(&mut self, state: &Arc<ComputeState>);
    fn barrier(&mut self, resource: &GPUResource, before: Access, after: Access);
    /// Clears the active targets.
    fn clear(&mut self, targets: &RenderTargetSet, values: &ClearValues);
    fn submit(&mut self, command: &DrawCommand);
    /// Drops all bound state.
    fn reset(&mut self);
}
