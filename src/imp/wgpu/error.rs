// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::fmt::Display;

use crate::bindings::slot::SlotKey;
use crate::bindings::stage::Stage;
use crate::pipeline::PipelineId;
use crate::resource::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WgpuError {
    /// No view, buffer or sampler was registered for this resource.
    UnknownResource(ResourceId),
    UnknownPipeline(PipelineId),
    /// A command was submitted before any pipeline of its kind was set.
    NoPipeline,
    /// wgpu has no hull, domain or geometry stage.
    UnsupportedStage(Stage),
    /// The shader reads a slot that nothing is bound to.
    MissingBinding(SlotKey),
    /// A render pass needs at least one color or depth target.
    NoTargets,
}

impl Display for WgpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WgpuError::UnknownResource(id) => write!(f, "Resource {id} is not registered with the wgpu driver"),
            WgpuError::UnknownPipeline(id) => {
                write!(f, "Pipeline {} is not registered with the wgpu driver", id.get())
            }
            WgpuError::NoPipeline => write!(f, "No pipeline set"),
            WgpuError::UnsupportedStage(stage) => write!(f, "wgpu has no {stage} stage"),
            WgpuError::MissingBinding(key) => write!(f, "Nothing bound at {key}"),
            WgpuError::NoTargets => write!(f, "Render pass without any targets"),
        }
    }
}
