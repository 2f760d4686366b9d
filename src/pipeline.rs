// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Immutable shader and pipeline objects.
//!
//! Pipelines are built once from a descriptor and shared as `Arc`s. The fixed-function parts
//! are opaque to the tracker except for [`DepthStencilState`], whose write flags are checked
//! against the bound depth target.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bindings::stage::Stage;
use crate::error::PipelineError;
use crate::resource::{ExclusiveDepthStencil, PlaneAccess};
use crate::uniform_buffer::ShaderResourceTable;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(u64);

impl PipelineId {
    fn next() -> Self {
        PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
    }
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A compiled shader as far as binding is concerned: its stage and its resource table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    stage: Stage,
    name: String,
    resource_table: ShaderResourceTable,
}

impl Shader {
    pub fn new(stage: Stage, name: &str, resource_table: ShaderResourceTable) -> Self {
        Shader {
            stage,
            name: name.to_string(),
            resource_table,
        }
    }
    pub fn stage(&self) -> Stage {
        self.stage
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn resource_table(&self) -> &ShaderResourceTable {
        &self.resource_table
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    /// RGBA write mask, low four bits.
    pub write_mask: u8,
}

impl Default for BlendState {
    fn default() -> Self {
        BlendState {
            enabled: false,
            write_mask: 0xF,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    pub wireframe: bool,
    pub scissor_enable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub stencil_test: bool,
    pub stencil_write: bool,
}

impl DepthStencilState {
    /// The depth target access this state needs.
    pub fn required_access(&self) -> ExclusiveDepthStencil {
        let plane = |test: bool, write: bool| {
            if write {
                PlaneAccess::Write
            } else if test {
                PlaneAccess::Read
            } else {
                PlaneAccess::Nop
            }
        };
        ExclusiveDepthStencil::new(
            plane(self.depth_test, self.depth_write),
            plane(self.stencil_test, self.stencil_write),
        )
    }
}

/// Everything needed to build a [`PipelineState`].
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub vertex: Shader,
    pub hull: Option<Shader>,
    pub domain: Option<Shader>,
    pub geometry: Option<Shader>,
    pub pixel: Option<Shader>,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub topology: PrimitiveTopology,
}

impl PipelineDescriptor {
    pub fn new(vertex: Shader, pixel: Option<Shader>) -> Self {
        PipelineDescriptor {
            vertex,
            hull: None,
            domain: None,
            geometry: None,
            pixel,
            blend: BlendState::default(),
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            topology: PrimitiveTopology::default(),
        }
    }
}

/// A graphics pipeline.
#[derive(Debug)]
pub struct PipelineState {
    id: PipelineId,
    shaders: [Option<Shader>; 5],
    blend: BlendState,
    rasterizer: RasterizerState,
    depth_stencil: DepthStencilState,
    topology: PrimitiveTopology,
}

fn expect_stage(shader: &Shader, expected: Stage) -> Result<(), PipelineError> {
    if shader.stage != expected {
        Err(PipelineError::StageMismatch {
            expected,
            found: shader.stage,
        })
    } else {
        Ok(())
    }
}

impl PipelineState {
    pub fn new(descriptor: PipelineDescriptor) -> Result<Arc<Self>, PipelineError> {
        let PipelineDescriptor {
            vertex,
            hull,
            domain,
            geometry,
            pixel,
            blend,
            rasterizer,
            depth_stencil,
            topology,
        } = descriptor;
        let shaders = [Some(vertex), hull, domain, geometry, pixel];
        for (shader, stage) in shaders.iter().zip(Stage::GRAPHICS) {
            if let Some(shader) = shader {
                expect_stage(shader, stage)?;
            }
        }
        Ok(Arc::new(PipelineState {
            id: PipelineId::next(),
            shaders,
            blend,
            rasterizer,
            depth_stencil,
            topology,
        }))
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn shader(&self, stage: Stage) -> Option<&Shader> {
        self.shaders.get(stage.index()).and_then(Option::as_ref)
    }

    /// The bound shaders, vertex first.
    pub fn shaders(&self) -> impl Iterator<Item = &Shader> {
        self.shaders.iter().flatten()
    }

    pub fn blend(&self) -> BlendState {
        self.blend
    }
    pub fn rasterizer(&self) -> RasterizerState {
        self.rasterizer
    }
    pub fn depth_stencil(&self) -> DepthStencilState {
        self.depth_stencil
    }
    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }
}

/// A compute pipeline.
#[derive(Debug)]
pub struct ComputeState {
    id: PipelineId,
    shader: Shader,
}

impl ComputeState {
    pub fn new(shader: Shader) -> Result<Arc<Self>, PipelineError> {
        expect_stage(&shader, Stage::Compute)?;
        Ok(Arc::new(ComputeState {
            id: PipelineId::next(),
            shader,
        }))
    }
    pub fn id(&self) -> PipelineId {
        self.id
    }
    pub fn shader(&self) -> &Shader {
        &self.shader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader(stage: Stage) -> Shader {
        Shader::new(stage, "s", ShaderResourceTable::default())
    }

    #[test]
    fn shaders_land_in_their_stage() {
        let mut desc = PipelineDescriptor::new(shader(Stage::Vertex), Some(shader(Stage::Pixel)));
        desc.geometry = Some(shader(Stage::Geometry));
        let pipeline = PipelineState::new(desc).unwrap();
        assert!(pipeline.shader(Stage::Vertex).is_some());
        assert!(pipeline.shader(Stage::Hull).is_none());
        assert!(pipeline.shader(Stage::Compute).is_none());
        let stages: Vec<_> = pipeline.shaders().map(Shader::stage).collect();
        assert_eq!(stages, vec![Stage::Vertex, Stage::Geometry, Stage::Pixel]);
    }

    #[test]
    fn misplaced_shader_is_rejected() {
        let desc = PipelineDescriptor::new(shader(Stage::Pixel), None);
        assert_eq!(
            PipelineState::new(desc).unwrap_err(),
            PipelineError::StageMismatch {
                expected: Stage::Vertex,
                found: Stage::Pixel
            }
        );
        assert!(ComputeState::new(shader(Stage::Vertex)).is_err());
        assert!(ComputeState::new(shader(Stage::Compute)).is_ok());
    }

    #[test]
    fn pipelines_get_distinct_ids() {
        let a = ComputeState::new(shader(Stage::Compute)).unwrap();
        let b = ComputeState::new(shader(Stage::Compute)).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn depth_stencil_requirements() {
        let state = DepthStencilState {
            depth_test: true,
            depth_write: false,
            stencil_test: true,
            stencil_write: true,
        };
        assert_eq!(
            state.required_access(),
            ExclusiveDepthStencil::new(PlaneAccess::Read, PlaneAccess::Write)
        );
        assert_eq!(
            DepthStencilState::default().required_access(),
            ExclusiveDepthStencil::default()
        );
    }
}
