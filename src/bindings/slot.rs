// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Slot kinds and their fixed capacities.

use crate::bindings::stage::Stage;

pub const MAX_TEXTURE_SLOTS: usize = 128;
pub const MAX_SAMPLER_SLOTS: usize = 16;
pub const MAX_UAV_SLOTS: usize = 8;
pub const MAX_CONSTANT_BUFFER_SLOTS: usize = 14;
pub const MAX_RENDER_TARGETS: usize = 8;
pub const MAX_VERTEX_STREAMS: usize = 16;

/// Kind of binding point.
///
/// `RenderTarget` and `DepthStencil` are outputs of the rasterizer and `VertexStream` feeds the
/// input assembler; those are shared by all stages. The rest exist once per stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Shader-readable textures and buffer views.
    Texture,
    Sampler,
    UnorderedAccess,
    ConstantBuffer,
    RenderTarget,
    DepthStencil,
    VertexStream,
}

impl SlotKind {
    pub const fn capacity(self) -> usize {
        match self {
            SlotKind::Texture => MAX_TEXTURE_SLOTS,
            SlotKind::Sampler => MAX_SAMPLER_SLOTS,
            SlotKind::UnorderedAccess => MAX_UAV_SLOTS,
            SlotKind::ConstantBuffer => MAX_CONSTANT_BUFFER_SLOTS,
            SlotKind::RenderTarget => MAX_RENDER_TARGETS,
            SlotKind::DepthStencil => 1,
            SlotKind::VertexStream => MAX_VERTEX_STREAMS,
        }
    }

    pub const fn is_stage_local(self) -> bool {
        !matches!(
            self,
            SlotKind::RenderTarget | SlotKind::DepthStencil | SlotKind::VertexStream
        )
    }

    /// The stage a shared kind is filed under.
    pub const fn home_stage(self) -> Option<Stage> {
        match self {
            SlotKind::RenderTarget | SlotKind::DepthStencil => Some(Stage::Pixel),
            SlotKind::VertexStream => Some(Stage::Vertex),
            _ => None,
        }
    }

    /// Slots through which shaders read memory.
    pub const fn is_shader_input(self) -> bool {
        matches!(self, SlotKind::Texture | SlotKind::ConstantBuffer)
    }
}

/// Address of one binding point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub stage: Stage,
    pub kind: SlotKind,
    pub index: u32,
}

impl SlotKey {
    /// Shared kinds are normalized to their [`home_stage`](SlotKind::home_stage).
    pub fn new(stage: Stage, kind: SlotKind, index: u32) -> Self {
        let stage = kind.home_stage().unwrap_or(stage);
        SlotKey { stage, kind, index }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}[{}]", self.stage, self.kind, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_kinds_ignore_stage() {
        assert_eq!(
            SlotKey::new(Stage::Vertex, SlotKind::RenderTarget, 3),
            SlotKey::new(Stage::Compute, SlotKind::RenderTarget, 3)
        );
        assert_eq!(
            SlotKey::new(Stage::Pixel, SlotKind::VertexStream, 1).stage,
            Stage::Vertex
        );
        assert_ne!(
            SlotKey::new(Stage::Vertex, SlotKind::Texture, 3),
            SlotKey::new(Stage::Pixel, SlotKind::Texture, 3)
        );
    }
}
