// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! wgpu backend.
//!
//! wgpu has no persistent binding slots, so the driver keeps a shadow of them and snapshots
//! the state each time a draw, dispatch or clear is submitted. [`WgpuDriver::encode`] later
//! replays the snapshots as render and compute passes.
//!
//! Each stage gets one bind group (vertex 0, pixel 1, compute 0). Inside a group, slots map to
//! binding numbers by kind:
//!
//! | Slot kind        | Binding     |
//! |------------------|-------------|
//! | constant buffer  | `0 + i`     |
//! | texture          | `32 + i`    |
//! | sampler          | `160 + i`   |
//! | unordered access | `176 + i`   |
//!
//! Vertex streams are set on the render pass by stream index.
//!
//! wgpu tracks resource usage itself, so barriers are not forwarded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::bindings::slot::{MAX_UAV_SLOTS, SlotKey, SlotKind};
use crate::bindings::stage::Stage;
use crate::bittricks::LowestSetBits;
use crate::imp::{DrawCommand, Driver, IndexFormat};
use crate::pipeline::{ComputeState, PipelineId, PipelineState, Shader};
use crate::render_target::{ClearValues, RenderTargetSet, ScissorRect, Viewport};
use crate::resource::{Access, ExclusiveDepthStencil, GPUResource, PlaneAccess, ResourceId};

mod error;
pub use error::WgpuError;

const CONSTANT_BUFFER_BASE: u32 = 0;
const TEXTURE_BASE: u32 = 32;
const SAMPLER_BASE: u32 = 160;
const UAV_BASE: u32 = 176;

fn bind_group_index(stage: Stage) -> Result<u32, WgpuError> {
    match stage {
        Stage::Vertex | Stage::Compute => Ok(0),
        Stage::Pixel => Ok(1),
        Stage::Hull | Stage::Domain | Stage::Geometry => Err(WgpuError::UnsupportedStage(stage)),
    }
}

fn binding_number(kind: SlotKind, index: u32) -> Option<u32> {
    match kind {
        SlotKind::ConstantBuffer => Some(CONSTANT_BUFFER_BASE + index),
        SlotKind::Texture => Some(TEXTURE_BASE + index),
        SlotKind::Sampler => Some(SAMPLER_BASE + index),
        SlotKind::UnorderedAccess => Some(UAV_BASE + index),
        SlotKind::RenderTarget | SlotKind::DepthStencil | SlotKind::VertexStream => None,
    }
}

/// The slots one stage's bind group is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupLayout {
    group: u32,
    slots: Vec<(u32, SlotKey)>,
}

/// Every uniform buffer the shader reads contributes its constant block at binding `i`,
/// followed by the slots of its resource table.
fn group_layout(shader: &Shader) -> Result<GroupLayout, WgpuError> {
    let stage = shader.stage();
    let group = bind_group_index(stage)?;
    let table = shader.resource_table();
    let mut keys: Vec<SlotKey> = LowestSetBits::new(table.buffer_bits())
        .map(|index| SlotKey::new(stage, SlotKind::ConstantBuffer, index as u32))
        .collect();
    keys.extend(
        table
            .entries()
            .iter()
            .map(|e| SlotKey::new(stage, e.kind().slot_kind(), e.bind_slot() as u32)),
    );
    let mut slots: Vec<(u32, SlotKey)> = keys
        .into_iter()
        .filter_map(|key| binding_number(key.kind, key.index).map(|b| (b, key)))
        .collect();
    slots.sort_by_key(|(binding, _)| *binding);
    slots.dedup();
    Ok(GroupLayout { group, slots })
}

#[derive(Debug)]
enum Registered {
    View(wgpu::TextureView),
    Buffer(wgpu::Buffer),
    Sampler(wgpu::Sampler),
}

#[derive(Debug)]
struct RegisteredPipeline<P> {
    pipeline: P,
    groups: Vec<GroupLayout>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct TargetSnapshot {
    colors: Vec<ResourceId>,
    depth_stencil: Option<(ResourceId, ExclusiveDepthStencil)>,
}

impl TargetSnapshot {
    fn of(targets: &RenderTargetSet) -> Self {
        TargetSnapshot {
            colors: targets.colors.iter().map(GPUResource::id).collect(),
            depth_stencil: targets
                .depth_stencil
                .as_ref()
                .map(|d| (d.resource.id(), d.access)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DynamicState {
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    stencil_ref: Option<u32>,
    blend_factor: Option<[f32; 4]>,
}

#[derive(Debug)]
struct GroupSnapshot {
    group: u32,
    entries: Vec<(u32, ResourceId)>,
}

#[derive(Debug)]
enum Recorded {
    Clear {
        targets: TargetSnapshot,
        values: ClearValues,
    },
    Draw {
        targets: TargetSnapshot,
        pipeline: PipelineId,
        groups: Vec<GroupSnapshot>,
        streams: Vec<(u32, ResourceId)>,
        dynamic: DynamicState,
        command: DrawCommand,
    },
    Dispatch {
        pipeline: PipelineId,
        groups: Vec<GroupSnapshot>,
        command: DrawCommand,
    },
}

fn wgpu_index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

fn wgpu_color(c: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: c[0] as f64,
        g: c[1] as f64,
        b: c[2] as f64,
        a: c[3] as f64,
    }
}

/// A [`Driver`] that encodes into wgpu command buffers.
///
/// Resources and pipelines must be registered before they are used; the tracker only deals
/// in ids.
#[derive(Debug)]
pub struct WgpuDriver {
    device: wgpu::Device,
    resources: HashMap<ResourceId, Registered>,
    render_pipelines: HashMap<PipelineId, RegisteredPipeline<wgpu::RenderPipeline>>,
    compute_pipelines: HashMap<PipelineId, RegisteredPipeline<wgpu::ComputePipeline>>,
    slots: HashMap<SlotKey, ResourceId>,
    streams: BTreeMap<u32, ResourceId>,
    targets: TargetSnapshot,
    output_uavs: usize,
    pipeline: Option<PipelineId>,
    compute: Option<PipelineId>,
    dynamic: DynamicState,
    recorded: Vec<Recorded>,
    errors: Vec<WgpuError>,
}

impl WgpuDriver {
    pub fn new(device: wgpu::Device) -> Self {
        WgpuDriver {
            device,
            resources: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            slots: HashMap::new(),
            streams: BTreeMap::new(),
            targets: TargetSnapshot::default(),
            output_uavs: 0,
            pipeline: None,
            compute: None,
            dynamic: DynamicState::default(),
            recorded: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn register_texture_view(&mut self, resource: &GPUResource, view: wgpu::TextureView) {
        self.resources.insert(resource.id(), Registered::View(view));
    }

    pub fn register_buffer(&mut self, resource: &GPUResource, buffer: wgpu::Buffer) {
        self.resources.insert(resource.id(), Registered::Buffer(buffer));
    }

    pub fn register_sampler(&mut self, resource: &GPUResource, sampler: wgpu::Sampler) {
        self.resources.insert(resource.id(), Registered::Sampler(sampler));
    }

    pub fn unregister(&mut self, resource: &GPUResource) {
        self.resources.remove(&resource.id());
    }

    /// Associates a wgpu pipeline with `state`.
    ///
    /// The pipeline's bind group layouts must follow the binding numbers described in the
    /// module docs.
    pub fn register_render_pipeline(
        &mut self,
        state: &PipelineState,
        pipeline: wgpu::RenderPipeline,
    ) -> Result<(), WgpuError> {
        let groups = state
            .shaders()
            .map(group_layout)
            .collect::<Result<Vec<_>, _>>()?;
        self.render_pipelines
            .insert(state.id(), RegisteredPipeline { pipeline, groups });
        Ok(())
    }

    pub fn register_compute_pipeline(
        &mut self,
        state: &ComputeState,
        pipeline: wgpu::ComputePipeline,
    ) -> Result<(), WgpuError> {
        let groups = vec![group_layout(state.shader())?];
        self.compute_pipelines
            .insert(state.id(), RegisteredPipeline { pipeline, groups });
        Ok(())
    }

    /// Errors found while recording. The offending commands were dropped.
    pub fn take_errors(&mut self) -> Vec<WgpuError> {
        std::mem::take(&mut self.errors)
    }

    /// Commands waiting for [`encode`](Self::encode).
    pub fn pending(&self) -> usize {
        self.recorded.len()
    }

    fn record_error(&mut self, error: WgpuError) {
        logwise::error_sync!(
            "wgpu driver: {error}",
            error = logwise::privacy::LogIt(&error)
        );
        self.errors.push(error);
    }

    fn snapshot_groups(&self, layouts: &[GroupLayout]) -> Result<Vec<GroupSnapshot>, WgpuError> {
        layouts
            .iter()
            .map(|layout| {
                let entries = layout
                    .slots
                    .iter()
                    .map(|(binding, key)| {
                        self.slots
                            .get(key)
                            .map(|id| (*binding, *id))
                            .ok_or(WgpuError::MissingBinding(*key))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GroupSnapshot {
                    group: layout.group,
                    entries,
                })
            })
            .collect()
    }

    fn snapshot(&self, command: &DrawCommand) -> Result<Recorded, WgpuError> {
        if command.is_dispatch() {
            let id = self.compute.ok_or(WgpuError::NoPipeline)?;
            let registered = self
                .compute_pipelines
                .get(&id)
                .ok_or(WgpuError::UnknownPipeline(id))?;
            Ok(Recorded::Dispatch {
                pipeline: id,
                groups: self.snapshot_groups(&registered.groups)?,
                command: command.clone(),
            })
        } else {
            let id = self.pipeline.ok_or(WgpuError::NoPipeline)?;
            let registered = self
                .render_pipelines
                .get(&id)
                .ok_or(WgpuError::UnknownPipeline(id))?;
            if self.targets.colors.is_empty() && self.targets.depth_stencil.is_none() {
                return Err(WgpuError::NoTargets);
            }
            Ok(Recorded::Draw {
                targets: self.targets.clone(),
                pipeline: id,
                groups: self.snapshot_groups(&registered.groups)?,
                streams: self.streams.iter().map(|(i, id)| (*i, *id)).collect(),
                dynamic: self.dynamic,
                command: command.clone(),
            })
        }
    }

    fn view(&self, id: ResourceId) -> Result<&wgpu::TextureView, WgpuError> {
        match self.resources.get(&id) {
            Some(Registered::View(view)) => Ok(view),
            _ => Err(WgpuError::UnknownResource(id)),
        }
    }

    fn buffer(&self, id: ResourceId) -> Result<&wgpu::Buffer, WgpuError> {
        match self.resources.get(&id) {
            Some(Registered::Buffer(buffer)) => Ok(buffer),
            _ => Err(WgpuError::UnknownResource(id)),
        }
    }

    fn create_bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        entries: &[(u32, ResourceId)],
    ) -> Result<wgpu::BindGroup, WgpuError> {
        let mut wgpu_entries = Vec::with_capacity(entries.len());
        for (binding, id) in entries {
            let resource = match self.resources.get(id) {
                Some(Registered::View(view)) => wgpu::BindingResource::TextureView(view),
                Some(Registered::Buffer(buffer)) => {
                    wgpu::BindingResource::Buffer(buffer.as_entire_buffer_binding())
                }
                Some(Registered::Sampler(sampler)) => wgpu::BindingResource::Sampler(sampler),
                None => return Err(WgpuError::UnknownResource(*id)),
            };
            wgpu_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("binds_and_barriers"),
            layout,
            entries: &wgpu_entries,
        }))
    }

    fn begin_render_pass<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
        targets: &TargetSnapshot,
        clear: Option<&ClearValues>,
    ) -> Result<wgpu::RenderPass<'e>, WgpuError> {
        let color_load = match clear.and_then(|c| c.color) {
            Some(color) => wgpu::LoadOp::Clear(wgpu_color(color)),
            None => wgpu::LoadOp::Load,
        };
        let mut color_attachments = Vec::with_capacity(targets.colors.len());
        for id in &targets.colors {
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view: self.view(*id)?,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
            }));
        }
        let depth_stencil_attachment = match targets.depth_stencil {
            Some((id, access)) => {
                let depth_load = match clear.and_then(|c| c.depth) {
                    Some(depth) => wgpu::LoadOp::Clear(depth),
                    None => wgpu::LoadOp::Load,
                };
                let stencil_load = match clear.and_then(|c| c.stencil) {
                    Some(stencil) => wgpu::LoadOp::Clear(stencil),
                    None => wgpu::LoadOp::Load,
                };
                //a plane without write access is attached read-only
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.view(id)?,
                    depth_ops: (access.depth == PlaneAccess::Write).then_some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: (access.stencil == PlaneAccess::Write).then_some(
                        wgpu::Operations {
                            load: stencil_load,
                            store: wgpu::StoreOp::Store,
                        },
                    ),
                })
            }
            None => None,
        };
        if color_attachments.is_empty() && depth_stencil_attachment.is_none() {
            return Err(WgpuError::NoTargets);
        }
        Ok(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("binds_and_barriers"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &TargetSnapshot,
        pipeline: PipelineId,
        groups: &[GroupSnapshot],
        streams: &[(u32, ResourceId)],
        dynamic: &DynamicState,
        command: &DrawCommand,
    ) -> Result<(), WgpuError> {
        let registered = self
            .render_pipelines
            .get(&pipeline)
            .ok_or(WgpuError::UnknownPipeline(pipeline))?;
        let mut bind_groups = Vec::with_capacity(groups.len());
        for group in groups {
            let layout = registered.pipeline.get_bind_group_layout(group.group);
            bind_groups.push((group.group, self.create_bind_group(&layout, &group.entries)?));
        }

        let mut pass = self.begin_render_pass(encoder, targets, None)?;
        pass.set_pipeline(&registered.pipeline);
        for (index, bind_group) in &bind_groups {
            pass.set_bind_group(*index, bind_group, &[]);
        }
        for (stream, id) in streams {
            pass.set_vertex_buffer(*stream, self.buffer(*id)?.slice(..));
        }
        if let Some(v) = dynamic.viewport {
            pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
        }
        if let Some(s) = dynamic.scissor {
            pass.set_scissor_rect(s.x, s.y, s.width, s.height);
        }
        if let Some(stencil) = dynamic.stencil_ref {
            pass.set_stencil_reference(stencil);
        }
        if let Some(factor) = dynamic.blend_factor {
            pass.set_blend_constant(wgpu_color(factor));
        }

        match command {
            DrawCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => pass.draw(
                *first_vertex..first_vertex + vertex_count,
                *first_instance..first_instance + instance_count,
            ),
            DrawCommand::DrawIndexed {
                index_buffer,
                index_format,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                let buffer = self.buffer(index_buffer.id())?;
                pass.set_index_buffer(buffer.slice(..), wgpu_index_format(*index_format));
                pass.draw_indexed(
                    *first_index..first_index + index_count,
                    *base_vertex,
                    *first_instance..first_instance + instance_count,
                );
            }
            DrawCommand::DrawIndirect { arguments, offset } => {
                pass.draw_indirect(self.buffer(arguments.id())?, *offset);
            }
            DrawCommand::DrawIndexedIndirect {
                index_buffer,
                index_format,
                arguments,
                offset,
            } => {
                let buffer = self.buffer(index_buffer.id())?;
                pass.set_index_buffer(buffer.slice(..), wgpu_index_format(*index_format));
                pass.draw_indexed_indirect(self.buffer(arguments.id())?, *offset);
            }
            DrawCommand::Dispatch { .. } | DrawCommand::DispatchIndirect { .. } => {}
        }
        Ok(())
    }

    fn encode_dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: PipelineId,
        groups: &[GroupSnapshot],
        command: &DrawCommand,
    ) -> Result<(), WgpuError> {
        let registered = self
            .compute_pipelines
            .get(&pipeline)
            .ok_or(WgpuError::UnknownPipeline(pipeline))?;
        let mut bind_groups = Vec::with_capacity(groups.len());
        for group in groups {
            let layout = registered.pipeline.get_bind_group_layout(group.group);
            bind_groups.push((group.group, self.create_bind_group(&layout, &group.entries)?));
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("binds_and_barriers"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&registered.pipeline);
        for (index, bind_group) in &bind_groups {
            pass.set_bind_group(*index, bind_group, &[]);
        }
        match command {
            DrawCommand::Dispatch { x, y, z } => pass.dispatch_workgroups(*x, *y, *z),
            DrawCommand::DispatchIndirect { arguments, offset } => {
                pass.dispatch_workgroups_indirect(self.buffer(arguments.id())?, *offset)
            }
            _ => {}
        }
        Ok(())
    }

    /// Encodes everything submitted since the last call, one pass per command.
    ///
    /// Returns the number of commands encoded. Encoding stops at the first command that
    /// refers to something unregistered; the rest are dropped.
    pub fn encode(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<usize, WgpuError> {
        let recorded = std::mem::take(&mut self.recorded);
        let mut encoded = 0;
        for item in &recorded {
            match item {
                Recorded::Clear { targets, values } => {
                    let pass = self.begin_render_pass(encoder, targets, Some(values))?;
                    std::mem::drop(pass);
                }
                Recorded::Draw {
                    targets,
                    pipeline,
                    groups,
                    streams,
                    dynamic,
                    command,
                } => self.encode_draw(
                    encoder, targets, *pipeline, groups, streams, dynamic, command,
                )?,
                Recorded::Dispatch {
                    pipeline,
                    groups,
                    command,
                } => self.encode_dispatch(encoder, *pipeline, groups, command)?,
            }
            encoded += 1;
        }
        logwise::trace_sync!("wgpu driver encoded {n} commands", n = encoded);
        Ok(encoded)
    }
}

impl Driver for WgpuDriver {
    fn bind_slot(&mut self, key: SlotKey, resource: Option<&GPUResource>) {
        if key.kind == SlotKind::VertexStream {
            match resource {
                Some(resource) => self.streams.insert(key.index, resource.id()),
                None => self.streams.remove(&key.index),
            };
            return;
        }
        if binding_number(key.kind, key.index).is_none() {
            return;
        }
        if let Err(e) = bind_group_index(key.stage) {
            self.record_error(e);
            return;
        }
        match resource {
            Some(resource) => {
                self.slots.insert(key, resource.id());
            }
            None => {
                self.slots.remove(&key);
            }
        }
    }

    fn set_render_targets(&mut self, targets: &RenderTargetSet) {
        //output UAVs share the pixel stage's UAV slots
        for index in 0..self.output_uavs.min(MAX_UAV_SLOTS) {
            self.slots.remove(&SlotKey::new(
                Stage::Pixel,
                SlotKind::UnorderedAccess,
                index as u32,
            ));
        }
        for (index, uav) in targets.uavs.iter().enumerate() {
            self.slots.insert(
                SlotKey::new(Stage::Pixel, SlotKind::UnorderedAccess, index as u32),
                uav.id(),
            );
        }
        self.output_uavs = targets.uavs.len();
        self.targets = TargetSnapshot::of(targets);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.dynamic.viewport = Some(viewport);
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.dynamic.scissor = rect;
    }

    fn set_stencil_ref(&mut self, value: u32) {
        self.dynamic.stencil_ref = Some(value);
    }

    fn set_blend_factor(&mut self, factor: [f32; 4]) {
        self.dynamic.blend_factor = Some(factor);
    }

    fn set_pipeline(&mut self, pipeline: &Arc<PipelineState>) {
        self.pipeline = Some(pipeline.id());
    }

    fn set_compute_state(&mut self, state: &Arc<ComputeState>) {
        self.compute = Some(state.id());
    }

    fn barrier(&mut self, resource: &GPUResource, before: Access, after: Access) {
        logwise::trace_sync!(
            "wgpu driver: barrier on {resource} {before} -> {after} left to wgpu",
            resource = logwise::privacy::LogIt(&resource.id()),
            before = logwise::privacy::LogIt(&before),
            after = logwise::privacy::LogIt(&after)
        );
    }

    fn clear(&mut self, targets: &RenderTargetSet, values: &ClearValues) {
        self.recorded.push(Recorded::Clear {
            targets: TargetSnapshot::of(targets),
            values: *values,
        });
    }

    fn submit(&mut self, command: &DrawCommand) {
        match self.snapshot(command) {
            Ok(recorded) => self.recorded.push(recorded),
            Err(e) => self.record_error(e),
        }
    }

    fn reset(&mut self) {
        self.slots.clear();
        self.streams.clear();
        self.targets = TargetSnapshot::default();
        self.output_uavs = 0;
        self.pipeline = None;
        self.compute = None;
        self.dynamic = DynamicState::default();
    }
}
