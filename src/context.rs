// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The renderer-facing recording surface.
//!
//! A [`CommandContext`] owns everything needed to turn high-level calls into the minimal set of
//! driver calls: the slot cache, the per-stage dirty masks and uniform buffers, and the
//! render-target binder. One context records one linear stream; contexts recording in parallel
//! each own their own state and only share the [`FrameClock`] and the resources themselves.
//!
//! Draws and dispatches resolve every dirty stage of the selected pipeline before submitting:
//!
//! ```
//! use binds_and_barriers::{CommandContext, FrameClock, RecordingDriver};
//! use binds_and_barriers::config::TrackerConfig;
//! use binds_and_barriers::pipeline::{PipelineDescriptor, PipelineState, Shader};
//! use binds_and_barriers::bindings::stage::Stage;
//! use binds_and_barriers::uniform_buffer::ShaderResourceTable;
//!
//! let mut context = CommandContext::new(RecordingDriver::new(), FrameClock::new(), TrackerConfig::default());
//! let vs = Shader::new(Stage::Vertex, "fullscreen", ShaderResourceTable::default());
//! let pipeline = PipelineState::new(PipelineDescriptor::new(vs, None)).unwrap();
//! context.select_pipeline(&pipeline).unwrap();
//! context.draw(0..3, 0..1).unwrap();
//! assert_eq!(context.stats().draws, 1);
//! ```

use std::ops::Range;
use std::sync::Arc;

use crate::bindings::cache::BindingCache;
use crate::bindings::dirty_tracking::DirtyMask;
use crate::bindings::slot::{MAX_CONSTANT_BUFFER_SLOTS, SlotKey, SlotKind};
use crate::bindings::stage::Stage;
use crate::config::TrackerConfig;
use crate::error::{BindingError, CommandError, TransitionError};
use crate::imp::{DrawCommand, Driver, IndexFormat};
use crate::pipeline::{ComputeState, PipelineState, Shader};
use crate::render_target::{
    ClearValues, DepthStencilTarget, RenderTargetBinder, RenderTargetSet, ScissorRect,
    TargetChange, Viewport,
};
use crate::resolver::{ResolveReport, ResourceTableResolver, UniformBufferSlots};
use crate::resource::{
    Access, ExclusiveDepthStencil, GPUResource, Plane, PlaneAccess, ResourceKind,
};
use crate::stats::{TrackerStats, TrackerStatsSnapshot};
use crate::transition::{FrameClock, TransitionValidator};
use crate::uniform_buffer::LogicalUniformBuffer;

fn span(range: &Range<u32>) -> u32 {
    range.end.saturating_sub(range.start)
}

/// Depth and stencil writes need a bound target opened for writing that plane.
fn check_depth_writes(
    target: Option<&DepthStencilTarget>,
    required: ExclusiveDepthStencil,
) -> Result<(), TransitionError> {
    if !required.is_any_write() {
        return Ok(());
    }
    let Some(target) = target else {
        return Err(TransitionError::InvalidPlaneAccess {
            resource: None,
            plane: if required.is_depth_write() {
                Plane::Primary
            } else {
                Plane::Stencil
            },
        });
    };
    let writes = ExclusiveDepthStencil::new(
        if required.is_depth_write() {
            PlaneAccess::Write
        } else {
            PlaneAccess::Nop
        },
        if required.is_stencil_write() {
            PlaneAccess::Write
        } else {
            PlaneAccess::Nop
        },
    );
    if target.access.permits(writes) {
        return Ok(());
    }
    let plane = if required.is_depth_write() && !target.access.is_depth_write() {
        Plane::Primary
    } else {
        Plane::Stencil
    };
    Err(TransitionError::InvalidPlaneAccess {
        resource: Some(target.resource.id()),
        plane,
    })
}

/// Samplers only go to sampler slots, vertex streams only take buffers.
fn check_kind(resource: &GPUResource, kind: SlotKind) -> Result<(), BindingError> {
    let found = resource.kind();
    let fits = match kind {
        SlotKind::Sampler => found == ResourceKind::Sampler,
        SlotKind::VertexStream => found == ResourceKind::Buffer,
        _ => found != ResourceKind::Sampler,
    };
    if fits {
        Ok(())
    } else {
        Err(BindingError::KindMismatch {
            resource: resource.id(),
            kind,
            found,
        })
    }
}

#[derive(Debug)]
pub struct CommandContext<D: Driver> {
    driver: D,
    config: TrackerConfig,
    stats: Arc<TrackerStats>,
    validator: TransitionValidator,
    cache: BindingCache,
    resolver: ResourceTableResolver,
    binder: RenderTargetBinder,
    dirty: DirtyMask,
    uniform_buffers: UniformBufferSlots,
    pipeline: Option<Arc<PipelineState>>,
    compute: Option<Arc<ComputeState>>,
    viewport: Option<Viewport>,
    scissor: Option<Option<ScissorRect>>,
    stencil_ref: Option<u32>,
    blend_factor: Option<[f32; 4]>,
}

impl<D: Driver> CommandContext<D> {
    pub fn new(driver: D, clock: FrameClock, config: TrackerConfig) -> Self {
        let stats = Arc::new(TrackerStats::new());
        CommandContext {
            driver,
            config,
            validator: TransitionValidator::new(clock, config.severity, stats.clone()),
            cache: BindingCache::new(stats.clone()),
            resolver: ResourceTableResolver::new(stats.clone()),
            binder: RenderTargetBinder::new(stats.clone()),
            dirty: DirtyMask::new(),
            uniform_buffers: UniformBufferSlots::new(),
            pipeline: None,
            compute: None,
            viewport: None,
            scissor: None,
            stencil_ref: None,
            blend_factor: None,
            stats,
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    pub fn clock(&self) -> &FrameClock {
        self.validator.clock()
    }

    pub fn stats(&self) -> TrackerStatsSnapshot {
        self.stats.snapshot()
    }

    /// The live counters, for reading from another thread.
    pub fn stats_handle(&self) -> Arc<TrackerStats> {
        self.stats.clone()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn cache(&self) -> &BindingCache {
        &self.cache
    }

    pub fn dirty_mask(&self) -> &DirtyMask {
        &self.dirty
    }

    pub fn render_targets(&self) -> &RenderTargetSet {
        self.binder.current()
    }

    pub fn uniform_buffer(&self, stage: Stage, index: u8) -> Option<&LogicalUniformBuffer> {
        self.uniform_buffers.get(stage, index)
    }

    fn flush_evictions(&mut self) {
        for key in self.cache.take_evicted() {
            self.driver.bind_slot(key, None);
            self.stats.inc_binds_issued();
        }
    }

    fn invalidate_stage(&mut self, stage: Stage) {
        self.dirty.mark_all(stage);
        self.uniform_buffers.clear_stage(stage);
    }

    /// Makes `pipeline` the active graphics pipeline.
    ///
    /// Every graphics stage is marked fully dirty and its uniform buffers are forgotten, since
    /// the new shaders may read the slots differently.
    ///
    /// A pipeline that writes depth or stencil is checked against the bound depth target here,
    /// if there is one, and again at every draw.
    pub fn select_pipeline(&mut self, pipeline: &Arc<PipelineState>) -> Result<(), CommandError> {
        let target = self.binder.current().depth_stencil.as_ref();
        if target.is_some() {
            check_depth_writes(target, pipeline.depth_stencil().required_access())?;
        }
        let same = self
            .pipeline
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, pipeline));
        if same {
            logwise::trace_sync!(
                "select_pipeline: {id} already selected",
                id = pipeline.id().get()
            );
        } else {
            self.driver.set_pipeline(pipeline);
            self.pipeline = Some(pipeline.clone());
        }
        for stage in Stage::GRAPHICS {
            self.invalidate_stage(stage);
        }
        if self.config.unbind_resources_between_pipelines {
            self.cache.clear_shader_inputs();
            self.flush_evictions();
        }
        Ok(())
    }

    pub fn select_compute_state(&mut self, state: &Arc<ComputeState>) -> Result<(), CommandError> {
        let same = self
            .compute
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, state));
        if same {
            logwise::trace_sync!(
                "select_compute_state: {id} already selected",
                id = state.id().get()
            );
        } else {
            self.driver.set_compute_state(state);
            self.compute = Some(state.clone());
        }
        self.invalidate_stage(Stage::Compute);
        if self.config.unbind_resources_between_pipelines {
            self.cache.clear_shader_inputs();
            self.flush_evictions();
        }
        Ok(())
    }

    /// Binds `buffer` at uniform buffer slot `index` of `stage`.
    ///
    /// Its constant block, if any, goes straight to the matching constant buffer slot. The
    /// resource table is applied at the next draw or dispatch.
    pub fn bind_uniform_buffer(
        &mut self,
        stage: Stage,
        index: u8,
        buffer: &LogicalUniformBuffer,
    ) -> Result<(), CommandError> {
        if index as usize >= MAX_CONSTANT_BUFFER_SLOTS {
            return Err(BindingError::SlotOutOfRange {
                stage,
                kind: SlotKind::ConstantBuffer,
                index: index as u32,
            }
            .into());
        }
        if let Some(constants) = buffer.constants() {
            self.validator.transition(constants, Access::Readable)?;
            if self
                .cache
                .bind(stage, SlotKind::ConstantBuffer, index as u32, Some(constants))?
            {
                let key = SlotKey::new(stage, SlotKind::ConstantBuffer, index as u32);
                self.driver.bind_slot(key, Some(constants));
                self.stats.inc_binds_issued();
            }
        }
        self.uniform_buffers.set(stage, index, Some(buffer.clone()));
        self.dirty.mark(stage, index);
        Ok(())
    }

    fn bind_direct(
        &mut self,
        stage: Stage,
        kind: SlotKind,
        slot: u32,
        resource: Option<&GPUResource>,
        access: Option<Access>,
    ) -> Result<(), CommandError> {
        if slot as usize >= kind.capacity() {
            return Err(BindingError::SlotOutOfRange {
                stage,
                kind,
                index: slot,
            }
            .into());
        }
        if let Some(resource) = resource {
            check_kind(resource, kind)?;
            if let Some(access) = access {
                self.validator.transition(resource, access)?;
            }
        }
        let changed = self.cache.bind(stage, kind, slot, resource)?;
        //inputs the resource just left are unbound before it is bound again
        self.flush_evictions();
        if changed {
            self.driver.bind_slot(SlotKey::new(stage, kind, slot), resource);
            self.stats.inc_binds_issued();
        }
        Ok(())
    }

    /// Binds a texture or buffer view for reading at texture slot `slot` of `stage`, moving it
    /// to [`Access::Readable`]. `None` unbinds the slot.
    pub fn set_shader_texture(
        &mut self,
        stage: Stage,
        slot: u32,
        texture: Option<&GPUResource>,
    ) -> Result<(), CommandError> {
        self.bind_direct(stage, SlotKind::Texture, slot, texture, Some(Access::Readable))
    }

    pub fn set_shader_sampler(
        &mut self,
        stage: Stage,
        slot: u32,
        sampler: Option<&GPUResource>,
    ) -> Result<(), CommandError> {
        self.bind_direct(stage, SlotKind::Sampler, slot, sampler, None)
    }

    /// Binds `resource` at UAV slot `slot` of `stage`, moving it to
    /// [`Access::UnorderedAccess`].
    ///
    /// The resource leaves every shader-input slot and every other UAV slot first. Writing it
    /// again in the same frame needs a barrier in between, even from the same slot.
    pub fn set_uav(
        &mut self,
        stage: Stage,
        slot: u32,
        resource: Option<&GPUResource>,
    ) -> Result<(), CommandError> {
        self.bind_direct(
            stage,
            SlotKind::UnorderedAccess,
            slot,
            resource,
            Some(Access::UnorderedAccess),
        )
    }

    /// Binds a vertex buffer to input stream `stream`.
    pub fn set_stream_source(
        &mut self,
        stream: u32,
        buffer: Option<&GPUResource>,
    ) -> Result<(), CommandError> {
        self.bind_direct(
            Stage::Vertex,
            SlotKind::VertexStream,
            stream,
            buffer,
            Some(Access::Readable),
        )
    }

    /// Moves every resource in `batch` to its access, without barriers.
    ///
    /// All of them are validated first; if any would fail, none moves.
    pub fn transition_resources(
        &mut self,
        batch: &[(&GPUResource, Access)],
    ) -> Result<(), CommandError> {
        for (resource, access) in batch {
            self.validator.check(resource, *access)?;
        }
        for (resource, access) in batch {
            self.validator.transition(resource, *access)?;
        }
        Ok(())
    }

    /// Binds color targets, depth-stencil and output UAVs.
    ///
    /// When the set changes, the viewport is reset to cover the new targets.
    pub fn set_targets(&mut self, targets: RenderTargetSet) -> Result<TargetChange, CommandError> {
        let change =
            self.binder
                .set_targets(targets, &mut self.cache, &self.validator, &mut self.driver)?;
        if let TargetChange::Changed {
            default_viewport: Some(viewport),
        } = change
        {
            self.set_viewport(viewport);
        }
        Ok(change)
    }

    /// Clears the bound targets. Depth and stencil clears need write access to that plane.
    pub fn clear_targets(&mut self, values: ClearValues) -> Result<(), CommandError> {
        let planes = [
            (values.depth.is_some(), Plane::Primary),
            (values.stencil.is_some(), Plane::Stencil),
        ];
        for (_, plane) in planes.into_iter().filter(|(wanted, _)| *wanted) {
            let target = self.binder.current().depth_stencil.as_ref();
            let writable = target.is_some_and(|t| match plane {
                Plane::Primary => t.access.is_depth_write(),
                Plane::Stencil => t.access.is_stencil_write(),
            });
            if !writable {
                return Err(TransitionError::InvalidPlaneAccess {
                    resource: target.map(|t| t.resource.id()),
                    plane,
                }
                .into());
            }
        }
        self.driver.clear(self.binder.current(), &values);
        Ok(())
    }

    fn resolve_stage(&mut self, shader: &Shader) -> Result<ResolveReport, CommandError> {
        let stage = shader.stage();
        if self.dirty.get(stage) == 0 {
            return Ok(ResolveReport::default());
        }
        let report = self.resolver.resolve(
            stage,
            shader,
            &mut self.dirty,
            &self.uniform_buffers,
            &mut self.cache,
            &self.validator,
            &mut self.driver,
        )?;
        Ok(report)
    }

    fn command_resources(command: &DrawCommand) -> [Option<(&GPUResource, Access)>; 2] {
        match command {
            DrawCommand::DrawIndexed { index_buffer, .. } => {
                [Some((index_buffer, Access::Readable)), None]
            }
            DrawCommand::DrawIndirect { arguments, .. }
            | DrawCommand::DispatchIndirect { arguments, .. } => {
                [Some((arguments, Access::IndirectArgument)), None]
            }
            DrawCommand::DrawIndexedIndirect {
                index_buffer,
                arguments,
                ..
            } => [
                Some((index_buffer, Access::Readable)),
                Some((arguments, Access::IndirectArgument)),
            ],
            DrawCommand::Draw { .. } | DrawCommand::Dispatch { .. } => [None, None],
        }
    }

    fn submit(&mut self, command: DrawCommand) -> Result<ResolveReport, CommandError> {
        for (resource, access) in Self::command_resources(&command).into_iter().flatten() {
            self.validator.check(resource, access)?;
        }
        let mut report = ResolveReport::default();
        if command.is_dispatch() {
            let state = self
                .compute
                .clone()
                .ok_or(CommandError::NoPipeline { expected: "compute" })?;
            report += self.resolve_stage(state.shader())?;
        } else {
            let pipeline = self
                .pipeline
                .clone()
                .ok_or(CommandError::NoPipeline { expected: "graphics" })?;
            check_depth_writes(
                self.binder.current().depth_stencil.as_ref(),
                pipeline.depth_stencil().required_access(),
            )?;
            for shader in pipeline.shaders() {
                report += self.resolve_stage(shader)?;
            }
        }
        for (resource, access) in Self::command_resources(&command).into_iter().flatten() {
            self.validator.transition(resource, access)?;
        }
        self.driver.submit(&command);
        if command.is_dispatch() {
            self.stats.inc_dispatches();
        } else {
            self.stats.inc_draws();
        }
        Ok(report)
    }

    pub fn draw(
        &mut self,
        vertices: Range<u32>,
        instances: Range<u32>,
    ) -> Result<ResolveReport, CommandError> {
        self.submit(DrawCommand::Draw {
            vertex_count: span(&vertices),
            instance_count: span(&instances),
            first_vertex: vertices.start,
            first_instance: instances.start,
        })
    }

    /// Indexed draw. The index buffer is moved to [`Access::Readable`].
    pub fn draw_indexed(
        &mut self,
        index_buffer: &GPUResource,
        index_format: IndexFormat,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> Result<ResolveReport, CommandError> {
        self.submit(DrawCommand::DrawIndexed {
            index_buffer: index_buffer.clone(),
            index_format,
            index_count: span(&indices),
            instance_count: span(&instances),
            first_index: indices.start,
            base_vertex,
            first_instance: instances.start,
        })
    }

    pub fn draw_indirect(
        &mut self,
        arguments: &GPUResource,
        offset: u64,
    ) -> Result<ResolveReport, CommandError> {
        self.submit(DrawCommand::DrawIndirect {
            arguments: arguments.clone(),
            offset,
        })
    }

    pub fn draw_indexed_indirect(
        &mut self,
        index_buffer: &GPUResource,
        index_format: IndexFormat,
        arguments: &GPUResource,
        offset: u64,
    ) -> Result<ResolveReport, CommandError> {
        self.submit(DrawCommand::DrawIndexedIndirect {
            index_buffer: index_buffer.clone(),
            index_format,
            arguments: arguments.clone(),
            offset,
        })
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<ResolveReport, CommandError> {
        self.submit(DrawCommand::Dispatch { x, y, z })
    }

    pub fn dispatch_indirect(
        &mut self,
        arguments: &GPUResource,
        offset: u64,
    ) -> Result<ResolveReport, CommandError> {
        self.submit(DrawCommand::DispatchIndirect {
            arguments: arguments.clone(),
            offset,
        })
    }

    /// Moves `resource` to `access` without a barrier.
    pub fn transition(&mut self, resource: &GPUResource, access: Access) -> Result<(), CommandError> {
        self.validator.transition(resource, access)?;
        Ok(())
    }

    /// Synchronizes `resource` and moves it to `access`.
    pub fn barrier(&mut self, resource: &GPUResource, access: Access) -> Result<(), CommandError> {
        let before = self.validator.barrier(resource, access)?;
        self.driver.barrier(resource, before, access);
        Ok(())
    }

    /// Zero-sized viewports are ignored.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport.is_empty() {
            logwise::warn_sync!(
                "Ignoring empty viewport {viewport}",
                viewport = logwise::privacy::LogIt(&viewport)
            );
            return;
        }
        if self.viewport == Some(viewport) {
            return;
        }
        self.driver.set_viewport(viewport);
        self.viewport = Some(viewport);
    }

    pub fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        if self.scissor == Some(rect) {
            return;
        }
        self.driver.set_scissor(rect);
        self.scissor = Some(rect);
    }

    pub fn set_stencil_ref(&mut self, value: u32) {
        if self.stencil_ref == Some(value) {
            return;
        }
        self.driver.set_stencil_ref(value);
        self.stencil_ref = Some(value);
    }

    pub fn set_blend_factor(&mut self, factor: [f32; 4]) {
        if self.blend_factor == Some(factor) {
            return;
        }
        self.driver.set_blend_factor(factor);
        self.blend_factor = Some(factor);
    }

    /// Removes every reference this context holds to `resource`, unbinding it from the driver.
    pub fn release_resource(&mut self, resource: &GPUResource) {
        self.cache.release_resource(resource);
        self.binder.release_resource(resource);
        self.flush_evictions();
    }

    /// Unbinds every slot whose resource has been dropped.
    pub fn prune_released(&mut self) -> usize {
        let pruned = self.cache.prune_released();
        self.flush_evictions();
        pruned
    }

    /// Forgets all bound state, here and in the driver.
    pub fn clear_state(&mut self) {
        self.cache.reset();
        self.binder.reset();
        self.uniform_buffers.clear();
        for stage in Stage::ALL {
            self.dirty.mark_all(stage);
        }
        self.pipeline = None;
        self.compute = None;
        self.viewport = None;
        self.scissor = None;
        self.stencil_ref = None;
        self.blend_factor = None;
        self.driver.reset();
    }
}
