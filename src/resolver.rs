// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Applying shader resource tables to the slot cache.
//!
//! A shader's [`ShaderResourceTable`] says which resource of which uniform buffer goes to
//! which slot. Only uniform buffers whose dirty bit is set are walked, so rebinding one
//! buffer costs exactly its own entries.

use std::sync::Arc;

use crate::bindings::cache::BindingCache;
use crate::bindings::dirty_tracking::DirtyMask;
use crate::bindings::slot::SlotKey;
use crate::bindings::stage::{STAGE_COUNT, Stage};
use crate::bittricks::LowestSetBits;
use crate::error::ResolveError;
use crate::imp::Driver;
use crate::pipeline::Shader;
use crate::resource::{Access, ResourceKind};
use crate::stats::TrackerStats;
use crate::transition::TransitionValidator;
use crate::uniform_buffer::{
    LogicalUniformBuffer, MAX_UNIFORM_BUFFERS, ShaderResourceTable, TableResourceKind,
};

/// The uniform buffers bound to each stage.
#[derive(Debug, Clone, Default)]
pub struct UniformBufferSlots {
    buffers: [[Option<LogicalUniformBuffer>; MAX_UNIFORM_BUFFERS]; STAGE_COUNT],
}

impl UniformBufferSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage: Stage, index: u8) -> Option<&LogicalUniformBuffer> {
        self.buffers[stage.index()]
            .get(index as usize)
            .and_then(Option::as_ref)
    }

    /// Stores `buffer` at `index`, returning the previous occupant.
    ///
    /// Indices past [`MAX_UNIFORM_BUFFERS`] are ignored.
    pub fn set(
        &mut self,
        stage: Stage,
        index: u8,
        buffer: Option<LogicalUniformBuffer>,
    ) -> Option<LogicalUniformBuffer> {
        let slot = self.buffers[stage.index()].get_mut(index as usize)?;
        std::mem::replace(slot, buffer)
    }

    pub fn clear_stage(&mut self, stage: Stage) {
        self.buffers[stage.index()] = Default::default();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Table entries applied to the cache.
    pub binds: u32,
    /// Binds that reached the driver.
    pub changed: u32,
    /// Uniform buffers walked.
    pub buffers: u32,
}

impl std::ops::AddAssign for ResolveReport {
    fn add_assign(&mut self, rhs: Self) {
        self.binds += rhs.binds;
        self.changed += rhs.changed;
        self.buffers += rhs.buffers;
    }
}

#[derive(Debug)]
pub struct ResourceTableResolver {
    stats: Arc<TrackerStats>,
}

impl ResourceTableResolver {
    pub fn new(stats: Arc<TrackerStats>) -> Self {
        ResourceTableResolver { stats }
    }

    /// Binds the resources of every dirty uniform buffer `shader` reads on `stage`.
    ///
    /// On success the stage's dirty mask is zero. On failure the failing bit and every bit not
    /// yet processed stay set.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve<D: Driver>(
        &self,
        stage: Stage,
        shader: &Shader,
        dirty: &mut DirtyMask,
        buffers: &UniformBufferSlots,
        cache: &mut BindingCache,
        validator: &TransitionValidator,
        driver: &mut D,
    ) -> Result<ResolveReport, ResolveError> {
        self.stats.inc_resolve_calls();
        let table = shader.resource_table();
        let pending = dirty.get(stage) & table.buffer_bits();
        let mut report = ResolveReport::default();
        for index in LowestSetBits::new(pending) {
            self.resolve_buffer(
                stage,
                index,
                table,
                buffers,
                cache,
                validator,
                driver,
                &mut report,
            )?;
            dirty.clear_bit(stage, index);
            report.buffers += 1;
        }
        dirty.clear(stage);
        logwise::trace_sync!(
            "resolved {stage}: {binds} binds, {changed} changed",
            stage = logwise::privacy::LogIt(&stage),
            binds = report.binds,
            changed = report.changed
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_buffer<D: Driver>(
        &self,
        stage: Stage,
        index: u8,
        table: &ShaderResourceTable,
        buffers: &UniformBufferSlots,
        cache: &mut BindingCache,
        validator: &TransitionValidator,
        driver: &mut D,
        report: &mut ResolveReport,
    ) -> Result<(), ResolveError> {
        let buffer = buffers
            .get(stage, index)
            .ok_or(ResolveError::MissingUniformBuffer { stage, index })?;
        if let Some(expected) = table.layout_hash(index) {
            let found = buffer.layout_hash();
            if found != expected {
                logwise::error_sync!(
                    "uniform buffer {index} on {stage} ({name}) has layout {found}, shader expects {expected}",
                    index = index,
                    stage = logwise::privacy::LogIt(&stage),
                    name = logwise::privacy::LogIt(buffer.layout().name()),
                    found = logwise::privacy::LogIt(&found),
                    expected = logwise::privacy::LogIt(&expected)
                );
                return Err(ResolveError::LayoutMismatch {
                    stage,
                    index,
                    expected,
                    found,
                });
            }
        }

        //validate the whole group before the first bind
        let mut planned = Vec::new();
        for entry in table.entries_for(index) {
            let resource_index = entry.resource_index();
            let resource =
                buffer
                    .resource(resource_index)
                    .ok_or(ResolveError::ResourceIndexOutOfRange {
                        stage,
                        index,
                        resource_index,
                    })?;
            let wants_sampler = entry.kind() == TableResourceKind::Sampler;
            if wants_sampler != (resource.kind() == ResourceKind::Sampler) {
                return Err(ResolveError::KindMismatch {
                    stage,
                    index,
                    resource_index,
                    expected: entry.kind(),
                    found: resource.kind(),
                });
            }
            let access = match entry.kind() {
                TableResourceKind::Sampler => None,
                TableResourceKind::UnorderedAccess => Some(Access::UnorderedAccess),
                TableResourceKind::Texture | TableResourceKind::ShaderResourceView => {
                    Some(Access::Readable)
                }
            };
            if let Some(access) = access {
                validator.check(resource, access)?;
            }
            planned.push((entry.kind().slot_kind(), entry.bind_slot() as u32, resource, access));
        }

        for (slot_kind, slot, resource, access) in planned {
            if let Some(access) = access {
                validator.transition(resource, access)?;
            }
            report.binds += 1;
            if cache.bind(stage, slot_kind, slot, Some(resource))? {
                driver.bind_slot(SlotKey::new(stage, slot_kind, slot), Some(resource));
                self.stats.inc_binds_issued();
                report.changed += 1;
            }
            for evicted in cache.take_evicted() {
                driver.bind_slot(evicted, None);
                self.stats.inc_binds_issued();
            }
        }
        Ok(())
    }
}
