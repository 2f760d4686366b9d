// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The per-context record of what is bound where.
//!
//! [`BindingCache::bind`] answers one question: does the driver need to hear about this bind?
//! Binding the resource that already occupies a slot is a no-op and returns `false`.
//!
//! The cache holds [`WeakResource`]s, so it never keeps a released resource alive. Slots are
//! compared by [`ResourceId`].
//!
//! Whenever the cache clears a slot on its own (because the resource became a render target,
//! was released, or the inputs were flushed) the slot is queued; the owner drains the queue with
//! [`BindingCache::take_evicted`] and issues the matching null binds.

use std::sync::Arc;

use crate::bindings::slot::{
    MAX_CONSTANT_BUFFER_SLOTS, MAX_RENDER_TARGETS, MAX_SAMPLER_SLOTS, MAX_TEXTURE_SLOTS,
    MAX_UAV_SLOTS, MAX_VERTEX_STREAMS, SlotKey, SlotKind,
};
use crate::bindings::stage::{STAGE_COUNT, Stage};
use crate::error::BindingError;
use crate::resource::{GPUResource, ResourceId, WeakResource};
use crate::stats::TrackerStats;

#[derive(Debug)]
struct SlotArray<const N: usize> {
    slots: [Option<WeakResource>; N],
    //one past the highest slot ever bound since the last reset
    high_water: usize,
}

impl<const N: usize> SlotArray<N> {
    fn new() -> Self {
        SlotArray {
            slots: std::array::from_fn(|_| None),
            high_water: 0,
        }
    }
    fn view(&mut self) -> SlotsMut<'_> {
        SlotsMut {
            slots: &mut self.slots,
            high_water: &mut self.high_water,
        }
    }
    fn slots(&self) -> &[Option<WeakResource>] {
        &self.slots[..self.high_water]
    }
}

struct SlotsMut<'a> {
    slots: &'a mut [Option<WeakResource>],
    high_water: &'a mut usize,
}

impl SlotsMut<'_> {
    fn id(&self, index: usize) -> Option<ResourceId> {
        self.slots[index].as_ref().map(WeakResource::id)
    }

    fn set(&mut self, index: usize, value: Option<WeakResource>) {
        if value.is_some() && index >= *self.high_water {
            *self.high_water = index + 1;
        }
        self.slots[index] = value;
    }

    /// Clears every slot matching `pred`, returning the cleared indices.
    fn clear_where(&mut self, pred: impl Fn(u32, &WeakResource) -> bool) -> Vec<u32> {
        let mut cleared = Vec::new();
        for (index, slot) in self.slots[..*self.high_water].iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|w| pred(index as u32, w)) {
                *slot = None;
                cleared.push(index as u32);
            }
        }
        cleared
    }

    fn reset(&mut self) {
        for slot in self.slots[..*self.high_water].iter_mut() {
            *slot = None;
        }
        *self.high_water = 0;
    }
}

#[derive(Debug)]
struct StageSlots {
    textures: SlotArray<MAX_TEXTURE_SLOTS>,
    samplers: SlotArray<MAX_SAMPLER_SLOTS>,
    uavs: SlotArray<MAX_UAV_SLOTS>,
    constant_buffers: SlotArray<MAX_CONSTANT_BUFFER_SLOTS>,
    version: u64,
}

impl StageSlots {
    fn new() -> Self {
        StageSlots {
            textures: SlotArray::new(),
            samplers: SlotArray::new(),
            uavs: SlotArray::new(),
            constant_buffers: SlotArray::new(),
            version: 0,
        }
    }
}

const STAGE_LOCAL_KINDS: [SlotKind; 4] = [
    SlotKind::Texture,
    SlotKind::Sampler,
    SlotKind::UnorderedAccess,
    SlotKind::ConstantBuffer,
];
const CLAIMED_BY_OUTPUT_KINDS: [SlotKind; 3] = [
    SlotKind::Texture,
    SlotKind::ConstantBuffer,
    SlotKind::UnorderedAccess,
];
//one array each, whatever stage they are asked for under
const SHARED_KINDS: [SlotKind; 3] = [
    SlotKind::RenderTarget,
    SlotKind::DepthStencil,
    SlotKind::VertexStream,
];

/// Stage x slot kind x index -> resource, for one command context.
#[derive(Debug)]
pub struct BindingCache {
    stages: Box<[StageSlots; STAGE_COUNT]>,
    render_targets: SlotArray<MAX_RENDER_TARGETS>,
    depth_stencil: SlotArray<1>,
    vertex_streams: SlotArray<MAX_VERTEX_STREAMS>,
    version: u64,
    evicted: Vec<SlotKey>,
    stats: Arc<TrackerStats>,
}

impl BindingCache {
    pub fn new(stats: Arc<TrackerStats>) -> Self {
        BindingCache {
            stages: Box::new(std::array::from_fn(|_| StageSlots::new())),
            render_targets: SlotArray::new(),
            depth_stencil: SlotArray::new(),
            vertex_streams: SlotArray::new(),
            version: 0,
            evicted: Vec::new(),
            stats,
        }
    }

    fn slots_mut(&mut self, stage: Stage, kind: SlotKind) -> SlotsMut<'_> {
        let stage_slots = &mut self.stages[stage.index()];
        match kind {
            SlotKind::Texture => stage_slots.textures.view(),
            SlotKind::Sampler => stage_slots.samplers.view(),
            SlotKind::UnorderedAccess => stage_slots.uavs.view(),
            SlotKind::ConstantBuffer => stage_slots.constant_buffers.view(),
            SlotKind::RenderTarget => self.render_targets.view(),
            SlotKind::DepthStencil => self.depth_stencil.view(),
            SlotKind::VertexStream => self.vertex_streams.view(),
        }
    }

    fn slots(&self, stage: Stage, kind: SlotKind) -> &[Option<WeakResource>] {
        let stage_slots = &self.stages[stage.index()];
        match kind {
            SlotKind::Texture => stage_slots.textures.slots(),
            SlotKind::Sampler => stage_slots.samplers.slots(),
            SlotKind::UnorderedAccess => stage_slots.uavs.slots(),
            SlotKind::ConstantBuffer => stage_slots.constant_buffers.slots(),
            SlotKind::RenderTarget => self.render_targets.slots(),
            SlotKind::DepthStencil => self.depth_stencil.slots(),
            SlotKind::VertexStream => self.vertex_streams.slots(),
        }
    }

    fn touch(&mut self, key: SlotKey) {
        self.version += 1;
        if key.kind.is_stage_local() {
            self.stages[key.stage.index()].version += 1;
        }
    }

    /// Records `resource` (or nothing) in a slot.
    ///
    /// Returns `true` if the occupant changed and the driver must be told.
    /// Binding a resource as a render target or UAV first removes it from every shader-input
    /// slot and every other UAV slot; those removals are queued for
    /// [`take_evicted`](Self::take_evicted).
    pub fn bind(
        &mut self,
        stage: Stage,
        kind: SlotKind,
        index: u32,
        resource: Option<&GPUResource>,
    ) -> Result<bool, BindingError> {
        let key = SlotKey::new(stage, kind, index);
        if index as usize >= kind.capacity() {
            return Err(BindingError::SlotOutOfRange {
                stage: key.stage,
                kind,
                index,
            });
        }
        if let Some(resource) = resource {
            if matches!(kind, SlotKind::RenderTarget | SlotKind::UnorderedAccess) {
                self.unbind_resource_everywhere(resource, Some(key));
            }
        }
        let new_id = resource.map(GPUResource::id);
        let mut slots = self.slots_mut(key.stage, kind);
        if slots.id(index as usize) == new_id {
            self.stats.inc_redundant_binds_avoided();
            return Ok(false);
        }
        slots.set(index as usize, resource.map(GPUResource::downgrade));
        self.touch(key);
        logwise::trace_sync!(
            "bind {key} -> {resource}",
            key = logwise::privacy::LogIt(&key),
            resource = logwise::privacy::LogIt(&new_id)
        );
        Ok(true)
    }

    /// Removes `resource` from every shader-input slot (textures and constant buffers) and every
    /// UAV slot on every stage except `keep`, returning how many slots were cleared.
    ///
    /// Render target and depth-stencil slots are not touched.
    pub fn unbind_resource_everywhere(
        &mut self,
        resource: &GPUResource,
        keep: Option<SlotKey>,
    ) -> usize {
        let id = resource.id();
        self.clear_matching(&Stage::ALL, &CLAIMED_BY_OUTPUT_KINDS, |key, w| {
            w.id() == id && Some(key) != keep
        })
    }

    /// Removes `resource` from every slot of every kind.
    pub fn release_resource(&mut self, resource: &GPUResource) -> usize {
        let id = resource.id();
        self.clear_matching(&Stage::ALL, &STAGE_LOCAL_KINDS, |_, w| w.id() == id)
            + self.clear_matching(&[Stage::Pixel], &SHARED_KINDS, |_, w| w.id() == id)
    }

    /// Removes every entry whose resource has been dropped.
    pub fn prune_released(&mut self) -> usize {
        self.clear_matching(&Stage::ALL, &STAGE_LOCAL_KINDS, |_, w| w.is_released())
            + self.clear_matching(&[Stage::Pixel], &SHARED_KINDS, |_, w| w.is_released())
    }

    /// Clears every texture slot on every stage.
    pub fn clear_shader_inputs(&mut self) -> usize {
        self.clear_matching(&Stage::ALL, &[SlotKind::Texture], |_, _| true)
    }

    fn clear_matching(
        &mut self,
        stages: &[Stage],
        kinds: &[SlotKind],
        pred: impl Fn(SlotKey, &WeakResource) -> bool,
    ) -> usize {
        let mut count = 0;
        for &stage in stages {
            for &kind in kinds {
                let cleared = self
                    .slots_mut(stage, kind)
                    .clear_where(|index, w| pred(SlotKey::new(stage, kind, index), w));
                for index in cleared {
                    let key = SlotKey::new(stage, kind, index);
                    self.touch(key);
                    self.evicted.push(key);
                    count += 1;
                }
            }
        }
        count
    }

    /// Slots the cache cleared on its own since the last call.
    pub fn take_evicted(&mut self) -> Vec<SlotKey> {
        std::mem::take(&mut self.evicted)
    }

    pub fn get(&self, key: SlotKey) -> Option<ResourceId> {
        let key = SlotKey::new(key.stage, key.kind, key.index);
        self.slots(key.stage, key.kind)
            .get(key.index as usize)
            .and_then(|slot| slot.as_ref().map(WeakResource::id))
    }

    pub fn resource(&self, key: SlotKey) -> Option<GPUResource> {
        let key = SlotKey::new(key.stage, key.kind, key.index);
        self.slots(key.stage, key.kind)
            .get(key.index as usize)
            .and_then(|slot| slot.as_ref().and_then(WeakResource::upgrade))
    }

    /// Every slot currently holding `resource`.
    pub fn slots_of(&self, resource: &GPUResource) -> Vec<SlotKey> {
        let id = resource.id();
        let mut found = Vec::new();
        for stage in Stage::ALL {
            for kind in STAGE_LOCAL_KINDS {
                self.collect(stage, kind, id, &mut found);
            }
        }
        for kind in SHARED_KINDS {
            self.collect(Stage::Pixel, kind, id, &mut found);
        }
        found
    }

    fn collect(&self, stage: Stage, kind: SlotKind, id: ResourceId, found: &mut Vec<SlotKey>) {
        for (index, slot) in self.slots(stage, kind).iter().enumerate() {
            if slot.as_ref().is_some_and(|w| w.id() == id) {
                found.push(SlotKey::new(stage, kind, index as u32));
            }
        }
    }

    /// Whether `resource` sits in any texture or constant-buffer slot.
    pub fn is_bound_as_input(&self, resource: &GPUResource) -> bool {
        self.slots_of(resource)
            .iter()
            .any(|key| key.kind.is_shader_input())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stage_version(&self, stage: Stage) -> u64 {
        self.stages[stage.index()].version
    }

    /// Forgets every binding without queueing evictions.
    pub fn reset(&mut self) {
        for stage in Stage::ALL {
            for kind in STAGE_LOCAL_KINDS {
                self.slots_mut(stage, kind).reset();
            }
            self.stages[stage.index()].version += 1;
        }
        self.render_targets.view().reset();
        self.depth_stencil.view().reset();
        self.vertex_streams.view().reset();
        self.evicted.clear();
        self.version += 1;
    }
}
