// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::sync::Arc;

use binds_and_barriers::bindings::{SlotKey, SlotKind, Stage};
use binds_and_barriers::config::{Severity, TrackerConfig};
use binds_and_barriers::error::{BindingError, CommandError, ResolveError, TransitionError};
use binds_and_barriers::pipeline::{PipelineDescriptor, PipelineState, Shader};
use binds_and_barriers::resource::{Access, GPUResource, ResourceDescriptor, ResourceKind};
use binds_and_barriers::uniform_buffer::{
    LogicalUniformBuffer, ShaderResourceTable, TableEntryDesc, TableResourceKind,
    UniformBufferLayout,
};
use binds_and_barriers::{CommandContext, DriverCall, FrameClock, RecordingDriver};

fn context(config: TrackerConfig) -> CommandContext<RecordingDriver> {
    CommandContext::new(RecordingDriver::new(), FrameClock::new(), config)
}

fn fatal() -> TrackerConfig {
    TrackerConfig::default().with_severity(Severity::Fatal)
}

fn material_layout() -> Arc<UniformBufferLayout> {
    UniformBufferLayout::new(
        "material",
        64,
        vec![TableResourceKind::ShaderResourceView, TableResourceKind::Sampler],
    )
}

/// A pixel shader reading `material_layout` at each of `indices`: the SRV goes to texture slot
/// `5 + index`, the sampler to sampler slot `index`.
fn pixel_shader(indices: &[u8], layout: &UniformBufferLayout) -> Shader {
    let mut descs = Vec::new();
    for &index in indices {
        descs.push(TableEntryDesc {
            buffer_index: index,
            kind: TableResourceKind::ShaderResourceView,
            resource_index: 0,
            bind_slot: 5 + index as u32,
        });
        descs.push(TableEntryDesc {
            buffer_index: index,
            kind: TableResourceKind::Sampler,
            resource_index: 1,
            bind_slot: index as u32,
        });
    }
    let hashes: Vec<_> = indices.iter().map(|i| (*i, layout.hash())).collect();
    Shader::new(
        Stage::Pixel,
        "material_ps",
        ShaderResourceTable::new(&descs, &hashes).unwrap(),
    )
}

fn pipeline(pixel: Shader) -> Arc<PipelineState> {
    let vs = Shader::new(Stage::Vertex, "vs", ShaderResourceTable::default());
    PipelineState::new(PipelineDescriptor::new(vs, Some(pixel))).unwrap()
}

fn material(layout: &Arc<UniformBufferLayout>, name: &str) -> (LogicalUniformBuffer, GPUResource) {
    let texture = GPUResource::new(ResourceDescriptor::texture(name, 32, 32));
    let sampler = GPUResource::new(ResourceDescriptor::sampler("linear"));
    let buffer = LogicalUniformBuffer::new(layout.clone(), vec![texture.clone(), sampler], None)
        .unwrap();
    (buffer, texture)
}

#[test]
fn identical_binds_reach_driver_once() {
    let mut cx = context(fatal());
    let layout = material_layout();
    let p = pipeline(pixel_shader(&[0], &layout));
    let (buffer, _) = material(&layout, "albedo");

    cx.select_pipeline(&p).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 0, &buffer).unwrap();
    cx.draw(0..3, 0..1).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 0, &buffer).unwrap();
    cx.draw(0..3, 0..1).unwrap();

    assert_eq!(cx.driver().bind_count(), 2);
    let stats = cx.stats();
    assert_eq!(stats.binds_issued, 2);
    assert_eq!(stats.redundant_binds_avoided, 2);
    assert_eq!(stats.draws, 2);
}

#[test]
fn scenario_one_dirty_buffer_of_two() {
    let mut cx = context(fatal());
    let layout = material_layout();
    let p = pipeline(pixel_shader(&[2, 7], &layout));
    let (first, texture) = material(&layout, "first");
    let (second, _) = material(&layout, "second");

    cx.select_pipeline(&p).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 2, &first).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 7, &second).unwrap();
    cx.draw(0..3, 0..1).unwrap();
    cx.driver_mut().take();

    //only slot 2 changes
    let replacement_texture = GPUResource::new(ResourceDescriptor::texture("replacement", 32, 32));
    let sampler = first.resource(1).unwrap().clone();
    let replacement =
        LogicalUniformBuffer::new(layout.clone(), vec![replacement_texture.clone(), sampler], None)
            .unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 2, &replacement).unwrap();
    assert_eq!(cx.dirty_mask().get(Stage::Pixel), 1 << 2);
    let report = cx.draw(0..3, 0..1).unwrap();
    assert_eq!(report.binds, 2);
    assert_eq!(report.buffers, 1);
    assert_eq!(cx.dirty_mask().get(Stage::Pixel), 0);

    //the sampler is shared, so only the texture reaches the driver
    let binds: Vec<_> = cx
        .driver()
        .calls()
        .iter()
        .filter(|c| c.is_bind())
        .cloned()
        .collect();
    assert_eq!(
        binds,
        vec![DriverCall::BindSlot {
            key: SlotKey::new(Stage::Pixel, SlotKind::Texture, 7),
            resource: Some(replacement_texture.id())
        }]
    );
    assert_ne!(texture.id(), replacement_texture.id());
    //slot 7's texture at slot 12 is untouched
    assert!(cx
        .cache()
        .get(SlotKey::new(Stage::Pixel, SlotKind::Texture, 12))
        .is_some());
}

#[test]
fn dirty_masks_converge_after_draw() {
    let mut cx = context(fatal());
    let layout = material_layout();
    let p = pipeline(pixel_shader(&[0, 1], &layout));
    let (a, _) = material(&layout, "a");
    let (b, _) = material(&layout, "b");
    cx.select_pipeline(&p).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 0, &a).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 1, &b).unwrap();
    let report = cx.draw(0..3, 0..1).unwrap();
    assert_eq!(report.binds, 4);
    assert!(cx.dirty_mask().is_clean(Stage::Vertex));
    assert!(cx.dirty_mask().is_clean(Stage::Pixel));
    //stages the pipeline does not use are left alone
    assert!(!cx.dirty_mask().is_clean(Stage::Geometry));
}

#[test]
fn layout_mismatch_stops_the_draw() {
    let mut cx = context(fatal());
    let layout = material_layout();
    let other = UniformBufferLayout::new(
        "material_with_normal_map",
        64,
        vec![TableResourceKind::ShaderResourceView, TableResourceKind::Sampler],
    );
    let p = pipeline(pixel_shader(&[0], &layout));
    let (buffer, _) = material(&other, "albedo");
    cx.select_pipeline(&p).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 0, &buffer).unwrap();
    cx.driver_mut().take();

    let err = cx.draw(0..3, 0..1).unwrap_err();
    assert!(matches!(
        err,
        CommandError::Resolve(ResolveError::LayoutMismatch { index: 0, .. })
    ));
    assert!(cx.driver().calls().is_empty());
    assert_eq!(cx.stats().draws, 0);
}

#[test]
fn switching_pipelines_requires_rebinding() {
    let mut cx = context(fatal());
    let layout = material_layout();
    let first = pipeline(pixel_shader(&[0], &layout));
    let second = pipeline(pixel_shader(&[0], &layout));
    let (buffer, _) = material(&layout, "albedo");

    cx.select_pipeline(&first).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 0, &buffer).unwrap();
    cx.draw(0..3, 0..1).unwrap();

    cx.select_pipeline(&second).unwrap();
    assert!(cx.uniform_buffer(Stage::Pixel, 0).is_none());
    assert!(matches!(
        cx.draw(0..3, 0..1).unwrap_err(),
        CommandError::Resolve(ResolveError::MissingUniformBuffer { index: 0, .. })
    ));
    cx.bind_uniform_buffer(Stage::Pixel, 0, &buffer).unwrap();
    let report = cx.draw(0..3, 0..1).unwrap();
    //already bound from the first pipeline
    assert_eq!(report.changed, 0);
}

#[test]
fn unbind_between_pipelines_clears_textures() {
    let config = TrackerConfig {
        unbind_resources_between_pipelines: true,
        ..fatal()
    };
    let mut cx = context(config);
    let layout = material_layout();
    let first = pipeline(pixel_shader(&[0], &layout));
    let second = pipeline(pixel_shader(&[0], &layout));
    let (buffer, texture) = material(&layout, "albedo");
    cx.select_pipeline(&first).unwrap();
    cx.bind_uniform_buffer(Stage::Pixel, 0, &buffer).unwrap();
    cx.draw(0..3, 0..1).unwrap();
    cx.driver_mut().take();

    cx.select_pipeline(&second).unwrap();
    assert!(!cx.cache().is_bound_as_input(&texture));
    assert!(cx.driver().calls().contains(&DriverCall::BindSlot {
        key: SlotKey::new(Stage::Pixel, SlotKind::Texture, 5),
        resource: None
    }));
}

#[test]
fn dropped_resources_are_pruned() {
    let mut cx = context(fatal());
    let layout = material_layout();
    let p = pipeline(pixel_shader(&[0], &layout));
    {
        let (buffer, _) = material(&layout, "transient");
        cx.select_pipeline(&p).unwrap();
        cx.bind_uniform_buffer(Stage::Pixel, 0, &buffer).unwrap();
        cx.draw(0..3, 0..1).unwrap();
        cx.select_pipeline(&p).unwrap();
    }
    assert_eq!(cx.prune_released(), 2);
    assert_eq!(
        cx.cache().get(SlotKey::new(Stage::Pixel, SlotKind::Texture, 5)),
        None
    );
}

#[test]
fn direct_binds_reach_driver_once() {
    let mut cx = context(fatal());
    let albedo = GPUResource::new(ResourceDescriptor::texture("albedo", 32, 32));
    let linear = GPUResource::new(ResourceDescriptor::sampler("linear"));
    cx.set_shader_texture(Stage::Pixel, 3, Some(&albedo)).unwrap();
    cx.set_shader_texture(Stage::Pixel, 3, Some(&albedo)).unwrap();
    cx.set_shader_sampler(Stage::Pixel, 0, Some(&linear)).unwrap();
    cx.set_shader_sampler(Stage::Pixel, 0, Some(&linear)).unwrap();

    assert_eq!(
        cx.driver().calls(),
        &[
            DriverCall::BindSlot {
                key: SlotKey::new(Stage::Pixel, SlotKind::Texture, 3),
                resource: Some(albedo.id())
            },
            DriverCall::BindSlot {
                key: SlotKey::new(Stage::Pixel, SlotKind::Sampler, 0),
                resource: Some(linear.id())
            },
        ]
    );
    assert_eq!(albedo.current_access(), Access::Readable);
    let stats = cx.stats();
    assert_eq!(stats.binds_issued, 2);
    assert_eq!(stats.redundant_binds_avoided, 2);

    cx.set_shader_texture(Stage::Pixel, 3, None).unwrap();
    assert_eq!(
        cx.cache().get(SlotKey::new(Stage::Pixel, SlotKind::Texture, 3)),
        None
    );
    assert_eq!(cx.driver().bind_count(), 3);
}

#[test]
fn samplers_and_textures_do_not_mix() {
    let mut cx = context(fatal());
    let albedo = GPUResource::new(ResourceDescriptor::texture("albedo", 32, 32));
    let linear = GPUResource::new(ResourceDescriptor::sampler("linear"));
    assert_eq!(
        cx.set_shader_sampler(Stage::Pixel, 0, Some(&albedo)).unwrap_err(),
        CommandError::Binding(BindingError::KindMismatch {
            resource: albedo.id(),
            kind: SlotKind::Sampler,
            found: ResourceKind::Texture
        })
    );
    assert_eq!(
        cx.set_shader_texture(Stage::Pixel, 0, Some(&linear)).unwrap_err(),
        CommandError::Binding(BindingError::KindMismatch {
            resource: linear.id(),
            kind: SlotKind::Texture,
            found: ResourceKind::Sampler
        })
    );
    assert!(matches!(
        cx.set_stream_source(0, Some(&albedo)).unwrap_err(),
        CommandError::Binding(BindingError::KindMismatch { .. })
    ));
    assert!(matches!(
        cx.set_shader_texture(Stage::Pixel, 128, Some(&albedo)).unwrap_err(),
        CommandError::Binding(BindingError::SlotOutOfRange { index: 128, .. })
    ));
    assert!(cx.driver().calls().is_empty());
    assert_eq!(albedo.current_access(), Access::Undefined);
}

#[test]
fn uav_bind_evicts_texture_views_first() {
    let mut cx = context(fatal());
    let field = GPUResource::new(ResourceDescriptor::texture("field", 64, 64));
    let texture_slot = SlotKey::new(Stage::Compute, SlotKind::Texture, 0);
    let uav_slot = SlotKey::new(Stage::Compute, SlotKind::UnorderedAccess, 1);
    cx.set_shader_texture(Stage::Compute, 0, Some(&field)).unwrap();
    cx.set_uav(Stage::Compute, 1, Some(&field)).unwrap();
    assert_eq!(
        cx.driver().calls(),
        &[
            DriverCall::BindSlot {
                key: texture_slot,
                resource: Some(field.id())
            },
            DriverCall::BindSlot {
                key: texture_slot,
                resource: None
            },
            DriverCall::BindSlot {
                key: uav_slot,
                resource: Some(field.id())
            },
        ]
    );
    assert_eq!(field.current_access(), Access::UnorderedAccess);

    //a second write in the same frame needs a barrier, even through the same slot
    assert!(matches!(
        cx.set_uav(Stage::Compute, 1, Some(&field)).unwrap_err(),
        CommandError::Transition(TransitionError::UnsynchronizedHazard {
            current: Access::UnorderedAccess,
            requested: Access::UnorderedAccess,
            ..
        })
    ));
    cx.barrier(&field, Access::UnorderedAccess).unwrap();
    cx.driver_mut().take();
    cx.set_uav(Stage::Compute, 1, Some(&field)).unwrap();
    assert!(cx.driver().calls().is_empty());
    assert!(field.dirty());
}

#[test]
fn stream_sources_are_tracked_like_slots() {
    let mut cx = context(fatal());
    let vertices = GPUResource::new(ResourceDescriptor::buffer("vertices", 4096));
    let stream = SlotKey::new(Stage::Vertex, SlotKind::VertexStream, 1);
    cx.set_stream_source(1, Some(&vertices)).unwrap();
    cx.set_stream_source(1, Some(&vertices)).unwrap();
    assert_eq!(vertices.current_access(), Access::Readable);
    assert_eq!(cx.cache().get(stream), Some(vertices.id()));
    assert!(matches!(
        cx.set_stream_source(16, Some(&vertices)).unwrap_err(),
        CommandError::Binding(BindingError::SlotOutOfRange { index: 16, .. })
    ));

    cx.release_resource(&vertices);
    assert_eq!(
        cx.driver().calls(),
        &[
            DriverCall::BindSlot {
                key: stream,
                resource: Some(vertices.id())
            },
            DriverCall::BindSlot {
                key: stream,
                resource: None
            },
        ]
    );
}

#[test]
fn batched_transitions_are_all_or_nothing() {
    let mut cx = context(fatal());
    let history = GPUResource::new(ResourceDescriptor::texture("history", 64, 64));
    let scene = GPUResource::new(ResourceDescriptor::texture("scene", 64, 64));
    cx.transition(&scene, Access::RenderTarget).unwrap();

    let err = cx
        .transition_resources(&[
            (&history, Access::UnorderedAccess),
            (&scene, Access::Readable),
        ])
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Transition(TransitionError::UnsynchronizedHazard { .. })
    ));
    assert_eq!(history.current_access(), Access::Undefined);

    cx.barrier(&scene, Access::Readable).unwrap();
    cx.transition_resources(&[
        (&history, Access::UnorderedAccess),
        (&scene, Access::Readable),
    ])
    .unwrap();
    assert_eq!(history.current_access(), Access::UnorderedAccess);
    assert_eq!(scene.current_access(), Access::Readable);
}
