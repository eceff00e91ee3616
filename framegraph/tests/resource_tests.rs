//! Resource handles, lookups and transient pooling through the public API.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rstest::rstest;

use common::{TestContext, color};
use redlilium_framegraph::{
    BufferDescriptor, BufferUsage, ExternalPassResult, FrameGraphConfig, FrameGraphError,
    GpuBackend, ResourceHandle, ResourceKind, ResourceOrigin,
};

#[test]
fn test_handles_go_stale_on_next_frame() {
    let mut ctx = TestContext::new();
    ctx.graph.begin_frame(0).unwrap();
    let old = ctx.texture("color", 8, 8);
    ctx.pass("draw", &[], &[old], true);
    ctx.graph.execute().unwrap();
    assert!(ctx.graph.get_texture(old).is_ok());

    ctx.graph.begin_frame(1).unwrap();
    let new = ctx.texture("color", 8, 8);
    assert_eq!(new.index(), old.index());
    assert_ne!(new.version(), old.version());
    assert!(matches!(
        ctx.graph.get_texture(old),
        Err(FrameGraphError::StaleHandle { .. })
    ));
    assert!(matches!(
        ctx.graph.resource_info(old),
        Err(FrameGraphError::StaleHandle { .. })
    ));
}

#[test]
fn test_stale_handle_rejected_by_pass_declaration() {
    let mut ctx = TestContext::new();
    ctx.graph.begin_frame(0).unwrap();
    let old = ctx.texture("color", 8, 8);
    ctx.graph.execute().unwrap();

    ctx.graph.begin_frame(1).unwrap();
    ctx.texture("color", 8, 8);
    let result = ctx.graph.add_pass_with_setup(
        "reader",
        |builder| builder.read(old).map(|_| ()),
        |_ctx| Ok(()),
    );
    assert!(matches!(result, Err(FrameGraphError::StaleHandle { .. })));
    assert_eq!(ctx.graph.pass_count(), 0);
}

#[test]
fn test_invalid_and_undeclared_handles() {
    let mut ctx = TestContext::new();
    ctx.graph.begin_frame(0).unwrap();
    assert!(matches!(
        ctx.graph.get_texture(ResourceHandle::INVALID),
        Err(FrameGraphError::InvalidHandle(_))
    ));
    assert!(!ResourceHandle::INVALID.is_valid());
}

#[test]
fn test_wrong_kind_and_not_allocated() {
    let mut ctx = TestContext::new();
    ctx.graph.begin_frame(0).unwrap();
    let texture = ctx.texture("color", 8, 8);
    assert!(matches!(
        ctx.graph.get_texture(texture),
        Err(FrameGraphError::NotAllocated(_))
    ));

    ctx.pass("draw", &[], &[texture], true);
    ctx.graph.compile().unwrap();
    match ctx.graph.get_buffer(texture) {
        Err(FrameGraphError::WrongKind {
            expected, found, ..
        }) => {
            assert_eq!(expected, ResourceKind::Buffer);
            assert_eq!(found, ResourceKind::Texture);
        }
        other => panic!("expected a kind mismatch, got {other:?}"),
    }
    ctx.graph.execute().unwrap();
}

#[test]
fn test_resource_capacity() {
    let mut ctx = TestContext::with_config(FrameGraphConfig::default().with_max_resources(2));
    ctx.graph.begin_frame(0).unwrap();
    ctx.texture("a", 4, 4);
    ctx.texture("b", 4, 4);
    match ctx.graph.create_transient_texture(color("c", 4, 4)) {
        Err(FrameGraphError::CapacityExceeded { what, limit }) => {
            assert_eq!(what, "resource");
            assert_eq!(limit, 2);
        }
        other => panic!("expected capacity error, got {other:?}"),
    }
    assert_eq!(ctx.graph.resource_count(), 2);
}

#[test]
fn test_pass_capacity() {
    let mut ctx = TestContext::with_config(FrameGraphConfig::default().with_max_passes(1));
    ctx.graph.begin_frame(0).unwrap();
    ctx.pass("first", &[], &[], true);
    let result = ctx.graph.add_pass("second", |_ctx| Ok(()));
    assert!(matches!(
        result,
        Err(FrameGraphError::CapacityExceeded { what: "pass", limit: 1 })
    ));
    assert_eq!(ctx.graph.pass_count(), 1);
}

#[test]
fn test_lookup_by_name() {
    let mut ctx = TestContext::new();
    ctx.graph.begin_frame(0).unwrap();
    let backbuffer = Arc::new(ctx.backend.create_texture(&color("swap", 64, 64)).unwrap());
    let imported = ctx
        .graph
        .import_texture("backbuffer", Arc::clone(&backbuffer))
        .unwrap();
    let first = ctx.texture("scratch", 4, 4);
    let second = ctx.texture("scratch", 4, 4);

    assert_eq!(ctx.graph.get_resource("backbuffer"), Some(imported));
    assert_eq!(ctx.graph.get_resource("scratch"), Some(second));
    assert_ne!(first, second);
    assert_eq!(ctx.graph.get_resource("missing"), None);

    // Imported resources are usable right away.
    assert!(Arc::ptr_eq(
        ctx.graph.get_texture(imported).unwrap(),
        &backbuffer
    ));
    let info = ctx.graph.resource_info(imported).unwrap();
    assert_eq!(info.origin, ResourceOrigin::Imported);
    assert!(info.allocated);

    ctx.graph.begin_frame(1).unwrap_err();
    ctx.graph.execute().unwrap();
    ctx.graph.begin_frame(1).unwrap();
    assert_eq!(ctx.graph.get_resource("backbuffer"), None);
}

#[test]
fn test_imported_resources_are_not_pooled() {
    let mut ctx = TestContext::new();
    let target = Arc::new(ctx.backend.create_texture(&color("swap", 64, 64)).unwrap());
    let data = Arc::new(
        ctx.backend
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::STORAGE))
            .unwrap(),
    );
    ctx.backend.clear_stats();

    ctx.graph.begin_frame(0).unwrap();
    let target = ctx.graph.import_texture("target", target).unwrap();
    let data = ctx.graph.import_buffer("data", data).unwrap();
    ctx.pass("compute", &[data], &[target], true);
    ctx.graph.execute().unwrap();

    let stats = ctx.backend.stats();
    assert!(stats.textures_created.is_empty());
    assert!(stats.buffers_created.is_empty());
    assert_eq!(ctx.graph.pool_sizes(0), (0, 0, 1));
}

#[test]
fn test_spans_cover_live_passes_only() {
    let mut ctx = TestContext::new();
    ctx.graph.begin_frame(0).unwrap();
    let x = ctx.texture("x", 8, 8);
    let unused = ctx.texture("unused", 8, 8);
    ctx.pass("idle", &[], &[], false);
    ctx.pass("write", &[], &[x], false);
    ctx.pass("debug", &[x], &[unused], false);
    ctx.pass("read", &[x], &[], true);
    ctx.graph.compile().unwrap();

    let info = ctx.graph.resource_info(x).unwrap();
    assert_eq!(info.origin, ResourceOrigin::Transient);
    assert_eq!(info.name.as_deref(), Some("x"));
    assert_eq!(info.first_pass, Some(1));
    assert_eq!(info.last_pass, Some(3));
    assert!(info.allocated);

    let info = ctx.graph.resource_info(unused).unwrap();
    assert_eq!(info.first_pass, None);
    assert!(!info.allocated);

    assert_eq!(ctx.graph.allocation_stats().created, 1);
    ctx.graph.execute().unwrap();
}

#[test]
fn test_transients_declared_in_setup() {
    let mut ctx = TestContext::new();
    ctx.graph.begin_frame(0).unwrap();
    let (_, buffer) = ctx
        .graph
        .add_pass_with_setup(
            "fill",
            |builder| {
                let buffer = builder.create_transient_buffer(
                    BufferDescriptor::new(1024, BufferUsage::STORAGE).with_label("particles"),
                )?;
                builder.write(buffer)
            },
            |_ctx| Ok(()),
        )
        .unwrap();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    ctx.graph
        .add_pass_with_setup(
            "consume",
            |builder| {
                builder.read(buffer)?;
                builder.has_side_effects();
                Ok(())
            },
            move |ctx| {
                *sink.lock() = Some(ctx.get_buffer(buffer)?.size());
                Ok(())
            },
        )
        .unwrap();

    ctx.graph.execute().unwrap();
    assert_eq!(*seen.lock(), Some(1024));
    assert_eq!(ctx.graph.get_resource("particles"), Some(buffer));
    assert_eq!(ctx.backend.stats().buffers_created.len(), 1);
}

fn declare_frame(ctx: &mut TestContext) {
    let scene = ctx.frame_texture("scene");
    let shadow = ctx.texture("shadow", 512, 512);
    let (_, lights) = ctx
        .graph
        .add_pass_with_setup(
            "cull_lights",
            |builder| {
                let lights = builder
                    .create_transient_buffer(BufferDescriptor::new(4096, BufferUsage::STORAGE))?;
                builder.write(lights)
            },
            |_ctx| Ok(()),
        )
        .unwrap();
    ctx.pass("shadow", &[], &[shadow], false);
    ctx.pass("shade", &[shadow, lights], &[scene], false);
    ctx.pass("present", &[scene], &[], true);
}

#[rstest]
#[case::single(1)]
#[case::double(2)]
#[case::triple(3)]
fn test_pools_stabilize_after_warm_up(#[case] frames_in_flight: usize) {
    let config = FrameGraphConfig::default().with_frames_in_flight(frames_in_flight);
    let mut ctx = TestContext::with_config(config);

    for frame in 0..frames_in_flight as u64 {
        ctx.graph.begin_frame(frame).unwrap();
        declare_frame(&mut ctx);
        ctx.graph.execute().unwrap();
        assert_eq!(ctx.graph.allocation_stats().created, 3);
    }
    let warm = ctx.backend.stats();
    assert_eq!(warm.textures_created.len(), 2 * frames_in_flight);
    assert_eq!(warm.buffers_created.len(), frames_in_flight);
    assert_eq!(warm.command_lists_created, 4 * frames_in_flight);

    for frame in frames_in_flight as u64..(frames_in_flight as u64 * 4) {
        ctx.graph.begin_frame(frame).unwrap();
        declare_frame(&mut ctx);
        ctx.graph.execute().unwrap();
        let stats = ctx.graph.allocation_stats();
        assert_eq!((stats.reused, stats.created, stats.recreated), (3, 0, 0));
    }

    let after = ctx.backend.stats();
    assert_eq!(after.textures_created.len(), warm.textures_created.len());
    assert_eq!(after.buffers_created.len(), warm.buffers_created.len());
    assert_eq!(after.command_lists_created, warm.command_lists_created);
    assert_eq!(after.semaphores_created, warm.semaphores_created);
    assert!(after.textures_destroyed.is_empty());
    for slot in 0..frames_in_flight {
        assert_eq!(ctx.graph.pool_sizes(slot), (2, 1, 4));
    }
}

#[test]
fn test_slots_never_share_transients() {
    let mut ctx = TestContext::with_config(FrameGraphConfig::default().with_frames_in_flight(2));
    let mut ids = Vec::new();
    for frame in 0..2 {
        ctx.graph.begin_frame(frame).unwrap();
        let target = ctx.texture("target", 16, 16);
        ctx.pass("draw", &[], &[target], true);
        ctx.graph.execute().unwrap();
        ids.push(ctx.graph.get_texture(target).unwrap().dummy_id());
    }
    assert_ne!(ids[0], ids[1]);
}

#[test]
fn test_resize_recreates_frame_sized_only() {
    let config = FrameGraphConfig::default()
        .with_frames_in_flight(1)
        .with_dimensions(800, 600);
    let mut ctx = TestContext::with_config(config);

    let run = |ctx: &mut TestContext, frame: u64| {
        ctx.graph.begin_frame(frame).unwrap();
        let scene = ctx.frame_texture("scene");
        let lut = ctx.texture("lut", 32, 32);
        ctx.pass("bake", &[], &[lut], false);
        ctx.pass("draw", &[lut], &[scene], true);
        ctx.graph.execute().unwrap();
        let dims = ctx.graph.get_texture(scene).unwrap().dimensions();
        (dims, ctx.graph.allocation_stats())
    };

    let (dims, stats) = run(&mut ctx, 0);
    assert_eq!(dims, (800, 600));
    assert_eq!(stats.created, 2);
    let scene_id = ctx.backend.stats().textures_created[0].0;

    ctx.graph.set_dimensions(1024, 768).unwrap();
    let (dims, stats) = run(&mut ctx, 1);
    assert_eq!(dims, (1024, 768));
    assert_eq!((stats.reused, stats.created, stats.recreated), (1, 0, 1));
    assert_eq!(ctx.backend.stats().textures_destroyed, vec![scene_id]);

    let (_, stats) = run(&mut ctx, 2);
    assert_eq!((stats.reused, stats.created, stats.recreated), (2, 0, 0));
}

#[test]
fn test_zero_dimensions_rejected() {
    let mut ctx = TestContext::new();
    assert!(matches!(
        ctx.graph.set_dimensions(0, 720),
        Err(FrameGraphError::InvalidConfig(_))
    ));
    assert_eq!(ctx.graph.dimensions(), (1280, 720));
}

#[test]
fn test_external_pass_output_replacement() {
    let mut ctx = TestContext::new();
    let backend = Arc::clone(&ctx.backend);
    let replacement = Arc::new(backend.create_texture(&color("ui", 320, 200)).unwrap());
    let replacement_id = replacement.dummy_id();

    ctx.graph.begin_frame(0).unwrap();
    let handed_out = Arc::clone(&replacement);
    let output = ctx
        .graph
        .add_external_pass("egui", color("ui_target", 320, 200), move |ext| {
            assert!(ext.output_texture().is_ok());
            Ok(ExternalPassResult::none().with_texture(Arc::clone(&handed_out)))
        })
        .unwrap();

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    ctx.graph
        .add_pass_with_setup(
            "composite",
            |builder| {
                builder.read(output)?;
                builder.has_side_effects();
                Ok(())
            },
            move |ctx| {
                *sink.lock() = ctx.get_texture(output)?.dummy_id();
                Ok(())
            },
        )
        .unwrap();

    ctx.graph.execute().unwrap();
    assert_eq!(*seen.lock(), replacement_id);
    assert_eq!(
        ctx.graph.get_texture(output).unwrap().dummy_id(),
        replacement_id
    );
}
