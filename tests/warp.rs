mod common;

use common::{stock_hmd, Call, RecordingBackend};
use vr_lens::backend::{ShaderVariant, StateGuard, TextureFormat};
use vr_lens::compositor::OffscreenCompositor;
use vr_lens::error::VrError;
use vr_lens::mesh::{INDEX_COUNT, VERTEX_COUNT};
use vr_lens::optics::{self, EyeLayout, PixelScale};
use vr_lens::profile::HeadMountedDisplay;
use vr_lens::viewport::Viewport;
use vr_lens::warp::{FramePhase, WarpRenderer};
use vr_lens::GraphicsBackend;

fn configure(warp: &mut WarpRenderer<RecordingBackend>, hmd: &HeadMountedDisplay) {
    let (left, right) = optics::distorted_fov(hmd);
    warp.on_fov_changed(hmd, &left, &right, hmd.device.screen_to_lens_distance)
        .unwrap();
}

fn configured() -> WarpRenderer<RecordingBackend> {
    let mut warp = WarpRenderer::new();
    warp.set_restore_state_enabled(true);
    configure(&mut warp, &stock_hmd());
    warp
}

fn run_frame(warp: &mut WarpRenderer<RecordingBackend>, backend: &mut RecordingBackend) {
    warp.before_draw_frame(backend).unwrap();
    warp.after_draw_frame(backend).unwrap();
}

fn position(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls.iter().position(pred).unwrap()
}

#[test]
fn reconfiguring_mid_frame_is_rejected() {
    let hmd = stock_hmd();
    let (left, right) = optics::distorted_fov(&hmd);
    let mut warp = configured();
    let mut backend = RecordingBackend::new();

    warp.before_draw_frame(&mut backend).unwrap();
    assert_eq!(warp.phase(), FramePhase::Compositing);
    assert!(matches!(
        warp.on_fov_changed(&hmd, &left, &right, 0.042),
        Err(VrError::DrawingInProgress { .. })
    ));
    assert!(matches!(
        warp.set_texture_format(TextureFormat::Rgba16Float),
        Err(VrError::DrawingInProgress { .. })
    ));
    assert_eq!(warp.texture_format(), TextureFormat::Rgba8Unorm);

    warp.after_draw_frame(&mut backend).unwrap();
    assert_eq!(warp.phase(), FramePhase::Idle);
    warp.on_fov_changed(&hmd, &left, &right, 0.042).unwrap();
    warp.set_texture_format(TextureFormat::Rgba16Float).unwrap();
}

#[test]
fn frame_calls_must_alternate() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();

    assert!(matches!(
        warp.after_draw_frame(&mut backend),
        Err(VrError::InvalidPhase { expected: "compositing", found: "idle" })
    ));
    warp.before_draw_frame(&mut backend).unwrap();
    assert!(matches!(
        warp.before_draw_frame(&mut backend),
        Err(VrError::InvalidPhase { expected: "idle", found: "compositing" })
    ));
}

#[test]
fn frame_without_fov_is_not_configured() {
    let mut warp = WarpRenderer::<RecordingBackend>::new();
    let mut backend = RecordingBackend::new();
    warp.set_vignette_enabled(true).unwrap();
    assert!(matches!(warp.before_draw_frame(&mut backend), Err(VrError::NotConfigured)));
    assert_eq!(warp.phase(), FramePhase::Idle);
    assert!(!warp.have_viewports_changed());
}

#[test]
fn first_frame_builds_programs_meshes_and_target() {
    let hmd = stock_hmd();
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    run_frame(&mut warp, &mut backend);

    assert_eq!(backend.count(|c| matches!(c, Call::CompileProgram(_))), 2);
    let meshes: Vec<_> = backend
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::CreateMesh { vertices, indices, .. } => Some((*vertices, *indices)),
            _ => None,
        })
        .collect();
    assert_eq!(meshes, vec![(VERTEX_COUNT, INDEX_COUNT); 2]);

    let (left, right) = optics::distorted_fov(&hmd);
    let expected = OffscreenCompositor::<RecordingBackend>::target_size(
        &EyeLayout::new(&left, &right),
        &PixelScale::new(&hmd.screen, hmd.device.screen_to_lens_distance),
        backend.max_texture_size,
    );
    assert_eq!(warp.target_size(), expected);
    assert!(backend.calls.iter().any(|c| matches!(
        c,
        Call::CreateRenderTarget { width, height, format: TextureFormat::Rgba8Unorm, .. }
            if (*width, *height) == expected
    )));
}

#[test]
fn rebuild_happens_only_when_dirty() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    run_frame(&mut warp, &mut backend);
    backend.take_calls();

    run_frame(&mut warp, &mut backend);
    assert_eq!(
        backend.count(|c| matches!(
            c,
            Call::CompileProgram(_) | Call::CreateMesh { .. } | Call::CreateRenderTarget { .. }
        )),
        0
    );

    // Chromatic aberration and restore state are plain toggles.
    warp.set_chromatic_aberration_correction_enabled(true);
    warp.set_restore_state_enabled(false);
    run_frame(&mut warp, &mut backend);
    assert_eq!(backend.count(|c| matches!(c, Call::CreateMesh { .. })), 0);

    warp.set_vignette_enabled(true).unwrap();
    backend.take_calls();
    run_frame(&mut warp, &mut backend);
    assert_eq!(backend.count(|c| matches!(c, Call::CreateMesh { .. })), 2);
    assert_eq!(backend.count(|c| matches!(c, Call::CompileProgram(_))), 0);
}

#[test]
fn old_resources_are_released_before_new_ones() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    run_frame(&mut warp, &mut backend);
    backend.take_calls();

    warp.set_texture_format(TextureFormat::Rgba16Float).unwrap();
    run_frame(&mut warp, &mut backend);
    let calls = backend.take_calls();

    let destroy_mesh = position(&calls, |c| matches!(c, Call::DestroyMesh(_)));
    let create_mesh = position(&calls, |c| matches!(c, Call::CreateMesh { .. }));
    assert!(destroy_mesh < create_mesh);
    let destroy_target = position(&calls, |c| matches!(c, Call::DestroyRenderTarget(_)));
    let create_target = position(&calls, |c| {
        matches!(c, Call::CreateRenderTarget { format: TextureFormat::Rgba16Float, .. })
    });
    assert!(destroy_target < create_target);

    assert_eq!(backend.live_meshes, 2);
    assert_eq!(backend.live_targets, 1);
    assert_eq!(backend.live_programs, 2);
}

#[test]
fn warp_pass_clears_then_draws_each_half() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    warp.before_draw_frame(&mut backend).unwrap();
    let target = backend.framebuffer.unwrap();
    backend.take_calls();
    warp.after_draw_frame(&mut backend).unwrap();

    let calls = backend.take_calls();
    let expected_prefix = [
        Call::BindFramebuffer(None),
        Call::SaveState,
        Call::SetViewport(Viewport::full(1920, 1080)),
        Call::SetScissor(None),
        Call::Clear,
        Call::SetScissor(Some(Viewport::new(0, 0, 960, 1080))),
    ];
    assert_eq!(&calls[..expected_prefix.len()], &expected_prefix);

    let draws: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            Call::DrawMesh {
                program,
                texture,
                texture_coord_scale,
                framebuffer,
                scissor,
                ..
            } => Some((*program, *texture, *texture_coord_scale, *framebuffer, *scissor)),
            _ => None,
        })
        .collect();
    assert_eq!(
        draws,
        vec![
            (
                ShaderVariant::Standard,
                target,
                1.0,
                None,
                Some(Viewport::new(0, 0, 960, 1080))
            ),
            (
                ShaderVariant::Standard,
                target,
                1.0,
                None,
                Some(Viewport::new(960, 0, 960, 1080))
            ),
        ]
    );
    assert_eq!(calls.last(), Some(&Call::RestoreState));
}

#[test]
fn left_mesh_is_drawn_before_right() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    run_frame(&mut warp, &mut backend);

    let created: Vec<u32> = backend
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::CreateMesh { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    let drawn: Vec<u32> = backend
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::DrawMesh { mesh, .. } => Some(*mesh),
            _ => None,
        })
        .collect();
    assert_eq!(created, drawn);
}

#[test]
fn warp_pass_restores_caller_state() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    let host_viewport = Viewport::new(10, 20, 300, 200);
    backend.set_viewport(host_viewport);
    backend.set_scissor(Some(host_viewport));
    let before = backend.state();

    run_frame(&mut warp, &mut backend);
    assert_eq!(backend.state(), before);

    warp.set_restore_state_enabled(false);
    backend.take_calls();
    run_frame(&mut warp, &mut backend);
    assert_eq!(backend.count(|c| matches!(c, Call::SaveState | Call::RestoreState)), 0);
    assert_eq!(backend.viewport, Viewport::full(1920, 1080));
    assert_eq!(backend.framebuffer, None);
}

#[test]
fn aberration_correction_switches_program() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    warp.set_chromatic_aberration_correction_enabled(true);
    run_frame(&mut warp, &mut backend);
    assert!(backend.draws().iter().all(|c| matches!(
        c,
        Call::DrawMesh { program: ShaderVariant::AberrationCorrected, .. }
    )));
}

#[test]
fn resolution_scale_rounds_each_viewport_field() {
    let hmd = stock_hmd();
    let (left, right) = optics::distorted_fov(&hmd);
    let layout = EyeLayout::new(&left, &right);
    let scale = PixelScale::new(&hmd.screen, hmd.device.screen_to_lens_distance);

    let mut warp = configured();
    assert!(warp.have_viewports_changed());
    let full = warp.update_viewports().unwrap();
    assert!(!warp.have_viewports_changed());
    assert_eq!(full, (layout.left.to_pixels(&scale, 1.0), layout.right.to_pixels(&scale, 1.0)));

    warp.set_resolution_scale(0.5);
    assert!(warp.have_viewports_changed());
    let (half_left, half_right) = warp.update_viewports().unwrap();
    let px = |tan: f32, per_tan: f32| (tan * (per_tan * 0.5)).round() as i32;
    assert_eq!(half_left.width, px(layout.left.width, scale.x_px_per_tan_angle));
    assert_eq!(half_left.height, px(layout.left.height, scale.y_px_per_tan_angle));
    assert_eq!(half_right.x, px(layout.right.x, scale.x_px_per_tan_angle));
    assert_eq!(half_right.width, px(layout.right.width, scale.x_px_per_tan_angle));

    let mut backend = RecordingBackend::new();
    run_frame(&mut warp, &mut backend);
    assert!(backend
        .draws()
        .iter()
        .all(|c| matches!(c, Call::DrawMesh { texture_coord_scale, .. } if *texture_coord_scale == 0.5)));
}

#[test]
fn failed_compile_leaks_nothing() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    backend.failing_program = Some(ShaderVariant::AberrationCorrected);
    assert!(matches!(
        warp.before_draw_frame(&mut backend),
        Err(VrError::ShaderCompilation { variant: "aberration_corrected", .. })
    ));
    assert_eq!(backend.live_programs, 0);
    assert_eq!(warp.phase(), FramePhase::Idle);

    backend.failing_program = None;
    run_frame(&mut warp, &mut backend);
    assert_eq!(backend.live_programs, 2);
}

#[test]
fn undistort_texture_warps_host_texture() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    warp.undistort_texture(&mut backend, &99).unwrap();
    assert_eq!(backend.draws().len(), 2);
    assert!(backend
        .draws()
        .iter()
        .all(|c| matches!(c, Call::DrawMesh { texture: 99, .. })));
    assert_eq!(backend.live_targets, 1);
}

#[test]
fn mesh_state_cannot_change_mid_frame() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    run_frame(&mut warp, &mut backend);
    warp.before_draw_frame(&mut backend).unwrap();
    let target = backend.framebuffer;
    backend.take_calls();

    assert!(matches!(
        warp.set_vignette_enabled(true),
        Err(VrError::DrawingInProgress { operation: "set_vignette_enabled" })
    ));
    assert!(!warp.is_vignette_enabled());
    assert!(matches!(
        warp.undistort_texture(&mut backend, &99),
        Err(VrError::DrawingInProgress { operation: "undistort_texture" })
    ));
    assert!(backend.calls.is_empty());
    assert_eq!(backend.framebuffer, target);
    assert_eq!(backend.live_targets, 1);

    warp.after_draw_frame(&mut backend).unwrap();
    warp.set_vignette_enabled(true).unwrap();
    warp.undistort_texture(&mut backend, &99).unwrap();
}

#[test]
fn shutdown_releases_everything() {
    let mut warp = configured();
    let mut backend = RecordingBackend::new();
    run_frame(&mut warp, &mut backend);
    warp.shutdown(&mut backend);
    assert_eq!(
        (backend.live_programs, backend.live_meshes, backend.live_targets),
        (0, 0, 0)
    );
    assert_eq!(warp.target_size(), (0, 0));

    // Resources come back on the next frame.
    run_frame(&mut warp, &mut backend);
    assert_eq!(backend.live_meshes, 2);
}

#[test]
fn state_guard_restores_on_drop() {
    let mut backend = RecordingBackend::new();
    backend.set_viewport(Viewport::new(1, 2, 3, 4));
    {
        let mut guarded = StateGuard::new(&mut backend, true);
        guarded.set_viewport(Viewport::full(100, 100));
        assert_eq!(guarded.viewport, Viewport::full(100, 100));
    }
    assert_eq!(backend.viewport, Viewport::new(1, 2, 3, 4));

    {
        let mut unguarded = StateGuard::new(&mut backend, false);
        unguarded.set_viewport(Viewport::full(100, 100));
    }
    assert_eq!(backend.viewport, Viewport::full(100, 100));
    assert_eq!(backend.count(|c| matches!(c, Call::RestoreState)), 1);
}
