use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use glam::{Mat4, Vec3};

use forward_render::asset::{Handle, Mesh, MeshData};
use forward_render::input::{InputEvent, InputKind};
use forward_render::renderer::backend::{ClearFlags, Command, DepthFunc, StateToggle};
use forward_render::renderer::builtin::{BASIC, CAMERA_BLOCK, GLASS, LIGHTS_BLOCK, SKYBOX};
use forward_render::renderer::{cube_mesh, HeadlessBackend, TargetTemplate};
use forward_render::scene::{Camera, SceneId, Skybox, Transform};
use forward_render::settings::{Feature, RenderSettings};
use forward_render::{Engine, RenderError};

fn engine() -> Engine<HeadlessBackend> {
    Engine::new(HeadlessBackend::new(), RenderSettings::default()).unwrap()
}

fn cube(engine: &mut Engine<HeadlessBackend>) -> Handle<Mesh> {
    let (vertices, indices) = cube_mesh();
    engine.add_mesh(MeshData::new(vertices, indices)).unwrap()
}

fn scene_with_camera(engine: &mut Engine<HeadlessBackend>, eye: Vec3) -> SceneId {
    let id = engine.create_scene();
    engine
        .scene_mut(id)
        .unwrap()
        .add_camera(Camera::looking_at(eye, Vec3::ZERO));
    id
}

fn position(commands: &[Command], pred: impl Fn(&Command) -> bool) -> usize {
    commands
        .iter()
        .position(pred)
        .expect("command not recorded")
}

fn lights_shadow_enabled(engine: &Engine<HeadlessBackend>) -> i32 {
    let buffer = engine.blocks().get(LIGHTS_BLOCK).unwrap().buffer();
    let bytes = engine.backend().buffer_bytes(buffer).unwrap();
    i32::from_le_bytes(bytes[12..16].try_into().unwrap())
}

#[test]
fn disabled_objects_are_not_drawn() {
    let mut engine = engine();
    let mesh = cube(&mut engine);
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 2.0, 8.0));
    let scene = engine.scene_mut(id).unwrap();
    scene.add_object(vec![mesh], BASIC, Transform::from_translation(Vec3::X));
    let hidden = scene.add_object(vec![mesh], BASIC, Transform::from_translation(Vec3::Y));
    scene.set_enabled(hidden, false);

    engine.run_frame().unwrap();

    let basic = engine.shaders().by_name(BASIC).unwrap().id();
    let gpu = engine.assets().mesh(mesh).unwrap().gpu();
    let draws = engine.backend().draws_with_program(basic);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].0, gpu);
    assert_eq!(draws[0].1, vec![Transform::from_translation(Vec3::X).matrix()]);
}

#[test]
fn frame_runs_stages_in_forward_order() {
    let mut engine = engine();
    let mesh = cube(&mut engine);
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 2.0, 8.0));
    let scene = engine.scene_mut(id).unwrap();
    scene.add_object(vec![mesh], BASIC, Transform::IDENTITY);
    scene.add_object(vec![mesh], GLASS, Transform::from_translation(Vec3::Z));
    scene.set_skybox(Some(Skybox {
        mesh,
        shader: SKYBOX.to_string(),
    }));

    engine.backend_mut().take_commands();
    engine.run_frame().unwrap();

    let basic = engine.shaders().by_name(BASIC).unwrap().id();
    let glass = engine.shaders().by_name(GLASS).unwrap().id();
    let commands = engine.backend().commands();

    assert_eq!(commands.first(), Some(&Command::BeginFrame));
    assert_eq!(commands.last(), Some(&Command::Present));

    let clear = position(commands, |cmd| {
        *cmd == Command::Clear(ClearFlags::COLOR | ClearFlags::DEPTH | ClearFlags::STENCIL)
    });
    let opaque = position(commands, |cmd| {
        matches!(cmd, Command::Draw { program: Some(p), .. } if *p == basic)
    });
    let sky_depth = position(commands, |cmd| {
        *cmd == Command::State(StateToggle::DepthFunc(DepthFunc::LessEqual))
    });
    let sky = position(commands, |cmd| matches!(cmd, Command::DrawSkybox { .. }));
    let sky_restore = position(commands, |cmd| {
        *cmd == Command::State(StateToggle::DepthFunc(DepthFunc::Less))
    });
    let transparent = position(commands, |cmd| {
        matches!(cmd, Command::Draw { program: Some(p), .. } if *p == glass)
    });

    assert!(clear < opaque);
    assert!(opaque < sky_depth);
    assert!(sky_depth < sky);
    assert!(sky < sky_restore);
    assert!(sky_restore < transparent);
}

#[test]
fn frame_without_camera_or_scene_fails_before_present() {
    let mut engine = engine();
    assert!(matches!(engine.run_frame(), Err(RenderError::Precondition(_))));

    engine.create_scene();
    assert!(matches!(engine.run_frame(), Err(RenderError::Precondition(_))));
    assert_eq!(engine.backend().frames_presented(), 0);
    assert!(!engine.backend().commands().contains(&Command::Present));
}

#[test]
fn directional_shadow_follows_feature_flag_and_light_lifetime() {
    let mut engine = engine();
    let mesh = cube(&mut engine);
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 5.0, 10.0));
    let scene = engine.scene_mut(id).unwrap();
    scene.add_object(vec![mesh], BASIC, Transform::IDENTITY);
    let sun = scene.add_directional_light(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 1.0);

    engine.run_frame().unwrap();
    assert_eq!(engine.shadow_cache().len(), 1);
    assert!(engine.shadow_cache().shadow_map(sun).is_ok());
    assert_eq!(lights_shadow_enabled(&engine), 1);

    engine.set_feature(Feature::Shadows, false);
    engine.run_frame().unwrap();
    assert_eq!(lights_shadow_enabled(&engine), 0);

    engine.set_feature(Feature::Shadows, true);
    engine.bound_scene_mut().unwrap().remove_light(sun);
    engine.run_frame().unwrap();
    assert!(engine.shadow_cache().is_empty());
    assert_eq!(lights_shadow_enabled(&engine), 0);
}

#[test]
fn transparent_objects_draw_back_to_front() {
    let mut engine = engine();
    let mesh = cube(&mut engine);
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 0.0, 10.0));
    let scene = engine.scene_mut(id).unwrap();
    let near = Transform::from_translation(Vec3::new(0.0, 0.0, 5.0));
    let far = Transform::from_translation(Vec3::new(0.0, 0.0, -10.0));
    scene.add_object(vec![mesh], GLASS, near);
    scene.add_object(vec![mesh], GLASS, far);

    engine.run_frame().unwrap();

    let glass = engine.shaders().by_name(GLASS).unwrap().id();
    let draws = engine.backend().draws_with_program(glass);
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].1, vec![far.matrix()]);
    assert_eq!(draws[1].1, vec![near.matrix()]);

    let commands = engine.backend().commands();
    assert!(commands.contains(&Command::State(StateToggle::Blending(true))));
    assert!(commands.contains(&Command::State(StateToggle::DepthWrite(false))));
}

#[test]
fn queued_input_is_dispatched_during_the_frame() {
    let mut engine = engine();
    scene_with_camera(&mut engine, Vec3::new(0.0, 0.0, 10.0));

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    engine
        .input_registrar()
        .bind(InputKind::Key, move |event, scene| {
            if let InputEvent::Key { pressed: true, .. } = event {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Ok(camera) = scene.active_camera_mut() {
                    camera.eye = Vec3::new(0.0, 0.0, 20.0);
                }
            }
        });

    engine.queue_input(InputEvent::Key {
        key: "w".into(),
        pressed: true,
    });
    engine.queue_input(InputEvent::Scroll { delta: 1.0 });
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    engine.run_frame().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let eye = engine.bound_scene_mut().unwrap().active_camera().unwrap().eye;
    assert_eq!(eye, Vec3::new(0.0, 0.0, 20.0));

    // the queue is drained
    engine.run_frame().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn scene_target_follows_viewport_resizes() {
    let mut engine = engine();
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 0.0, 10.0));
    assert_eq!(engine.scene_color_attachment(), None);

    let handle = engine.add_scene_target(id, TargetTemplate::FullColor).unwrap();
    let color = engine.scene_color_attachment();
    assert!(color.is_some());

    engine.run_frame().unwrap();
    let bound = engine.backend().bound_target().unwrap();
    assert_eq!(bound, engine.targets().target(handle).unwrap().attachments());

    engine.resize(0, 0).unwrap();
    assert_eq!(engine.viewport_size(), (1280, 720));
    assert_eq!(engine.scene_color_attachment(), color);

    engine.resize(640, 480).unwrap();
    assert_eq!(engine.viewport_size(), (640, 480));
    assert_eq!(engine.targets().target(handle).unwrap().size(), (640, 480));
}

#[test]
fn camera_block_holds_view_projection_for_viewport_aspect() {
    let mut engine = engine();
    let eye = Vec3::new(3.0, 4.0, 5.0);
    scene_with_camera(&mut engine, eye);
    engine.run_frame().unwrap();

    let expected = Camera::looking_at(eye, Vec3::ZERO).view_proj(1280.0 / 720.0);
    let buffer = engine.blocks().get(CAMERA_BLOCK).unwrap().buffer();
    let bytes = engine.backend().buffer_bytes(buffer).unwrap();
    let cols: Vec<f32> = bytes[..64]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    let uploaded = Mat4::from_cols_slice(&cols);
    assert!(uploaded.abs_diff_eq(expected, 1e-5));

    let eye_bytes = &bytes[256..268];
    let uploaded_eye: Vec<f32> = eye_bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(uploaded_eye, vec![3.0, 4.0, 5.0]);
}

#[test]
fn emptied_pipeline_only_begins_and_presents() {
    let mut engine = engine();
    let mesh = cube(&mut engine);
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 0.0, 10.0));
    engine
        .scene_mut(id)
        .unwrap()
        .add_object(vec![mesh], BASIC, Transform::IDENTITY);

    engine.pipeline_mut().clear();
    engine.backend_mut().take_commands();
    engine.run_frame().unwrap();

    assert_eq!(
        engine.backend().commands(),
        &[Command::BeginFrame, Command::Present]
    );
    assert_eq!(engine.backend().frames_presented(), 1);
}

#[test]
fn handler_binding_another_handler_does_not_stall_the_frame() {
    let mut engine = engine();
    scene_with_camera(&mut engine, Vec3::new(0.0, 0.0, 10.0));

    let scrolls = Arc::new(AtomicUsize::new(0));
    let registrar = engine.input_registrar();
    let counter = scrolls.clone();
    let mut counter = Some(counter);
    engine
        .input_registrar()
        .bind(InputKind::Key, move |_, _| {
            if let Some(counter) = counter.take() {
                registrar.bind(InputKind::Scroll, move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

    engine.queue_input(InputEvent::Key {
        key: "e".into(),
        pressed: true,
    });
    engine.run_frame().unwrap();
    assert_eq!(engine.backend().frames_presented(), 1);
    assert_eq!(scrolls.load(Ordering::SeqCst), 0);

    engine.queue_input(InputEvent::Scroll { delta: -1.0 });
    engine.run_frame().unwrap();
    assert_eq!(scrolls.load(Ordering::SeqCst), 1);
}

#[test]
fn disabled_object_with_unknown_shader_does_not_fail_the_frame() {
    let mut engine = engine();
    let mesh = cube(&mut engine);
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 2.0, 8.0));
    let scene = engine.scene_mut(id).unwrap();
    scene.add_object(vec![mesh], BASIC, Transform::IDENTITY);
    let stray = scene.add_object(vec![mesh], "Unregistered", Transform::IDENTITY);
    scene.set_enabled(stray, false);

    engine.run_frame().unwrap();

    let basic = engine.shaders().by_name(BASIC).unwrap().id();
    assert_eq!(engine.backend().draws_with_program(basic).len(), 1);
    assert_eq!(engine.backend().frames_presented(), 1);
}

#[test]
fn point_shadow_flag_only_skips_point_lights() {
    let mut engine = engine();
    let mesh = cube(&mut engine);
    let id = scene_with_camera(&mut engine, Vec3::new(0.0, 5.0, 10.0));
    let scene = engine.scene_mut(id).unwrap();
    scene.add_object(vec![mesh], BASIC, Transform::IDENTITY);
    let sun = scene.add_directional_light(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 1.0);
    let bulb = scene.add_point_light(Vec3::new(0.0, 3.0, 0.0), Vec3::ONE, 1.0);

    engine.set_feature(Feature::PointShadows, false);
    engine.run_frame().unwrap();

    assert_eq!(engine.shadow_cache().len(), 1);
    assert!(engine.shadow_cache().shadow_map(sun).is_ok());
    assert!(engine.shadow_cache().shadow_map(bulb).is_err());
}
