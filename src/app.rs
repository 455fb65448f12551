use std::sync::Arc;

use glam::{Quat, Vec3};
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::asset::MeshData;
use crate::engine::Engine;
use crate::error::Result;
use crate::input::{InputEvent, InputKind};
use crate::renderer::builtin::{BASIC, GLASS, SKYBOX};
use crate::renderer::primitives::{cube_mesh, plane_mesh};
use crate::renderer::WgpuBackend;
use crate::scene::{Camera, Skybox, Transform};
use crate::settings::{Feature, RenderSettings};

const GRID: i32 = 4;
const ORBIT_STEP: f32 = 0.1;

pub struct App {
    settings: RenderSettings,
    engine: Option<Engine<WgpuBackend>>,
    window: Option<Arc<Window>>,
}

impl App {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            engine: None,
            window: None,
        }
    }
}

/// A grid of cubes on a plane, a glass cube, one light of each kind and a
/// gradient sky. Arrow keys orbit the camera.
fn populate_demo(engine: &mut Engine<WgpuBackend>) -> Result<()> {
    let (vertices, indices) = cube_mesh();
    let cube = engine.add_mesh(MeshData::new(vertices, indices).named("cube"))?;
    let (vertices, indices) = plane_mesh(30.0);
    let plane = engine.add_mesh(MeshData::new(vertices, indices).named("plane"))?;

    let id = engine.create_scene();
    let scene = engine.scene_mut(id)?;
    scene.add_camera(Camera::looking_at(Vec3::new(8.0, 7.0, 12.0), Vec3::ZERO));

    for x in -GRID..=GRID {
        for z in -GRID..=GRID {
            let position = Vec3::new(x as f32 * 2.0, 0.5, z as f32 * 2.0);
            let spin = Quat::from_rotation_y((x * z) as f32 * 0.2);
            scene.add_object(
                vec![cube],
                BASIC,
                Transform::from_trs(position, spin, Vec3::splat(0.6)),
            );
        }
    }
    scene.add_object(vec![plane], BASIC, Transform::default());
    scene.add_object(
        vec![cube],
        GLASS,
        Transform::from_translation(Vec3::new(0.0, 2.5, 3.0)).with_scale(Vec3::splat(1.5)),
    );

    scene.add_directional_light(Vec3::new(-0.4, -1.0, -0.3), Vec3::ONE, 0.8);
    scene.add_point_light(Vec3::new(3.0, 3.0, 3.0), Vec3::new(1.0, 0.6, 0.3), 2.0);
    scene.add_spot_light(
        Vec3::new(-6.0, 6.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        0.3,
        0.45,
        Vec3::new(0.3, 0.5, 1.0),
        3.0,
    );
    scene.set_skybox(Some(Skybox {
        mesh: cube,
        shader: SKYBOX.to_string(),
    }));

    engine.input_registrar().bind(InputKind::Key, |event, scene| {
        let InputEvent::Key { key, pressed: true } = event else {
            return;
        };
        let angle = match key.as_str() {
            "ArrowLeft" => -ORBIT_STEP,
            "ArrowRight" => ORBIT_STEP,
            _ => return,
        };
        if let Ok(camera) = scene.active_camera_mut() {
            let offset = Quat::from_rotation_y(angle) * (camera.eye - camera.target);
            camera.eye = camera.target + offset;
        }
    });
    Ok(())
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let resolution = &self.settings.resolution;
        let attributes = Window::default_attributes()
            .with_title("forward-render")
            .with_inner_size(winit::dpi::PhysicalSize::new(
                resolution.width,
                resolution.height,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        let started = pollster::block_on(WgpuBackend::new(window.clone(), &self.settings))
            .and_then(|backend| Engine::new(backend, self.settings.clone()))
            .and_then(|mut engine| {
                populate_demo(&mut engine)?;
                let size = window.inner_size();
                engine.resize(size.width, size.height)?;
                Ok(engine)
            });
        match started {
            Ok(engine) => {
                self.engine = Some(engine);
                window.request_redraw();
                self.window = Some(window);
            }
            Err(err) => {
                log::error!("Failed to start renderer: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.as_ref().filter(|window| window.id() == id) else {
            return;
        };
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                engine.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = engine.resize(size.width, size.height) {
                    log::error!("Resize failed: {err}");
                    event_loop.exit();
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = window.inner_size();
                if let Err(err) = engine.resize(size.width, size.height) {
                    log::error!("Resize failed: {err}");
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = engine.run_frame() {
                    log::error!("Frame failed: {err}");
                    engine.shutdown();
                    event_loop.exit();
                    return;
                }
                window.request_redraw();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                engine.shutdown();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Character(ref text),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } if text.as_str() == "p" => {
                let enabled = !engine.flags().shadows;
                engine.set_feature(Feature::Shadows, enabled);
            }
            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    logical_key, state, ..
                },
                ..
            } => {
                let key = match logical_key {
                    Key::Character(text) => text.to_string(),
                    Key::Named(named) => format!("{named:?}"),
                    _ => return,
                };
                engine.queue_input(InputEvent::Key {
                    key,
                    pressed: state == ElementState::Pressed,
                });
            }
            WindowEvent::CursorMoved { position, .. } => {
                engine.queue_input(InputEvent::CursorMoved {
                    x: position.x,
                    y: position.y,
                });
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    MouseButton::Left => 0,
                    MouseButton::Right => 1,
                    MouseButton::Middle => 2,
                    MouseButton::Back => 3,
                    MouseButton::Forward => 4,
                    MouseButton::Other(code) => code,
                };
                engine.queue_input(InputEvent::MouseButton {
                    button,
                    pressed: state == ElementState::Pressed,
                });
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let delta = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / 40.0,
                };
                engine.queue_input(InputEvent::Scroll { delta });
            }
            _ => {}
        }
    }
}
