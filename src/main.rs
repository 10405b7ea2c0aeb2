use std::sync::Arc;

use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

// Import from the library crate
use portfolio_world::controller::frame_loop::{Clock, SystemClock};
use portfolio_world::model::SizeState;
use portfolio_world::view::{gpu_init, GpuContext, SceneRenderer};
use portfolio_world::{logging, App, AppConfig, GpuError, InputEvent};

/// Pixels per wheel line, to match browser `deltaY`.
const LINE_HEIGHT: f32 = 100.0;

/// Window, overlay input and the app, created once the event loop resumes.
struct Running {
    window: Arc<Window>,
    egui_state: egui_winit::State,
    app: App<SceneRenderer>,
}

struct Shell {
    config: AppConfig,
    running: Option<Running>,
    clock: SystemClock,
    dragging: bool,
}

impl Shell {
    fn new(config: AppConfig) -> Self {
        Self { config, running: None, clock: SystemClock::new(), dragging: false }
    }

    fn open(&self, event_loop: &ActiveEventLoop) -> Result<Running, String> {
        let window_attributes = Window::default_attributes()
            .with_title("Portfolio World")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = Arc::new(event_loop.create_window(window_attributes).map_err(|e| e.to_string())?);
        let size = window.inner_size();
        let scale = window.scale_factor() as f32;

        let instance = gpu_init::create_instance();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| GpuError::from(e).to_string())?;
        let gpu = pollster::block_on(GpuContext::from_surface(&instance, surface, size.width, size.height))
            .map_err(|e| e.to_string())?;

        let renderer = SceneRenderer::new(gpu, scale);
        let egui_state = egui_winit::State::new(
            renderer.egui_ctx().clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(scale),
            None,
            None,
        );

        let mut app = App::start(self.config.clone(), SizeState::new(size.width, size.height, scale));
        app.set_renderer(renderer);
        info!(width = size.width, height = size.height, scale, "window opened");

        Ok(Running { window, egui_state, app })
    }
}

fn key_event(code: KeyCode, state: ElementState) -> InputEvent {
    // winit's KeyCode names match DOM `KeyboardEvent.code` (KeyW, ArrowUp, ...)
    let code = format!("{code:?}");
    match state {
        ElementState::Pressed => InputEvent::KeyDown(code),
        ElementState::Released => InputEvent::KeyUp(code),
    }
}

impl ApplicationHandler for Shell {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match self.open(event_loop) {
            Ok(running) => self.running = Some(running),
            Err(err) => {
                error!("startup failed: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(running) = self.running.as_mut() else { return };
        if window_id != running.window.id() {
            return;
        }
        let consumed = running.egui_state.on_window_event(&running.window, &event).consumed;

        match event {
            WindowEvent::CloseRequested => {
                running.app.dispose();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                running
                    .app
                    .resize(size.width, size.height, running.window.scale_factor() as f32);
            }
            WindowEvent::Focused(false) => running.app.handle_input(InputEvent::FocusLost),
            WindowEvent::Occluded(occluded) => {
                running.app.handle_input(InputEvent::VisibilityChanged { visible: !occluded });
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else { return };
                if code == KeyCode::F3 && event.state.is_pressed() && !event.repeat {
                    running.app.toggle_debug();
                }
                // releases always go through so no key stays held
                if !consumed || !event.state.is_pressed() {
                    running.app.handle_input(key_event(code, event.state));
                }
            }
            WindowEvent::MouseInput { button: MouseButton::Left, state, .. } => {
                self.dragging = state.is_pressed() && !consumed;
            }
            WindowEvent::MouseWheel { delta, .. } if !consumed => {
                let delta_y = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y * LINE_HEIGHT,
                    MouseScrollDelta::PixelDelta(p) => -p.y as f32,
                };
                running.app.handle_input(InputEvent::Wheel { delta_y });
            }
            WindowEvent::RedrawRequested => {
                let raw_input = running.egui_state.take_egui_input(&running.window);
                if let Some(renderer) = running.app.renderer_mut() {
                    renderer.set_egui_input(raw_input);
                }

                if let Err(err) = running.app.frame(self.clock.now()) {
                    error!("frame failed: {err}");
                }

                if let Some(output) = running.app.renderer_mut().and_then(SceneRenderer::take_platform_output) {
                    running.egui_state.handle_platform_output(&running.window, output);
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        let Some(running) = self.running.as_mut() else { return };
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.dragging {
                running.app.handle_input(InputEvent::PointerDrag { dx: delta.0 as f32, dy: delta.1 as f32 });
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.as_ref() {
            running.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.as_mut() {
            running.app.dispose();
        }
    }
}

fn main() -> Result<(), winit::error::EventLoopError> {
    logging::init();

    let event_loop = EventLoop::new()?;
    let mut shell = Shell::new(AppConfig::default());
    event_loop.run_app(&mut shell)
}
