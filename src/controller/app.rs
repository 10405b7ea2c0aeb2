use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::model::assets::default_manifest;
use crate::model::{AssetLoader, ModalContent, ModalSink, Scene, SizeState, Stores};
use crate::view::{FrameRenderer, OverlayState};

use super::camera_controller::CameraRig;
use super::frame_loop::{FrameLoop, FrameStages};
use super::input::{InputEvent, InputSource};
use super::physics::PhysicsWorld;
use super::world::{ReadinessGate, World};

/// Everything one running app owns apart from the frame loop itself.
pub struct Session<R> {
    config: AppConfig,
    stores: Stores,
    scene: Scene,
    physics: PhysicsWorld,
    assets: AssetLoader,
    gate: ReadinessGate,
    world: Option<World>,
    camera: CameraRig,
    input: InputSource,
    overlay: OverlayState,
    renderer: Option<R>,
    frame: u64,
}

impl<R: FrameRenderer> Session<R> {
    /// Wire the subsystems around already-started loaders.
    pub fn from_parts(config: AppConfig, stores: Stores, physics: PhysicsWorld, assets: AssetLoader) -> Self {
        let gate = ReadinessGate::new(&stores.readiness);
        let camera = CameraRig::new(config.camera.clone(), &stores.size);
        let input = InputSource::new(config.input.clone(), stores.input.clone());

        let mut overlay = OverlayState { show_debug: config.ui.show_debug, ..OverlayState::default() };
        if config.ui.show_instructions {
            overlay.modal.open_modal(&ModalContent::game_instruction());
        }

        Self {
            config,
            stores,
            scene: Scene::new(),
            physics,
            assets,
            gate,
            world: None,
            camera,
            input,
            overlay,
            renderer: None,
            frame: 0,
        }
    }

    /// Pick up finished loads and build the world the first frame both are
    /// done.
    fn poll_loading(&mut self) -> Result<(), AppError> {
        self.physics.poll_ready();
        self.assets.poll();

        let loading = &mut self.overlay.loading;
        loading.progress = self.assets.progress();
        loading.physics_ready = self.physics.is_ready();
        loading.assets_ready = self.assets.is_complete();
        if loading.failed.is_none() {
            loading.failed = self.assets.failure().map(|err| err.to_string());
        }

        if self.gate.poll() {
            match World::build(&self.config, self.assets.assets(), &mut self.scene, &mut self.physics, &self.stores) {
                Ok(world) => self.world = Some(world),
                Err(err) => {
                    self.overlay.loading.failed = Some(err.to_string());
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn refresh_debug(&mut self, dt: f32) {
        let debug = &mut self.overlay.debug;
        debug.dt = dt;
        debug.frame = self.frame;
        debug.bodies = self.physics.body_count();
        debug.input = self.stores.input.get();
        match &self.world {
            Some(world) => {
                debug.character = Some(self.scene.world_position(world.character_node()));
                debug.grounded = world.character().is_grounded();
                debug.clip = world.animation().current_clip();
            }
            None => {
                debug.character = None;
                debug.clip = None;
            }
        }
    }

    fn dispose(&mut self) {
        if let Some(world) = self.world.as_mut() {
            world.dispose();
        }
        self.world = None;
        self.camera.dispose();
        self.gate.dispose();
        self.input.dispose();
        self.physics.clear();
        self.scene.clear();
        self.assets.dispose();
        self.renderer = None;
        self.stores.reset();
    }
}

impl<R: FrameRenderer> FrameStages for Session<R> {
    fn step_physics(&mut self) {
        self.frame += 1;
        self.physics.step(&mut self.scene);
    }

    fn update_character(&mut self, dt: f32) {
        let Some(world) = self.world.as_mut() else { return };
        world.update_character(dt, &mut self.physics, &mut self.scene);
        world.update_portals(&mut self.scene, &mut self.overlay.modal);
        self.refresh_debug(dt);
    }

    fn update_animation(&mut self, dt: f32) {
        if let Some(world) = self.world.as_mut() {
            world.update_animation(dt);
        }
    }

    fn update_camera(&mut self) {
        let character = self.world.as_ref().and_then(World::character_body);
        self.camera.update(&self.physics, character);
    }

    fn render(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(&self.scene, &self.camera.camera, &mut self.overlay);
        }
    }
}

/// Entry point shared by the web and native shells: owns the frame loop and
/// the session it drives.
pub struct App<R> {
    frame_loop: FrameLoop,
    session: Session<R>,
}

impl<R: FrameRenderer> App<R> {
    /// Start loading physics and assets in the background.
    pub fn start(config: AppConfig, size: SizeState) -> Self {
        let stores = Stores::new(size);
        let mut physics = PhysicsWorld::new(config.physics.clone(), stores.readiness.clone());
        physics.start_loading();
        let assets = AssetLoader::start(default_manifest(), stores.readiness.clone());
        info!(width = size.width, height = size.height, "app started");
        Self::from_session(Session::from_parts(config, stores, physics, assets))
    }

    pub fn from_session(session: Session<R>) -> Self {
        Self {
            frame_loop: FrameLoop::new(&session.config.frame),
            session,
        }
    }

    /// The renderer usually arrives after GPU bring-up finishes.
    pub fn set_renderer(&mut self, renderer: R) {
        if self.frame_loop.is_cancelled() {
            return;
        }
        let size = self.session.stores.size.get();
        let mut renderer = renderer;
        renderer.resize(size.width, size.height, size.pixel_ratio);
        self.session.renderer = Some(renderer);
    }

    pub fn renderer_mut(&mut self) -> Option<&mut R> {
        self.session.renderer.as_mut()
    }

    /// Run one frame at `now` seconds. Errors are fatal to the session.
    pub fn frame(&mut self, now: f64) -> Result<(), AppError> {
        if self.frame_loop.is_cancelled() {
            return Ok(());
        }
        if let Err(err) = self.session.poll_loading() {
            error!("{err}");
            // keep drawing so the failure stays visible
            self.session.render();
            return Err(err);
        }
        self.frame_loop.tick(now, &mut self.session);
        Ok(())
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        if self.frame_loop.is_cancelled() {
            return;
        }
        self.session.input.process_event(&event);
        self.session.camera.handle_event(&event);
    }

    pub fn resize(&mut self, width: u32, height: u32, device_pixel_ratio: f32) {
        if self.frame_loop.is_cancelled() || width == 0 || height == 0 {
            return;
        }
        self.session
            .stores
            .size
            .replace(SizeState::new(width, height, device_pixel_ratio));
        if let Some(renderer) = self.session.renderer.as_mut() {
            renderer.resize(width, height, device_pixel_ratio);
        }
    }

    pub fn toggle_debug(&mut self) {
        self.session.overlay.show_debug = !self.session.overlay.show_debug;
    }

    pub fn world(&self) -> Option<&World> {
        self.session.world.as_ref()
    }

    pub fn scene(&self) -> &Scene {
        &self.session.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.session.scene
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.session.physics
    }

    pub fn stores(&self) -> &Stores {
        &self.session.stores
    }

    pub fn overlay(&self) -> &OverlayState {
        &self.session.overlay
    }

    pub fn camera(&self) -> &CameraRig {
        &self.session.camera
    }

    pub fn frames(&self) -> u64 {
        self.frame_loop.frames()
    }

    pub fn is_disposed(&self) -> bool {
        self.frame_loop.is_cancelled()
    }

    /// Stop the loop, drop every subscription and release scene, physics
    /// and assets. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.frame_loop.is_cancelled() {
            return;
        }
        self.frame_loop.dispose();
        self.session.dispose();
        info!("app disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::physics::PhysicsEngine;
    use crate::model::assets::{load_builtin, LoadResult, AVATAR, ENVIRONMENT};
    use crate::model::Camera;
    use futures::channel::{mpsc, oneshot};

    #[derive(Default)]
    struct CountingRenderer {
        frames: usize,
        last_size: Option<(u32, u32)>,
    }

    impl FrameRenderer for CountingRenderer {
        fn render(&mut self, scene: &Scene, _camera: &Camera, overlay: &mut OverlayState) {
            let _ = (scene.len(), overlay.loading.label());
            self.frames += 1;
        }

        fn resize(&mut self, width: u32, height: u32, _pixel_ratio: f32) {
            self.last_size = Some((width, height));
        }
    }

    struct Harness {
        app: App<CountingRenderer>,
        physics: Option<oneshot::Sender<PhysicsEngine>>,
        assets: mpsc::UnboundedSender<LoadResult>,
    }

    impl Harness {
        fn new(config: AppConfig) -> Self {
            let stores = Stores::new(SizeState::new(800, 600, 1.0));
            let (physics_tx, physics_rx) = oneshot::channel();
            let mut physics = PhysicsWorld::new(config.physics.clone(), stores.readiness.clone());
            physics.await_engine(physics_rx);
            let (assets_tx, assets_rx) = mpsc::unbounded();
            let assets = AssetLoader::with_receiver(default_manifest(), assets_rx, stores.readiness.clone());

            let mut app = App::from_session(Session::from_parts(config, stores, physics, assets));
            app.set_renderer(CountingRenderer::default());
            Self { app, physics: Some(physics_tx), assets: assets_tx }
        }

        fn finish_physics(&mut self) {
            if let Some(sender) = self.physics.take() {
                let _ = sender.send(PhysicsEngine::new(&AppConfig::default().physics));
            }
        }

        fn finish_asset(&self, id: &str) {
            self.assets
                .unbounded_send(pollster::block_on(load_builtin(id.to_string())))
                .unwrap();
        }

        fn finish_all(&mut self) {
            self.finish_physics();
            self.finish_asset(AVATAR);
            self.finish_asset(ENVIRONMENT);
        }
    }

    #[test]
    fn world_is_built_only_after_both_loads() {
        let mut h = Harness::new(AppConfig::default());

        h.app.frame(0.0).unwrap();
        assert!(h.app.world().is_none());

        h.finish_asset(AVATAR);
        h.finish_asset(ENVIRONMENT);
        h.app.frame(0.016).unwrap();
        assert!(h.app.world().is_none());
        assert!(h.app.overlay().loading.assets_ready);

        h.finish_physics();
        h.app.frame(0.032).unwrap();
        assert!(h.app.world().is_some());
        assert!(h.app.overlay().loading.is_done());

        let bodies = h.app.physics().body_count();
        h.app.frame(0.048).unwrap();
        assert_eq!(h.app.physics().body_count(), bodies);
    }

    #[test]
    fn every_frame_renders_while_loading() {
        let mut h = Harness::new(AppConfig::default());
        for i in 0..3 {
            h.app.frame(i as f64 * 0.016).unwrap();
        }
        assert_eq!(h.app.renderer_mut().unwrap().frames, 3);
        assert_eq!(h.app.frames(), 3);
    }

    #[test]
    fn instructions_open_on_start() {
        let h = Harness::new(AppConfig::default());
        let title = h.app.overlay().modal.current().map(|c| c.title.clone());
        assert_eq!(title, Some(ModalContent::game_instruction().title));
    }

    #[test]
    fn keyboard_input_moves_the_character() {
        let mut config = AppConfig::default();
        config.world.ball_count = 0;
        let mut h = Harness::new(config);
        h.finish_all();
        let mut now = 0.0;
        for _ in 0..30 {
            h.app.frame(now).unwrap();
            now += 1.0 / 60.0;
        }
        let node = h.app.world().unwrap().character_node();
        let start = h.app.scene().world_position(node);

        h.app.handle_input(InputEvent::KeyDown("KeyW".into()));
        assert!(h.app.stores().input.get().forward);
        for _ in 0..30 {
            h.app.frame(now).unwrap();
            now += 1.0 / 60.0;
        }
        let moved = h.app.scene().world_position(node);
        assert!(moved.z < start.z - 1.0, "{start} -> {moved}");
        assert_eq!(h.app.overlay().debug.clip.as_deref(), Some("run"));

        h.app.handle_input(InputEvent::FocusLost);
        assert!(!h.app.stores().input.get().is_moving());
    }

    #[test]
    fn resize_reaches_store_and_renderer() {
        let mut h = Harness::new(AppConfig::default());
        h.app.resize(1024, 512, 2.0);

        let size = h.app.stores().size.get();
        assert_eq!((size.width, size.height), (1024, 512));
        assert_eq!(h.app.renderer_mut().unwrap().last_size, Some((1024, 512)));

        h.app.frame(0.0).unwrap();
        assert!((h.app.camera().camera.aspect - 2.0).abs() < 1e-6);
    }

    #[test]
    fn dispose_stops_frames_and_releases_everything() {
        let mut h = Harness::new(AppConfig::default());
        h.finish_all();
        h.app.frame(0.0).unwrap();
        assert!(h.app.physics().body_count() > 0);

        h.app.dispose();
        h.app.dispose();
        assert!(h.app.is_disposed());
        assert_eq!(h.app.physics().body_count(), 0);
        assert!(h.app.world().is_none());
        assert_eq!(h.app.stores().input.listener_count(), 0);
        assert_eq!(h.app.stores().size.listener_count(), 0);
        assert_eq!(h.app.stores().readiness.listener_count(), 0);

        let frames = h.app.frames();
        h.app.frame(1.0).unwrap();
        h.app.handle_input(InputEvent::KeyDown("KeyW".into()));
        assert_eq!(h.app.frames(), frames);
        assert!(!h.app.stores().input.get().forward);
    }

    #[test]
    fn failed_asset_is_shown_and_world_never_builds() {
        let mut h = Harness::new(AppConfig::default());
        h.finish_physics();
        h.finish_asset(AVATAR);
        h.finish_asset("unknown");
        for i in 0..3 {
            h.app.frame(i as f64).unwrap();
        }
        assert!(h.app.world().is_none());
        assert!(h.app.overlay().loading.failed.is_some());
    }
}
