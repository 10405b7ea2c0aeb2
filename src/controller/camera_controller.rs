use std::cell::Cell;
use std::f32::consts::{PI, TAU};
use std::rc::Rc;

use glam::{Quat, Vec3};
use rapier3d::prelude::RigidBodyHandle;

use crate::config::CameraConfig;
use crate::model::{Camera, SizeState, Store, Subscription};

use super::input::InputEvent;
use super::physics::PhysicsWorld;

const MIN_POLAR: f32 = 1e-3;

/// Damped orbit around `target`, driven by pointer drag and wheel.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    damping: f32,
    rotate_speed: f32,
    zoom_speed: f32,
    min_distance: f32,
    max_distance: f32,
    delta_theta: f32,
    delta_phi: f32,
    scale: f32,
}

impl OrbitControls {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            target: Vec3::ZERO,
            damping: config.damping,
            rotate_speed: config.rotate_speed,
            zoom_speed: config.zoom_speed,
            min_distance: config.min_distance,
            max_distance: config.max_distance,
            delta_theta: 0.0,
            delta_phi: 0.0,
            scale: 1.0,
        }
    }

    /// Drag by `(dx, dy)` pixels on a viewport `height` pixels tall.
    pub fn rotate(&mut self, dx: f32, dy: f32, height: f32) {
        let height = height.max(1.0);
        self.delta_theta -= TAU * dx / height * self.rotate_speed;
        self.delta_phi -= TAU * dy / height * self.rotate_speed;
    }

    /// Positive `delta_y` zooms out.
    pub fn dolly(&mut self, delta_y: f32) {
        let step = 0.95f32.powf(self.zoom_speed);
        if delta_y > 0.0 {
            self.scale /= step;
        } else if delta_y < 0.0 {
            self.scale *= step;
        }
    }

    /// Apply a damped share of the accumulated rotation and the pending
    /// zoom, then aim the camera at `target`.
    pub fn update(&mut self, camera: &mut Camera) {
        let offset = camera.eye - self.target;
        let mut radius = offset.length();
        let (mut theta, mut phi) = if radius > 0.0 {
            (offset.x.atan2(offset.z), (offset.y / radius).clamp(-1.0, 1.0).acos())
        } else {
            (0.0, PI / 2.0)
        };

        theta += self.delta_theta * self.damping;
        phi = (phi + self.delta_phi * self.damping).clamp(MIN_POLAR, PI - MIN_POLAR);
        radius = (radius * self.scale).clamp(self.min_distance, self.max_distance);

        let offset = Vec3::new(
            radius * phi.sin() * theta.sin(),
            radius * phi.cos(),
            radius * phi.sin() * theta.cos(),
        );
        camera.eye = self.target + offset;
        camera.set_look_at(self.target);

        self.delta_theta *= 1.0 - self.damping;
        self.delta_phi *= 1.0 - self.damping;
        self.scale = 1.0;
    }
}

/// Desired eye and look-at point for a character at `position` facing
/// `rotation`.
pub fn follow_targets(config: &CameraConfig, position: Vec3, rotation: Quat) -> (Vec3, Vec3) {
    (
        position + rotation * config.camera_offset,
        position + rotation * config.target_offset,
    )
}

/// Perspective camera with orbit controls that trails the character.
pub struct CameraRig {
    pub camera: Camera,
    pub controls: OrbitControls,
    config: CameraConfig,
    aspect: Rc<Cell<f32>>,
    viewport_height: Rc<Cell<f32>>,
    subscription: Option<Subscription>,
}

impl CameraRig {
    pub fn new(config: CameraConfig, size: &Store<SizeState>) -> Self {
        let initial = size.get();
        let mut camera = Camera::new(initial.width, initial.height, config.fov_degrees);
        camera.eye = config.initial_eye;

        let aspect = Rc::new(Cell::new(initial.aspect));
        let viewport_height = Rc::new(Cell::new(initial.height as f32));
        let subscription = {
            let aspect = aspect.clone();
            let viewport_height = viewport_height.clone();
            size.subscribe(move |s| {
                aspect.set(s.aspect);
                viewport_height.set(s.height as f32);
            })
        };

        Self {
            camera,
            controls: OrbitControls::new(&config),
            config,
            aspect,
            viewport_height,
            subscription: Some(subscription),
        }
    }

    /// Pointer drag orbits, wheel zooms. Other events are ignored.
    pub fn handle_event(&mut self, event: &InputEvent) {
        match event {
            InputEvent::PointerDrag { dx, dy } => {
                self.controls.rotate(*dx, *dy, self.viewport_height.get());
            }
            InputEvent::Wheel { delta_y } => self.controls.dolly(*delta_y),
            _ => {}
        }
    }

    /// Lerp toward the character's live physics pose if there is one, then
    /// run the orbit controls.
    pub fn update(&mut self, physics: &PhysicsWorld, character: Option<RigidBodyHandle>) {
        self.camera.set_aspect(self.aspect.get());

        let pose = character.and_then(|handle| {
            Some((physics.body_translation(handle)?, physics.body_rotation(handle)?))
        });
        if let Some((position, rotation)) = pose {
            let (eye, target) = follow_targets(&self.config, position, rotation);
            let t = self.config.follow_factor;
            self.camera.eye = self.camera.eye.lerp(eye, t);
            self.controls.target = self.controls.target.lerp(target, t);
        }

        self.controls.update(&mut self.camera);
    }

    pub fn dispose(&mut self) {
        self.subscription = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsConfig;
    use crate::controller::physics::PhysicsEngine;
    use crate::model::AppReadiness;
    use rapier3d::na as nalgebra;
    use rapier3d::prelude::{vector, ColliderBuilder, RigidBodyBuilder};

    fn rig() -> (CameraRig, Store<SizeState>) {
        let size = Store::new(SizeState::new(800, 600, 1.0));
        (CameraRig::new(CameraConfig::default(), &size), size)
    }

    #[test]
    fn follow_offset_rotates_with_facing() {
        let config = CameraConfig::default();
        let (eye, target) = follow_targets(&config, Vec3::new(1.0, 3.0, 0.0), Quat::IDENTITY);
        assert_eq!(eye, Vec3::new(1.0, 13.0, 20.0));
        assert_eq!(target, Vec3::new(1.0, 5.0, 0.0));

        let (eye, _) = follow_targets(&config, Vec3::ZERO, Quat::from_rotation_y(PI));
        assert!((eye - Vec3::new(0.0, 10.0, -20.0)).length() < 1e-4);
    }

    #[test]
    fn camera_converges_on_character_without_snapping() {
        let (mut rig, _size) = rig();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default(), Store::new(AppReadiness::default()));
        let (sender, receiver) = futures::channel::oneshot::channel();
        let _ = sender.send(PhysicsEngine::new(&PhysicsConfig::default()));
        physics.await_engine(receiver);
        physics.poll_ready();

        let (body, _) = physics.engine_mut().unwrap().insert(
            RigidBodyBuilder::kinematic_position_based().translation(vector![0.0, 3.0, 0.0]),
            ColliderBuilder::cuboid(1.0, 2.5, 1.0),
        );

        let start = rig.camera.eye;
        rig.update(&physics, Some(body));
        let first = rig.camera.eye;
        assert!(first != start);
        assert!((first - Vec3::new(0.0, 13.0, 20.0)).length() > 10.0);

        for _ in 0..200 {
            rig.update(&physics, Some(body));
        }
        assert!((rig.camera.eye - Vec3::new(0.0, 13.0, 20.0)).length() < 0.05);
        assert!((rig.controls.target - Vec3::new(0.0, 5.0, 0.0)).length() < 0.05);
    }

    #[test]
    fn orbit_controls_run_without_character() {
        let (mut rig, _size) = rig();
        let before = rig.camera.eye;
        rig.handle_event(&InputEvent::PointerDrag { dx: 60.0, dy: 0.0 });
        rig.update(&PhysicsWorld::new(PhysicsConfig::default(), Store::new(AppReadiness::default())), None);

        let after = rig.camera.eye;
        assert!((after.length() - before.length()).abs() < 1e-2);
        assert!((after - before).length() > 1.0);
        assert_eq!(rig.camera.target, Vec3::ZERO);
    }

    #[test]
    fn rotation_is_damped_over_frames() {
        let config = CameraConfig::default();
        let mut controls = OrbitControls::new(&config);
        let mut camera = Camera::new(800, 600, 35.0);
        camera.eye = Vec3::new(0.0, 0.0, 50.0);

        controls.rotate(100.0, 0.0, 600.0);
        controls.update(&mut camera);
        let first = camera.eye;
        controls.update(&mut camera);
        let second = camera.eye;

        // second frame still moves, but by less
        let step_one = first.distance(Vec3::new(0.0, 0.0, 50.0));
        let step_two = second.distance(first);
        assert!(step_two > 0.0 && step_two < step_one);
    }

    #[test]
    fn wheel_zoom_and_resize() {
        let (mut rig, size) = rig();
        let before = rig.camera.eye.length();
        rig.handle_event(&InputEvent::Wheel { delta_y: -1.0 });
        size.replace(SizeState::new(1000, 500, 1.0));
        rig.update(&PhysicsWorld::new(PhysicsConfig::default(), Store::new(AppReadiness::default())), None);

        assert!(rig.camera.eye.length() < before);
        assert_eq!(rig.camera.aspect, 2.0);
    }
}
