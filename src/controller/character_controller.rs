use std::cell::Cell;
use std::f32::consts::PI;
use std::rc::Rc;

use glam::{Quat, Vec3};
use rapier3d::control::{CharacterAutostep, CharacterLength, EffectiveCharacterMovement, KinematicCharacterController};
use rapier3d::prelude::{ColliderBuilder, ColliderHandle, RigidBodyBuilder, RigidBodyHandle};
use tracing::{debug, trace};

use crate::config::CharacterConfig;
use crate::model::{InputState, NodeId, Scene, Store, Subscription};
use crate::utils::{from_vector, to_rotation, to_vector};

use super::physics::PhysicsWorld;

/// Unnormalized movement direction for the held keys. Forward is -Z.
pub fn raw_movement(input: &InputState) -> Vec3 {
    let mut movement = Vec3::ZERO;
    if input.forward {
        movement.z -= 1.0;
    }
    if input.backward {
        movement.z += 1.0;
    }
    if input.left {
        movement.x -= 1.0;
    }
    if input.right {
        movement.x += 1.0;
    }
    movement
}

/// Yaw that turns the avatar (which faces -Z) toward `movement`.
pub fn facing_angle(movement: Vec3) -> f32 {
    movement.x.atan2(movement.z) + PI
}

/// Normalized horizontal step for this frame plus the constant downward pull.
pub fn desired_translation(raw: Vec3, dt: f32, speed: f32, gravity_pull: f32) -> Vec3 {
    let mut step = raw.normalize_or_zero() * dt * speed;
    step.y = gravity_pull;
    step
}

/// Physics side of the character, present once attached.
#[derive(Debug, Clone, Copy)]
pub struct CharacterBody {
    pub node: NodeId,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

/// Drives the avatar from `InputState` through rapier's kinematic
/// character controller.
///
/// Constructed in two phases: `new` subscribes to input, `attach` creates
/// the kinematic body once the physics engine and the avatar node exist.
pub struct CharacterController {
    config: CharacterConfig,
    controller: KinematicCharacterController,
    input: Rc<Cell<InputState>>,
    subscription: Option<Subscription>,
    body: Option<CharacterBody>,
    last_movement: Option<EffectiveCharacterMovement>,
}

impl CharacterController {
    pub fn new(config: CharacterConfig, input_store: &Store<InputState>) -> Self {
        let input = Rc::new(Cell::new(input_store.get()));
        let subscription = {
            let input = input.clone();
            input_store.subscribe(move |state| input.set(*state))
        };

        let controller = KinematicCharacterController {
            offset: CharacterLength::Absolute(config.skin_offset),
            autostep: Some(CharacterAutostep {
                max_height: CharacterLength::Absolute(config.autostep_max_height),
                min_width: CharacterLength::Absolute(config.autostep_min_width),
                include_dynamic_bodies: false,
            }),
            snap_to_ground: Some(CharacterLength::Absolute(config.snap_to_ground)),
            ..KinematicCharacterController::default()
        };

        Self {
            config,
            controller,
            input,
            subscription: Some(subscription),
            body: None,
            last_movement: None,
        }
    }

    /// Create the kinematic body at the node's world pose. No-op until the
    /// physics engine is installed; returns whether the body exists.
    pub fn attach(&mut self, physics: &mut PhysicsWorld, scene: &Scene, node: NodeId) -> bool {
        if self.body.is_some() {
            return true;
        }
        let Some(engine) = physics.engine_mut() else { return false };
        if !scene.contains(node) {
            return false;
        }

        let half = self.config.half_extents;
        let body = RigidBodyBuilder::kinematic_position_based()
            .translation(to_vector(scene.world_position(node)))
            .build();
        let collider = ColliderBuilder::cuboid(half.x, half.y, half.z).mass(self.config.mass);

        let (body, collider) = engine.insert(body, collider);
        if let Some(rb) = engine.bodies.get_mut(body) {
            rb.set_rotation(to_rotation(scene.world_rotation(node)), true);
        }

        debug!(?node, "character body attached");
        self.body = Some(CharacterBody { node, body, collider });
        true
    }

    pub fn body(&self) -> Option<CharacterBody> {
        self.body
    }

    pub fn is_grounded(&self) -> bool {
        self.last_movement.as_ref().is_some_and(|m| m.grounded)
    }

    pub fn input(&self) -> InputState {
        self.input.get()
    }

    /// Per-frame update. Silently does nothing until attached.
    pub fn update(&mut self, dt: f32, physics: &mut PhysicsWorld, scene: &mut Scene) {
        let Some(character) = self.body else { return };
        let Some(engine) = physics.engine_mut() else { return };
        if !scene.contains(character.node) {
            return;
        }

        let raw = raw_movement(&self.input.get());

        if raw != Vec3::ZERO {
            let target = Quat::from_rotation_y(facing_angle(raw));
            if let Some(node) = scene.get_mut(character.node) {
                node.rotation = node.rotation.slerp(target, self.config.turn_factor);
            }
        }

        let desired = desired_translation(raw, dt, self.config.speed, self.config.gravity_pull);
        let Some(movement) = engine.move_character(
            &self.controller,
            character.body,
            character.collider,
            self.config.mass,
            to_vector(desired),
            dt,
        ) else {
            return;
        };

        let facing = scene.world_rotation(character.node);
        if let Some(body) = engine.bodies.get_mut(character.body) {
            let next = body.translation() + movement.translation;
            body.set_next_kinematic_translation(next);
            body.set_next_kinematic_rotation(to_rotation(facing));
        }
        trace!(grounded = movement.grounded, "character moved");
        self.last_movement = Some(movement);

        // damp the visual toward the physics pose
        let Some(target) = engine.bodies.get(character.body).map(|b| from_vector(b.translation())) else {
            return;
        };
        let local_target = scene
            .parent_world_matrix(character.node)
            .map(|parent| parent.inverse().transform_point3(target))
            .unwrap_or(target);
        if let Some(node) = scene.get_mut(character.node) {
            node.position = node.position.lerp(local_target, self.config.follow_factor);
        }
    }

    /// Forget the body and stop listening to input.
    pub fn dispose(&mut self) {
        self.subscription = None;
        self.body = None;
        self.last_movement = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsConfig;
    use crate::controller::physics::{BodyKind, ColliderShape, PhysicsEngine};
    use crate::model::{AppReadiness, Geometry, Node};
    use std::f32::consts::FRAC_1_SQRT_2;
    use std::sync::Arc;

    fn ready_physics() -> PhysicsWorld {
        let readiness = Store::new(AppReadiness::default());
        let mut physics = PhysicsWorld::new(PhysicsConfig::default(), readiness);
        let (sender, receiver) = futures::channel::oneshot::channel();
        let _ = sender.send(PhysicsEngine::new(&PhysicsConfig::default()));
        physics.await_engine(receiver);
        assert!(physics.poll_ready());
        physics
    }

    fn ground(scene: &mut Scene, physics: &mut PhysicsWorld) {
        let node = scene.add(
            Scene::ROOT,
            Node::new("ground").with_mesh(Arc::new(Geometry::cuboid(100.0, 1.0, 100.0)), [1.0; 4]),
        );
        physics.add(scene, node, BodyKind::Fixed, ColliderShape::Cuboid).unwrap();
    }

    #[test]
    fn movement_is_unit_length_whenever_any_direction_is_held() {
        for bits in 0u8..16 {
            let input = InputState {
                forward: bits & 1 != 0,
                backward: bits & 2 != 0,
                left: bits & 4 != 0,
                right: bits & 8 != 0,
            };
            let raw = raw_movement(&input);
            let step = desired_translation(raw, 1.0, 1.0, 0.0);
            let horizontal = Vec3::new(step.x, 0.0, step.z).length();
            if raw == Vec3::ZERO {
                assert_eq!(horizontal, 0.0);
            } else {
                assert!((horizontal - 1.0).abs() < 1e-6, "{input:?}");
            }
        }
    }

    #[test]
    fn forward_left_faces_the_diagonal() {
        let input = InputState { forward: true, left: true, ..InputState::default() };
        let raw = raw_movement(&input);
        assert_eq!(raw, Vec3::new(-1.0, 0.0, -1.0));

        let normalized = raw.normalize();
        assert!((normalized - Vec3::new(-FRAC_1_SQRT_2, 0.0, -FRAC_1_SQRT_2)).length() < 1e-6);
        assert!((facing_angle(normalized) - 5.0 * PI / 4.0).abs() < 1e-5);

        let step = desired_translation(raw, 0.1, 25.0, -1.0);
        assert_eq!(step.y, -1.0);
        assert!((Vec3::new(step.x, 0.0, step.z).length() - 2.5).abs() < 1e-5);
    }

    #[test]
    fn update_before_attach_is_a_no_op() {
        let input = Store::new(InputState { forward: true, ..InputState::default() });
        let mut controller = CharacterController::new(CharacterConfig::default(), &input);
        let mut physics = PhysicsWorld::new(PhysicsConfig::default(), Store::new(AppReadiness::default()));
        let mut scene = Scene::new();
        let node = scene.add(Scene::ROOT, Node::new("avatar"));

        assert!(!controller.attach(&mut physics, &scene, node));
        controller.update(0.016, &mut physics, &mut scene);
        assert_eq!(scene.get(node).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn input_changes_reach_the_controller() {
        let input = Store::new(InputState::default());
        let mut controller = CharacterController::new(CharacterConfig::default(), &input);
        input.set_state(|s| s.right = true);
        assert!(controller.input().right);

        controller.dispose();
        assert_eq!(input.listener_count(), 0);
    }

    #[test]
    fn character_settles_on_ground() {
        let mut scene = Scene::new();
        let mut physics = ready_physics();
        ground(&mut scene, &mut physics);

        let input = Store::new(InputState::default());
        let mut controller = CharacterController::new(CharacterConfig::default(), &input);
        let node = scene.add(Scene::ROOT, Node::new("avatar").at(Vec3::new(0.0, 4.0, 10.0)));
        assert!(controller.attach(&mut physics, &scene, node));

        for _ in 0..30 {
            physics.step(&mut scene);
            controller.update(1.0 / 60.0, &mut physics, &mut scene);
        }

        let body = controller.body().unwrap().body;
        let y = physics.body_translation(body).unwrap().y;
        // ground top at 0.5, half height 2.5
        assert!(y > 2.9 && y < 3.1, "character rests at {y}");
        assert!(controller.is_grounded());
    }

    #[test]
    fn held_key_moves_and_turns_the_avatar() {
        let mut scene = Scene::new();
        let mut physics = ready_physics();
        ground(&mut scene, &mut physics);

        let input = Store::new(InputState::default());
        let mut controller = CharacterController::new(CharacterConfig::default(), &input);
        let node = scene.add(Scene::ROOT, Node::new("avatar").at(Vec3::new(0.0, 3.2, 0.0)));
        controller.attach(&mut physics, &scene, node);

        input.set_state(|s| s.right = true);
        for _ in 0..20 {
            physics.step(&mut scene);
            controller.update(1.0 / 60.0, &mut physics, &mut scene);
        }

        let body = controller.body().unwrap().body;
        let translation = physics.body_translation(body).unwrap();
        assert!(translation.x > 1.0);
        assert!(translation.z.abs() < 1e-3);

        // visual trails behind physics but follows it
        let visual = scene.get(node).unwrap().position;
        assert!(visual.x > 0.0 && visual.x <= translation.x + 1e-4);

        // turning toward +X means yaw heading to atan2(1, 0) + pi
        let (axis, angle) = scene.get(node).unwrap().rotation.to_axis_angle();
        assert!(angle > 0.1);
        assert!(axis.y.abs() > 0.99);
    }
}
