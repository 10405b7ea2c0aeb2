use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use glam::Vec3;
use rapier3d::prelude::RigidBodyHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AssetError};
use crate::model::assets::{AVATAR, ENVIRONMENT};
use crate::model::modal::portal_content;
use crate::model::{
    AppReadiness, Geometry, LoadedAssets, ModalSink, Node, NodeId, Scene, Store, Stores, Subscription,
};

use super::animation_controller::AnimationSelector;
use super::character_controller::CharacterController;
use super::physics::{BodyKind, ColliderShape, PhysicsTag, PhysicsWorld};
use super::portal::Portal;

/// Opens exactly once, on the first poll after both loads have completed.
pub struct ReadinessGate {
    ready: Rc<Cell<bool>>,
    opened: bool,
    subscription: Option<Subscription>,
}

impl ReadinessGate {
    pub fn new(readiness: &Store<AppReadiness>) -> Self {
        let ready = Rc::new(Cell::new(readiness.get().is_ready()));
        let subscription = {
            let ready = ready.clone();
            readiness.subscribe(move |state| {
                if state.is_ready() {
                    ready.set(true);
                }
            })
        };
        Self { ready, opened: false, subscription: Some(subscription) }
    }

    /// `true` the first time it is called after readiness, `false` forever
    /// after.
    pub fn poll(&mut self) -> bool {
        if self.opened || !self.ready.get() {
            return false;
        }
        self.opened = true;
        self.subscription = None;
        true
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn dispose(&mut self) {
        self.subscription = None;
    }
}

/// Small deterministic generator for scattering props.
struct Scatter(u32);

impl Scatter {
    fn next(&mut self) -> f32 {
        // xorshift32
        let mut x = self.0.max(1);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x as f32 / u32::MAX as f32
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next()
    }
}

/// Gameplay objects built once both the physics engine and the assets are
/// ready.
pub struct World {
    environment: NodeId,
    character_node: NodeId,
    character: CharacterController,
    animation: AnimationSelector,
    portals: Vec<Portal>,
    balls: Vec<NodeId>,
}

impl World {
    /// Instantiate the environment and the avatar, give every tagged node a
    /// physics body and hook up controllers and portals.
    pub fn build(
        config: &AppConfig,
        assets: &LoadedAssets,
        scene: &mut Scene,
        physics: &mut PhysicsWorld,
        stores: &Stores,
    ) -> Result<Self, AppError> {
        let environment_model = assets
            .model(ENVIRONMENT)
            .ok_or_else(|| AssetError::UnknownAsset(ENVIRONMENT.to_string()))?;
        let avatar_model = assets
            .model(AVATAR)
            .ok_or_else(|| AssetError::UnknownAsset(AVATAR.to_string()))?;

        let tags = environment_model
            .nodes
            .iter()
            .map(|n| n.extras.as_deref().map(str::parse::<PhysicsTag>).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let environment = environment_model.instantiate(scene, Scene::ROOT);
        let mut bodies = Vec::new();
        let added = add_environment_bodies(scene, physics, &environment.nodes, &tags, &mut bodies)
            .and_then(|()| scatter_balls(config, scene, physics, environment.root, &mut bodies));
        let balls = match added {
            Ok(balls) => balls,
            Err(err) => {
                // undo the partial build so no orphan bodies keep stepping
                for node in bodies {
                    physics.remove(node);
                }
                scene.remove(environment.root);
                return Err(err);
            }
        };

        let mut portals = Vec::new();
        for (model_node, &node) in environment_model.nodes.iter().zip(&environment.nodes) {
            let Some(key) = model_node.name.strip_prefix(config.portal.prefix.as_str()) else { continue };
            match portal_content(key) {
                Some(content) => portals.push(Portal::new(node, content, &config.portal)),
                None => warn!(portal = %model_node.name, "portal without content"),
            }
        }

        let avatar = avatar_model.instantiate(scene, Scene::ROOT);
        if let Some(node) = scene.get_mut(avatar.root) {
            node.position = config.character.spawn;
        }
        let mut character = CharacterController::new(config.character.clone(), &stores.input);
        character.attach(physics, scene, avatar.root);

        let animation = AnimationSelector::new(config.animation.clone(), &avatar_model.clips, &stores.input);

        info!(
            bodies = physics.body_count(),
            portals = portals.len(),
            balls = balls.len(),
            "world built"
        );

        Ok(Self {
            environment: environment.root,
            character_node: avatar.root,
            character,
            animation,
            portals,
            balls,
        })
    }

    pub fn update_character(&mut self, dt: f32, physics: &mut PhysicsWorld, scene: &mut Scene) {
        self.character.update(dt, physics, scene);
    }

    pub fn update_animation(&mut self, dt: f32) {
        self.animation.update(dt);
    }

    pub fn update_portals(&mut self, scene: &mut Scene, modal: &mut dyn ModalSink) {
        if !scene.contains(self.character_node) {
            return;
        }
        let position = scene.world_position(self.character_node);
        for portal in &mut self.portals {
            portal.update(scene, position, modal);
        }
    }

    /// Rigid body the camera follows.
    pub fn character_body(&self) -> Option<RigidBodyHandle> {
        self.character.body().map(|b| b.body)
    }

    pub fn character_node(&self) -> NodeId {
        self.character_node
    }

    pub fn character(&self) -> &CharacterController {
        &self.character
    }

    pub fn animation(&self) -> &AnimationSelector {
        &self.animation
    }

    pub fn portals(&self) -> &[Portal] {
        &self.portals
    }

    pub fn environment(&self) -> NodeId {
        self.environment
    }

    pub fn balls(&self) -> &[NodeId] {
        &self.balls
    }

    /// Drop input subscriptions. Scene and physics are cleared by the owner.
    pub fn dispose(&mut self) {
        self.character.dispose();
        self.animation.dispose();
        self.portals.clear();
        debug!("world disposed");
    }
}

fn add_environment_bodies(
    scene: &Scene,
    physics: &mut PhysicsWorld,
    nodes: &[NodeId],
    tags: &[Option<PhysicsTag>],
    bodies: &mut Vec<NodeId>,
) -> Result<(), AppError> {
    for (&node, tag) in nodes.iter().zip(tags) {
        let Some(tag) = tag else { continue };
        physics.add(scene, node, tag.body, tag.shape)?;
        bodies.push(node);
    }
    Ok(())
}

fn scatter_balls(
    config: &AppConfig,
    scene: &mut Scene,
    physics: &mut PhysicsWorld,
    parent: NodeId,
    bodies: &mut Vec<NodeId>,
) -> Result<Vec<NodeId>, AppError> {
    let settings = &config.world;
    let geometry = Arc::new(Geometry::sphere(settings.ball_radius, 16, 12));
    let mut rng = Scatter(settings.ball_seed);

    let mut balls = Vec::with_capacity(settings.ball_count);
    for i in 0..settings.ball_count {
        let position = Vec3::new(
            rng.range(-settings.spread, settings.spread),
            rng.range(10.0, 30.0),
            rng.range(-settings.spread, settings.spread),
        );
        let color = [rng.next(), rng.next(), rng.next(), 1.0];
        let node = scene.add(
            parent,
            Node::new(format!("ball_{i}")).at(position).with_mesh(geometry.clone(), color),
        );
        physics.add(scene, node, BodyKind::Dynamic, ColliderShape::Ball)?;
        bodies.push(node);
        balls.push(node);
    }
    Ok(balls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsConfig;
    use crate::controller::physics::PhysicsEngine;
    use crate::error::PhysicsError;
    use crate::model::assets::{avatar_model, environment_model};
    use crate::model::{Asset, ModalManager, SizeState};

    fn loaded() -> LoadedAssets {
        let mut assets = LoadedAssets::default();
        assets.insert(AVATAR, Asset::Model(avatar_model()));
        assets.insert(ENVIRONMENT, Asset::Model(environment_model()));
        assets
    }

    fn ready_physics(stores: &Stores) -> PhysicsWorld {
        let mut physics = PhysicsWorld::new(PhysicsConfig::default(), stores.readiness.clone());
        let (sender, receiver) = futures::channel::oneshot::channel();
        let _ = sender.send(PhysicsEngine::new(&PhysicsConfig::default()));
        physics.await_engine(receiver);
        physics.poll_ready();
        physics
    }

    #[test]
    fn gate_waits_for_both_flags_and_opens_once() {
        let readiness = Store::new(AppReadiness::default());
        let mut gate = ReadinessGate::new(&readiness);
        assert!(!gate.poll());

        readiness.set_state(|r| r.physics_ready = true);
        assert!(!gate.poll());

        readiness.set_state(|r| r.assets_ready = true);
        readiness.set_state(|r| r.assets_ready = true);
        assert!(gate.poll());

        readiness.set_state(|r| r.physics_ready = true);
        assert!(!gate.poll());
        assert!(gate.is_open());
        assert_eq!(readiness.listener_count(), 0);
    }

    #[test]
    fn gate_created_after_readiness_still_opens() {
        let readiness = Store::new(AppReadiness { physics_ready: true, assets_ready: true });
        let mut gate = ReadinessGate::new(&readiness);
        assert!(gate.poll());
        assert!(!gate.poll());
    }

    #[test]
    fn build_creates_bodies_portals_and_character() {
        let stores = Stores::new(SizeState::new(800, 600, 1.0));
        let mut physics = ready_physics(&stores);
        let mut scene = Scene::new();
        let config = AppConfig::default();
        let assets = loaded();

        let world = World::build(&config, &assets, &mut scene, &mut physics, &stores).unwrap();

        let tagged = environment_model().nodes.iter().filter(|n| n.extras.is_some()).count();
        assert_eq!(physics.body_count(), tagged + config.world.ball_count);
        assert_eq!(world.portals().len(), 3);
        assert!(world.character_body().is_some());
        assert_eq!(world.animation().current_clip().as_deref(), Some("idle"));
        assert_eq!(scene.world_position(world.character_node()), config.character.spawn);
    }

    #[test]
    fn unknown_tag_fails_the_build() {
        let stores = Stores::new(SizeState::new(800, 600, 1.0));
        let mut physics = ready_physics(&stores);
        let mut scene = Scene::new();

        let mut environment = environment_model();
        let last_tagged = environment.nodes.iter().rposition(|n| n.extras.is_some()).unwrap();
        assert!(last_tagged > 1);
        environment.nodes[last_tagged].extras = Some("fixed:cone".to_string());
        let mut assets = loaded();
        assets.insert(ENVIRONMENT, Asset::Model(environment));

        let result = World::build(&AppConfig::default(), &assets, &mut scene, &mut physics, &stores);
        assert!(matches!(
            result,
            Err(AppError::World(PhysicsError::UnknownColliderShape(shape))) if shape == "cone"
        ));
        assert_eq!(physics.body_count(), 0);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn failure_after_bodies_were_added_rolls_back() {
        let stores = Stores::new(SizeState::new(800, 600, 1.0));
        let mut physics = ready_physics(&stores);
        let mut scene = Scene::new();

        // a valid tag on a node without geometry only fails once bodies exist
        let mut environment = environment_model();
        let last_tagged = environment.nodes.iter().rposition(|n| n.extras.is_some()).unwrap();
        environment.nodes[last_tagged].mesh = None;
        let mut assets = loaded();
        assets.insert(ENVIRONMENT, Asset::Model(environment));

        let result = World::build(&AppConfig::default(), &assets, &mut scene, &mut physics, &stores);
        assert!(matches!(result, Err(AppError::World(PhysicsError::MissingGeometry(_)))));
        assert_eq!(physics.body_count(), 0);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn missing_avatar_is_reported() {
        let stores = Stores::new(SizeState::new(800, 600, 1.0));
        let mut physics = ready_physics(&stores);
        let mut scene = Scene::new();
        let mut assets = LoadedAssets::default();
        assets.insert(ENVIRONMENT, Asset::Model(environment_model()));

        let result = World::build(&AppConfig::default(), &assets, &mut scene, &mut physics, &stores);
        assert!(matches!(result, Err(AppError::Assets(AssetError::UnknownAsset(id))) if id == AVATAR));
    }

    #[test]
    fn walking_into_a_portal_opens_its_dialog() {
        let stores = Stores::new(SizeState::new(800, 600, 1.0));
        let mut physics = ready_physics(&stores);
        let mut scene = Scene::new();
        let mut world = World::build(&AppConfig::default(), &loaded(), &mut scene, &mut physics, &stores).unwrap();
        let mut modal = ModalManager::new();

        let portal = world.portals()[0].node();
        let mut at_portal = scene.world_position(portal);
        at_portal.y = 3.0;
        scene.get_mut(world.character_node()).unwrap().position = at_portal;

        world.update_portals(&mut scene, &mut modal);
        world.update_portals(&mut scene, &mut modal);
        assert_eq!(modal.open_count(), 1);
        assert!(modal.is_open());
    }
}
