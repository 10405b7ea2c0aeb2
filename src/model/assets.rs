use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use futures::channel::mpsc;
use glam::{Quat, Vec3};
use tracing::{error, info, warn};

use crate::error::AssetError;
use crate::utils::spawn_task;

use super::animation::AnimationClip;
use super::geometry::Geometry;
use super::scene::{Node, NodeId, Scene};
use super::store::{AppReadiness, Store};

pub const AVATAR: &str = "avatar";
pub const ENVIRONMENT: &str = "environment";

/// Ids every session waits for before gameplay starts.
pub fn default_manifest() -> Vec<String> {
    vec![AVATAR.to_string(), ENVIRONMENT.to_string()]
}

/// One node of a model, parent given as an index into the model's node list.
#[derive(Debug, Clone)]
pub struct ModelNode {
    pub name: String,
    pub parent: Option<usize>,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub mesh: Option<(Arc<Geometry>, [f32; 4])>,
    /// Physics tag such as `"fixed:cuboid"`.
    pub extras: Option<String>,
}

impl ModelNode {
    fn group(name: &str, parent: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            mesh: None,
            extras: None,
        }
    }

    fn mesh(name: &str, parent: usize, geometry: Geometry, color: [f32; 4], position: Vec3) -> Self {
        Self {
            position,
            mesh: Some((Arc::new(geometry), color)),
            ..Self::group(name, Some(parent))
        }
    }

    fn tagged(mut self, tag: &str) -> Self {
        self.extras = Some(tag.to_string());
        self
    }

    fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelAsset {
    pub nodes: Vec<ModelNode>,
    pub clips: Vec<AnimationClip>,
}

/// Scene ids of an instantiated model, index-aligned with `ModelAsset::nodes`.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    pub root: NodeId,
    pub nodes: Vec<NodeId>,
}

impl ModelAsset {
    /// Copy the node hierarchy into `scene` below `parent`.
    pub fn instantiate(&self, scene: &mut Scene, parent: NodeId) -> ModelInstance {
        let mut ids: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        for model_node in &self.nodes {
            let attach_to = model_node
                .parent
                .and_then(|idx| ids.get(idx).copied())
                .unwrap_or(parent);
            let mut node = Node::new(model_node.name.clone())
                .at(model_node.position)
                .rotated(model_node.rotation)
                .scaled(model_node.scale);
            if let Some((geometry, color)) = &model_node.mesh {
                node = node.with_mesh(geometry.clone(), *color);
            }
            ids.push(scene.add(attach_to, node));
        }
        let root = ids.first().copied().unwrap_or(parent);
        ModelInstance { root, nodes: ids }
    }
}

#[derive(Debug, Clone)]
pub enum Asset {
    Model(ModelAsset),
}

/// Keyed map of everything the loader has delivered so far.
#[derive(Debug, Clone, Default)]
pub struct LoadedAssets {
    assets: BTreeMap<String, Asset>,
}

impl LoadedAssets {
    pub fn insert(&mut self, id: impl Into<String>, asset: Asset) {
        self.assets.insert(id.into(), asset);
    }

    pub fn get(&self, id: &str) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn model(&self, id: &str) -> Option<&ModelAsset> {
        match self.assets.get(id)? {
            Asset::Model(model) => Some(model),
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn clear(&mut self) {
        self.assets.clear();
    }
}

pub type LoadResult = Result<(String, Asset), AssetError>;

/// Collects asynchronously loaded assets and publishes `assets_ready` once
/// every id in the manifest has arrived.
pub struct AssetLoader {
    expected: Vec<String>,
    loaded: LoadedAssets,
    receiver: Option<mpsc::UnboundedReceiver<LoadResult>>,
    readiness: Store<AppReadiness>,
    published: bool,
    failure: Option<AssetError>,
}

impl AssetLoader {
    /// Kick off one load task per manifest id.
    pub fn start(manifest: Vec<String>, readiness: Store<AppReadiness>) -> Self {
        let (sender, receiver) = mpsc::unbounded();
        for id in &manifest {
            let sender = sender.clone();
            let id = id.clone();
            spawn_task(async move {
                let result = load_builtin(id).await;
                // receiver gone means the session was torn down
                let _ = sender.unbounded_send(result);
            });
        }
        Self::with_receiver(manifest, receiver, readiness)
    }

    pub fn with_receiver(
        expected: Vec<String>,
        receiver: mpsc::UnboundedReceiver<LoadResult>,
        readiness: Store<AppReadiness>,
    ) -> Self {
        Self {
            expected,
            loaded: LoadedAssets::default(),
            receiver: Some(receiver),
            readiness,
            published: false,
            failure: None,
        }
    }

    /// Drain finished loads without blocking.
    pub fn poll(&mut self) {
        if self.receiver.is_none() {
            return;
        }

        loop {
            let Some(receiver) = self.receiver.as_mut() else { break };
            match receiver.try_next() {
                Ok(Some(Ok((id, asset)))) => {
                    self.loaded.insert(id.clone(), asset);
                    info!(asset = %id, progress = %format!("{:.0}%", self.progress() * 100.0), "asset loaded");
                }
                Ok(Some(Err(err))) => {
                    error!("asset load failed: {err}");
                    self.failure.get_or_insert(err);
                }
                Ok(None) => {
                    if !self.is_complete() {
                        error!("{}", AssetError::LoaderDropped);
                        self.failure.get_or_insert(AssetError::LoaderDropped);
                    }
                    self.receiver = None;
                    break;
                }
                Err(_) => break,
            }
        }

        if self.is_complete() && !self.published {
            self.published = true;
            info!("all assets loaded");
            self.readiness.set_state(|r| r.assets_ready = true);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|id| self.loaded.get(id).is_some())
    }

    /// Fraction of manifest ids loaded, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.expected.is_empty() {
            return 1.0;
        }
        let done = self.expected.iter().filter(|id| self.loaded.get(id).is_some()).count();
        done as f32 / self.expected.len() as f32
    }

    /// First load error, if any. Loading does not retry.
    pub fn failure(&self) -> Option<&AssetError> {
        self.failure.as_ref()
    }

    pub fn assets(&self) -> &LoadedAssets {
        &self.loaded
    }

    pub fn dispose(&mut self) {
        self.receiver = None;
        self.loaded.clear();
    }
}

/// Built-in procedural loader standing in for a glTF pipeline.
pub async fn load_builtin(id: String) -> LoadResult {
    let model = match id.as_str() {
        AVATAR => avatar_model(),
        ENVIRONMENT => environment_model(),
        _ => {
            warn!(asset = %id, "unknown asset id");
            return Err(AssetError::UnknownAsset(id));
        }
    };
    Ok((id, Asset::Model(model)))
}

/// Blocky avatar facing -Z with `idle` and `run` clips.
pub fn avatar_model() -> ModelAsset {
    let skin = [0.95, 0.75, 0.55, 1.0];
    let shirt = [0.2, 0.45, 0.85, 1.0];
    let visor = [0.1, 0.1, 0.12, 1.0];

    let nodes = vec![
        ModelNode::group(AVATAR, None),
        ModelNode::mesh("torso", 0, Geometry::cuboid(1.6, 3.0, 1.0), shirt, Vec3::new(0.0, -0.5, 0.0)),
        ModelNode::mesh("head", 0, Geometry::sphere(0.7, 16, 12), skin, Vec3::new(0.0, 1.6, 0.0)),
        ModelNode::mesh("visor", 0, Geometry::cuboid(0.8, 0.3, 0.2), visor, Vec3::new(0.0, 1.7, -0.65)),
    ];

    ModelAsset {
        nodes,
        clips: vec![AnimationClip::new("idle", 2.0), AnimationClip::new("run", 0.8)],
    }
}

/// Walled ground plate with stairs, a trimesh ramp and three portals.
pub fn environment_model() -> ModelAsset {
    let ground = [0.25, 0.88, 0.82, 1.0];
    let wall = [0.56, 0.93, 0.56, 1.0];
    let stair = [1.0, 0.65, 0.0, 1.0];
    let portal = [0.0, 1.0, 1.0, 0.8];

    let mut nodes = vec![
        ModelNode::group(ENVIRONMENT, None),
        ModelNode::mesh("ground", 0, Geometry::cuboid(100.0, 1.0, 100.0), ground, Vec3::ZERO).tagged("fixed:cuboid"),
    ];

    for (i, (x, z, turned)) in [(0.0, 50.0, false), (0.0, -50.0, false), (50.0, 0.0, true), (-50.0, 0.0, true)]
        .into_iter()
        .enumerate()
    {
        let mut node = ModelNode::mesh(&format!("wall_{i}"), 0, Geometry::cuboid(100.0, 10.0, 1.0), wall, Vec3::new(x, 5.0, z))
            .tagged("fixed:cuboid");
        if turned {
            node = node.rotated(Quat::from_rotation_y(FRAC_PI_2));
        }
        nodes.push(node);
    }

    for step in 0..5 {
        let position = Vec3::new(5.0 + 10.0 * step as f32, 1.0 + step as f32, -30.0);
        nodes.push(
            ModelNode::mesh(&format!("stair_{step}"), 0, Geometry::cuboid(10.0, 1.0, 20.0), stair, position)
                .tagged("fixed:cuboid"),
        );
    }

    nodes.push(
        ModelNode::mesh("ramp", 0, ramp_geometry(12.0, 2.0, 8.0), stair, Vec3::new(-30.0, 0.5, -25.0))
            .tagged("fixed:trimesh"),
    );

    for (name, position) in [
        ("portal_aboutMe", Vec3::new(-25.0, 3.25, 15.0)),
        ("portal_projects", Vec3::new(0.0, 3.25, 25.0)),
        ("portal_contactMe", Vec3::new(25.0, 3.25, 15.0)),
    ] {
        nodes.push(ModelNode::mesh(name, 0, Geometry::cuboid(4.0, 5.5, 0.2), portal, position));
    }

    ModelAsset { nodes, clips: Vec::new() }
}

/// Wedge rising along +X from height 0 to `height`, as a raw triangle list.
fn ramp_geometry(length: f32, height: f32, width: f32) -> Geometry {
    let (hl, hw) = (length / 2.0, width / 2.0);
    let a = [-hl, 0.0, -hw];
    let b = [hl, 0.0, -hw];
    let c = [hl, height, -hw];
    let d = [-hl, 0.0, hw];
    let e = [hl, 0.0, hw];
    let f = [hl, height, hw];
    Geometry::from_triangles(vec![
        // slope
        a, f, c, a, d, f,
        // back
        b, c, f, b, f, e,
        // sides
        a, c, b, d, e, f,
        // bottom
        a, b, e, a, e, d,
    ])
}
