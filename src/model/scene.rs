use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};

use super::geometry::Geometry;

/// Index of a node inside a [`Scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Flat-colored geometry attached to a node.
#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub geometry: Arc<Geometry>,
    pub color: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub mesh: Option<MeshInstance>,
    pub visible: bool,
    alive: bool,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            mesh: None,
            visible: true,
            alive: true,
        }
    }

    pub fn with_mesh(mut self, geometry: Arc<Geometry>, color: [f32; 4]) -> Self {
        self.mesh = Some(MeshInstance { geometry, color });
        self
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scaled(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Retained-mode scene graph. Node 0 is the root and is never removed.
///
/// Nodes live in an arena; removed slots are tombstoned so that `NodeId`s
/// handed out earlier never alias a different node.
pub struct Scene {
    nodes: Vec<Node>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Self { nodes: vec![Node::new("root")] }
    }

    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    /// Attach `node` under `parent` and return its id.
    pub fn add(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent = if self.contains(parent) { parent } else { Self::ROOT };
        node.parent = Some(parent);
        node.children.clear();
        node.alive = true;
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Remove a node and its whole subtree.
    pub fn remove(&mut self, id: NodeId) {
        if id == Self::ROOT || !self.contains(id) {
            return;
        }
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = &mut self.nodes[next.0];
            node.alive = false;
            node.mesh = None;
            stack.extend(node.children.drain(..));
        }
    }

    /// Drop every node but the root. Slots stay tombstoned like `remove`.
    pub fn clear(&mut self) {
        for node in self.nodes.iter_mut().skip(1) {
            node.alive = false;
            node.mesh = None;
            node.children.clear();
        }
        self.nodes[0].children.clear();
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|n| n.alive)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).filter(|n| n.alive)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).filter(|n| n.alive)
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// First live node with `name` in the subtree below `from` (depth first).
    pub fn find(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let node = self.get(id)?;
            if node.name == name {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.get(current) {
                Some(node) => {
                    matrix = node.local_matrix() * matrix;
                    cursor = node.parent;
                }
                None => break,
            }
        }
        matrix
    }

    pub fn world_position(&self, id: NodeId) -> Vec3 {
        self.world_matrix(id).w_axis.truncate()
    }

    pub fn world_rotation(&self, id: NodeId) -> Quat {
        self.world_matrix(id).to_scale_rotation_translation().1
    }

    pub fn world_scale(&self, id: NodeId) -> Vec3 {
        self.world_matrix(id).to_scale_rotation_translation().0
    }

    /// World matrix of the node's parent, `None` for detached nodes.
    pub fn parent_world_matrix(&self, id: NodeId) -> Option<Mat4> {
        let parent = self.get(id)?.parent?;
        Some(self.world_matrix(parent))
    }

    /// Live nodes carrying a mesh that are visible along their whole chain,
    /// paired with their world matrix.
    pub fn visible_meshes(&self) -> Vec<(Mat4, &MeshInstance)> {
        let mut out = Vec::new();
        let mut stack = vec![(Self::ROOT, Mat4::IDENTITY)];
        while let Some((id, parent_matrix)) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            if !node.visible {
                continue;
            }
            let world = parent_matrix * node.local_matrix();
            if let Some(mesh) = &node.mesh {
                out.push((world, mesh));
            }
            stack.extend(node.children.iter().map(|c| (*c, world)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn world_transform_composes_parent_chain() {
        let mut scene = Scene::new();
        let group = scene.add(
            Scene::ROOT,
            Node::new("group")
                .at(Vec3::new(10.0, 0.0, 0.0))
                .rotated(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2))
                .scaled(Vec3::splat(2.0)),
        );
        let child = scene.add(group, Node::new("child").at(Vec3::new(0.0, 0.0, 1.0)));

        // +Z rotated a quarter turn about Y is +X, then scaled by 2
        assert!(approx(scene.world_position(child), Vec3::new(12.0, 0.0, 0.0)));
        assert!(approx(scene.world_scale(child), Vec3::splat(2.0)));
        assert_eq!(scene.find(Scene::ROOT, "child"), Some(child));
    }

    #[test]
    fn removed_subtree_is_gone() {
        let mut scene = Scene::new();
        let a = scene.add(Scene::ROOT, Node::new("a"));
        let b = scene.add(a, Node::new("b"));
        scene.remove(a);
        assert!(!scene.contains(a));
        assert!(!scene.contains(b));
        assert!(scene.get(Scene::ROOT).unwrap().children.is_empty());
        assert!(scene.find(Scene::ROOT, "b").is_none());
    }

    #[test]
    fn ids_from_before_clear_stay_dead() {
        let mut scene = Scene::new();
        let a = scene.add(Scene::ROOT, Node::new("a"));
        let b = scene.add(a, Node::new("b"));

        scene.clear();
        assert_eq!(scene.len(), 1);
        assert!(scene.get(a).is_none());
        assert!(scene.get(b).is_none());
        assert!(scene.get(Scene::ROOT).unwrap().children.is_empty());

        let c = scene.add(Scene::ROOT, Node::new("c"));
        assert!(c != a && c != b);
        assert!(scene.get(a).is_none());
        assert_eq!(scene.get(c).unwrap().name, "c");
    }

    #[test]
    fn hidden_parent_hides_children() {
        let mut scene = Scene::new();
        let geometry = Arc::new(Geometry::cuboid(1.0, 1.0, 1.0));
        let parent = scene.add(Scene::ROOT, Node::new("p").with_mesh(geometry.clone(), [1.0; 4]));
        scene.add(parent, Node::new("c").with_mesh(geometry, [1.0; 4]));
        assert_eq!(scene.visible_meshes().len(), 2);

        scene.get_mut(parent).unwrap().visible = false;
        assert!(scene.visible_meshes().is_empty());
    }
}
