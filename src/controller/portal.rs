use glam::Vec3;
use tracing::info;

use crate::config::PortalConfig;
use crate::model::{ModalContent, ModalSink, NodeId, Scene};

/// Proximity trigger around a portal node.
///
/// Opens its dialog when the character first comes within `threshold` and
/// closes it when the character first leaves. Staying on one side never
/// fires twice.
#[derive(Debug, Clone)]
pub struct Portal {
    node: NodeId,
    content: ModalContent,
    threshold: f32,
    near_color: [f32; 4],
    far_color: [f32; 4],
    is_near: bool,
}

impl Portal {
    pub fn new(node: NodeId, content: ModalContent, config: &PortalConfig) -> Self {
        Self {
            node,
            content,
            threshold: config.threshold,
            near_color: config.near_color,
            far_color: config.far_color,
            is_near: false,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_near(&self) -> bool {
        self.is_near
    }

    /// Feed one distance sample. Returns `Some(true)` on entering and
    /// `Some(false)` on leaving.
    pub fn observe(&mut self, distance: f32, modal: &mut dyn ModalSink) -> Option<bool> {
        let near = distance < self.threshold;
        if near == self.is_near {
            return None;
        }
        self.is_near = near;
        if near {
            info!(portal = %self.content.title, "entered portal");
            modal.open_modal(&self.content);
        } else {
            info!(portal = %self.content.title, "left portal");
            modal.close_modal();
        }
        Some(near)
    }

    /// Check the character's world position against the portal and recolor
    /// the portal mesh on transitions.
    pub fn update(&mut self, scene: &mut Scene, character: Vec3, modal: &mut dyn ModalSink) {
        if !scene.contains(self.node) {
            return;
        }
        let distance = character.distance(scene.world_position(self.node));
        let Some(near) = self.observe(distance, modal) else { return };

        let color = if near { self.near_color } else { self.far_color };
        if let Some(mesh) = scene.get_mut(self.node).and_then(|n| n.mesh.as_mut()) {
            mesh.color = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Geometry, ModalManager, Node};
    use std::sync::Arc;

    fn portal() -> Portal {
        Portal::new(
            NodeId(1),
            ModalContent::new("About me"),
            &PortalConfig { threshold: 1.0, ..PortalConfig::default() },
        )
    }

    #[test]
    fn crossings_fire_once_per_direction() {
        let mut portal = portal();
        let mut modal = ModalManager::new();

        for distance in [5.0, 0.5, 0.4, 0.3, 5.0, 6.0, 0.5, 5.0] {
            portal.observe(distance, &mut modal);
        }

        assert_eq!(modal.open_count(), 2);
        assert_eq!(modal.close_count(), 2);
        assert!(!modal.is_open());
    }

    #[test]
    fn sustained_proximity_opens_once() {
        let mut portal = portal();
        let mut modal = ModalManager::new();
        assert_eq!(portal.observe(0.2, &mut modal), Some(true));
        for _ in 0..10 {
            assert_eq!(portal.observe(0.2, &mut modal), None);
        }
        assert_eq!(modal.open_count(), 1);
        assert_eq!(modal.current().unwrap().title, "About me");
    }

    #[test]
    fn update_recolors_mesh_on_transition() {
        let config = PortalConfig::default();
        let mut scene = Scene::new();
        let node = scene.add(
            Scene::ROOT,
            Node::new("portal_aboutMe")
                .at(Vec3::new(0.0, 3.25, 0.0))
                .with_mesh(Arc::new(Geometry::cuboid(4.0, 5.5, 0.2)), config.far_color),
        );
        let mut portal = Portal::new(node, ModalContent::new("About me"), &config);
        let mut modal = ModalManager::new();

        portal.update(&mut scene, Vec3::new(0.0, 3.0, 1.0), &mut modal);
        assert!(portal.is_near());
        assert_eq!(scene.get(node).unwrap().mesh.as_ref().unwrap().color, config.near_color);

        portal.update(&mut scene, Vec3::new(0.0, 3.0, 10.0), &mut modal);
        assert!(!portal.is_near());
        assert_eq!(scene.get(node).unwrap().mesh.as_ref().unwrap().color, config.far_color);
    }
}
