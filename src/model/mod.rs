// MODEL: Shared state, scene data and assets
pub mod store;
pub mod geometry;
pub mod scene;
pub mod camera;
pub mod animation;
pub mod assets;
pub mod modal;

pub use store::{AppReadiness, InputState, SizeState, Store, Stores, Subscription};
pub use geometry::Geometry;
pub use scene::{MeshInstance, Node, NodeId, Scene};
pub use camera::Camera;
pub use animation::{ActionId, AnimationClip, AnimationMixer};
pub use assets::{Asset, AssetLoader, LoadedAssets, ModelAsset, ModelInstance};
pub use modal::{ModalContent, ModalManager, ModalSink};
