// CONTROLLER: Input, physics, gameplay and the update loop
pub mod input;
pub mod physics;
pub mod character_controller;
pub mod animation_controller;
pub mod camera_controller;
pub mod portal;
pub mod world;
pub mod frame_loop;
pub mod app;

pub use input::{InputEvent, InputSource, KeyBindings};
pub use physics::{BodyKind, ColliderShape, PhysicsEngine, PhysicsTag, PhysicsWorld};
pub use character_controller::CharacterController;
pub use animation_controller::AnimationSelector;
pub use camera_controller::{CameraRig, OrbitControls};
pub use portal::Portal;
pub use world::{ReadinessGate, World};
pub use frame_loop::{Clock, FrameLoop, FrameStages, SystemClock};
pub use app::{App, Session};
