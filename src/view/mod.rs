// VIEW: Rendering and overlay
pub mod gpu_init;
pub mod render;
pub mod ui;

pub use gpu_init::GpuContext;
pub use render::SceneRenderer;
pub use ui::{build_ui, DebugStats, LoadingStatus, OverlayState};

use crate::model::{Camera, Scene};

/// Draws one frame of the scene and the overlay. The session owns one and
/// calls it as the last frame stage.
pub trait FrameRenderer {
    fn render(&mut self, scene: &Scene, camera: &Camera, overlay: &mut OverlayState);

    fn resize(&mut self, _width: u32, _height: u32, _pixel_ratio: f32) {}
}
