use egui::Context;
use glam::Vec3;

use crate::model::{InputState, ModalManager, ModalSink};

/// Progress of the two asynchronous loads, shown until gameplay starts.
#[derive(Debug, Clone, Default)]
pub struct LoadingStatus {
    pub progress: f32,
    pub physics_ready: bool,
    pub assets_ready: bool,
    pub failed: Option<String>,
}

impl LoadingStatus {
    pub fn is_done(&self) -> bool {
        self.physics_ready && self.assets_ready
    }

    pub fn label(&self) -> String {
        if let Some(reason) = &self.failed {
            return format!("Loading failed: {reason}");
        }
        let physics = if self.physics_ready { "ready" } else { "loading" };
        format!("Assets {:.0}%, physics {physics}", self.progress * 100.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DebugStats {
    pub dt: f32,
    pub frame: u64,
    pub character: Option<Vec3>,
    pub grounded: bool,
    pub clip: Option<String>,
    pub bodies: usize,
    pub input: InputState,
}

/// Everything the egui layer draws, owned by the app session.
#[derive(Debug, Default)]
pub struct OverlayState {
    pub modal: ModalManager,
    pub loading: LoadingStatus,
    pub debug: DebugStats,
    pub show_debug: bool,
}

/// Build the complete UI and return egui output
pub fn build_ui(egui_ctx: &Context, raw_input: egui::RawInput, overlay: &mut OverlayState) -> egui::FullOutput {
    egui_ctx.run(raw_input, |ctx| {
        if !overlay.loading.is_done() || overlay.loading.failed.is_some() {
            draw_loading(ctx, &overlay.loading);
        }
        draw_modal(ctx, &mut overlay.modal);
        if overlay.show_debug {
            draw_debug_window(ctx, &overlay.debug);
        }
    })
}

fn draw_loading(ctx: &Context, loading: &LoadingStatus) {
    egui::Area::new(egui::Id::new("loading"))
        .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
        .show(ctx, |ui| {
            egui::Frame::popup(ui.style()).show(ui, |ui| {
                ui.set_min_width(240.0);
                ui.label(egui::RichText::new(loading.label()).strong());
                ui.add(egui::ProgressBar::new(loading.progress.clamp(0.0, 1.0)).show_percentage());
            });
        });
}

fn draw_modal(ctx: &Context, modal: &mut ModalManager) {
    let Some(content) = modal.current().cloned() else { return };

    let mut close = false;
    egui::Window::new(content.title.as_str())
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_TOP, [0.0, 48.0])
        .show(ctx, |ui| {
            if let Some(description) = &content.description {
                ui.label(description);
            }
            if let Some(link) = &content.link {
                ui.hyperlink_to(link.text.as_str(), link.href.as_str());
            }
            ui.add_space(6.0);
            close = ui.button("Close").clicked();
        });

    if close {
        modal.close_modal();
    }
}

fn draw_debug_window(ctx: &Context, stats: &DebugStats) {
    egui::Window::new("Debug")
        .default_pos([8.0, 8.0])
        .show(ctx, |ui| {
            ui.label(
                egui::RichText::new(format!("FPS: {:.0}", if stats.dt > 0.0 { 1.0 / stats.dt } else { 0.0 }))
                    .small(),
            );
            ui.label(egui::RichText::new(format!("Frame: {}", stats.frame)).small());
            if let Some(p) = stats.character {
                ui.label(egui::RichText::new(format!("Pos: x: {:.1} y: {:.1} z: {:.1}", p.x, p.y, p.z)).small());
                ui.label(egui::RichText::new(format!("Grounded: {}", stats.grounded)).small());
            }
            if let Some(clip) = &stats.clip {
                ui.label(egui::RichText::new(format!("Clip: {clip}")).small());
            }
            ui.label(egui::RichText::new(format!("Bodies: {}", stats.bodies)).small());
            let i = stats.input;
            ui.label(
                egui::RichText::new(format!(
                    "Input: F{} B{} L{} R{}",
                    i.forward as u8, i.backward as u8, i.left as u8, i.right as u8
                ))
                .small(),
            );
            ui.separator();
            ui.label(egui::RichText::new("Controls:").small());
            ui.label(egui::RichText::new("WASD / arrows - Move").small());
            ui.label(egui::RichText::new("Drag - Orbit camera").small());
            ui.label(egui::RichText::new("Wheel - Zoom").small());
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModalContent;

    #[test]
    fn loading_label_reports_progress_and_failure() {
        let mut loading = LoadingStatus { progress: 0.5, ..LoadingStatus::default() };
        assert_eq!(loading.label(), "Assets 50%, physics loading");

        loading.failed = Some("no loader knows asset \"x\"".into());
        assert!(loading.label().starts_with("Loading failed"));
    }

    #[test]
    fn overlay_builds_headless() {
        let ctx = Context::default();
        let mut overlay = OverlayState { show_debug: true, ..OverlayState::default() };
        overlay.modal.open_modal(&ModalContent::game_instruction());

        let output = build_ui(&ctx, egui::RawInput::default(), &mut overlay);
        assert!(!output.shapes.is_empty());
        assert!(overlay.modal.is_open());
    }
}
