use glam::Vec3;

/// Rigid-body world settings.
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    /// Fixed tick advanced by every `step`.
    pub timestep: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            timestep: 1.0 / 60.0,
        }
    }
}

/// Kinematic character controller tuning.
#[derive(Debug, Clone)]
pub struct CharacterConfig {
    /// Units per second of horizontal movement.
    pub speed: f32,
    /// Constant downward component of the desired movement.
    pub gravity_pull: f32,
    pub turn_factor: f32,
    pub follow_factor: f32,
    pub half_extents: Vec3,
    pub skin_offset: f32,
    pub autostep_max_height: f32,
    pub autostep_min_width: f32,
    pub snap_to_ground: f32,
    pub mass: f32,
    pub spawn: Vec3,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            speed: 25.0,
            gravity_pull: -1.0,
            turn_factor: 0.1,
            follow_factor: 0.2,
            half_extents: Vec3::new(1.0, 2.5, 1.0),
            skin_offset: 0.01,
            autostep_max_height: 3.0,
            autostep_min_width: 0.1,
            snap_to_ground: 1.0,
            mass: 1.0,
            spawn: Vec3::new(0.0, 4.0, 10.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationConfig {
    pub idle_clip: String,
    pub run_clip: String,
    pub cross_fade: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            idle_clip: "idle".to_string(),
            run_clip: "run".to_string(),
            cross_fade: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub initial_eye: Vec3,
    /// Character-local offset of the camera (behind and above).
    pub camera_offset: Vec3,
    /// Character-local offset of the look-at point.
    pub target_offset: Vec3,
    pub follow_factor: f32,
    pub damping: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 35.0,
            initial_eye: Vec3::new(100.0, 100.0, 100.0),
            camera_offset: Vec3::new(0.0, 10.0, 20.0),
            target_offset: Vec3::new(0.0, 2.0, 0.0),
            follow_factor: 0.1,
            damping: 0.25,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            min_distance: 5.0,
            max_distance: 300.0,
        }
    }
}

/// Keyboard codes (DOM `KeyboardEvent.code` naming) and joystick mapping.
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub forward: Vec<String>,
    pub backward: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub joystick_threshold: f32,
    pub joystick_max_range: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        let codes = |a: &str, b: &str| vec![a.to_string(), b.to_string()];
        Self {
            forward: codes("KeyW", "ArrowUp"),
            backward: codes("KeyS", "ArrowDown"),
            left: codes("KeyA", "ArrowLeft"),
            right: codes("KeyD", "ArrowRight"),
            joystick_threshold: 10.0,
            joystick_max_range: 30.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Node name prefix; the rest of the name keys the modal content.
    pub prefix: String,
    pub threshold: f32,
    pub near_color: [f32; 4],
    pub far_color: [f32; 4],
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            prefix: "portal_".to_string(),
            threshold: 2.0,
            near_color: [1.0, 0.84, 0.0, 0.9],
            far_color: [0.0, 1.0, 1.0, 0.8],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Upper bound on the per-frame delta in seconds.
    pub max_delta: f32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { max_delta: 0.1 }
    }
}

/// Dynamic balls scattered over the environment once the world is built.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    pub ball_count: usize,
    pub ball_radius: f32,
    pub ball_seed: u32,
    pub spread: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            ball_count: 20,
            ball_radius: 1.0,
            ball_seed: 7,
            spread: 40.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UiConfig {
    /// Open the game instructions dialog when the session starts.
    pub show_instructions: bool,
    pub show_debug: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { show_instructions: true, show_debug: false }
    }
}

/// Every tunable of one app session.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub physics: PhysicsConfig,
    pub character: CharacterConfig,
    pub animation: AnimationConfig,
    pub camera: CameraConfig,
    pub input: InputConfig,
    pub portal: PortalConfig,
    pub frame: FrameConfig,
    pub world: WorldConfig,
    pub ui: UiConfig,
}
