use glam::{Mat4, Vec3};

/// Perspective camera looking at `target`.
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub aspect: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32, fov_y_degrees: f32) -> Self {
        Self {
            eye: Vec3::new(100.0, 100.0, 100.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: fov_y_degrees.to_radians(),
            aspect: width as f32 / height.max(1) as f32,
            z_near: 0.1,
            z_far: 1000.0,
        }
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    pub fn set_look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn view_proj(&self) -> Mat4 {
        let proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.z_near, self.z_far);
        proj * self.view()
    }
}
