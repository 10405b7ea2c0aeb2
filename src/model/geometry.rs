use glam::Vec3;

/// Triangle geometry in a node's local space.
///
/// `indices` is `None` for non-indexed geometry, where every three
/// consecutive positions form a triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Option<Vec<u32>>,
}

impl Geometry {
    /// Axis-aligned box centered at the origin.
    pub fn cuboid(width: f32, height: f32, depth: f32) -> Self {
        let (hx, hy, hz) = (width / 2.0, height / 2.0, depth / 2.0);
        // (normal, u axis, v axis) per face
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let half = Vec3::new(hx, hy, hz);

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in faces {
            let base = positions.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = (normal + u * su + v * sv) * half;
                positions.push(p.to_array());
                normals.push(normal.to_array());
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self { positions, normals, indices: Some(indices) }
    }

    /// UV sphere centered at the origin.
    pub fn sphere(radius: f32, width_segments: u32, height_segments: u32) -> Self {
        let width_segments = width_segments.max(3);
        let height_segments = height_segments.max(2);

        let mut positions = Vec::new();
        let mut normals = Vec::new();
        for iy in 0..=height_segments {
            let v = iy as f32 / height_segments as f32;
            let theta = v * std::f32::consts::PI;
            for ix in 0..=width_segments {
                let u = ix as f32 / width_segments as f32;
                let phi = u * std::f32::consts::TAU;
                let n = Vec3::new(-phi.cos() * theta.sin(), theta.cos(), phi.sin() * theta.sin());
                positions.push((n * radius).to_array());
                normals.push(n.to_array());
            }
        }

        let row = width_segments + 1;
        let mut indices = Vec::new();
        for iy in 0..height_segments {
            for ix in 0..width_segments {
                let a = iy * row + ix + 1;
                let b = iy * row + ix;
                let c = (iy + 1) * row + ix;
                let d = (iy + 1) * row + ix + 1;
                if iy != 0 {
                    indices.extend_from_slice(&[a, b, d]);
                }
                if iy != height_segments - 1 {
                    indices.extend_from_slice(&[b, c, d]);
                }
            }
        }

        Self { positions, normals, indices: Some(indices) }
    }

    /// Non-indexed geometry from a flat triangle list; normals are per face.
    pub fn from_triangles(positions: Vec<[f32; 3]>) -> Self {
        let mut normals = Vec::with_capacity(positions.len());
        for tri in positions.chunks(3) {
            let n = if let [a, b, c] = tri {
                let (a, b, c) = (Vec3::from(*a), Vec3::from(*b), Vec3::from(*c));
                (b - a).cross(c - a).normalize_or_zero()
            } else {
                Vec3::Y
            };
            normals.extend(std::iter::repeat(n.to_array()).take(tri.len()));
        }
        Self { positions, normals, indices: None }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Triangle indices, generated sequentially for non-indexed geometry.
    pub fn triangle_indices(&self) -> Vec<u32> {
        match &self.indices {
            Some(indices) => indices.clone(),
            None => (0..self.positions.len() as u32).collect(),
        }
    }

    /// Local-space (min, max) corners. Empty geometry yields a zero box.
    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        if self.positions.is_empty() {
            return (Vec3::ZERO, Vec3::ZERO);
        }
        self.positions.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(min, max), p| {
                let p = Vec3::from(*p);
                (min.min(p), max.max(p))
            },
        )
    }

    pub fn bounding_box_size(&self) -> Vec3 {
        let (min, max) = self.bounding_box();
        max - min
    }

    /// Sphere around the box center enclosing every vertex.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        let (min, max) = self.bounding_box();
        let center = (min + max) * 0.5;
        let radius = self
            .positions
            .iter()
            .map(|p| Vec3::from(*p).distance(center))
            .fold(0.0, f32::max);
        (center, radius)
    }
}
