use std::future::Future;

use bytemuck::NoUninit;
use glam::{Mat3, Mat4, Quat, Vec3};
use rapier3d::na::{self as nalgebra, Quaternion, UnitQuaternion};
use rapier3d::prelude::{vector, Real, Rotation, Vector};

use crate::model::MeshInstance;

#[repr(C)]
#[derive(Debug, Clone, Copy, NoUninit)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

/// Smallest buffer the scene batch is ever given, in bytes.
const MIN_BUFFER_SIZE: u64 = 64 * 1024;

/// GPU copy of the scene batch. Buffers persist across frames and are only
/// reallocated when the batch outgrows them.
pub struct MeshBuffer {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl MeshBuffer {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            vertex_buffer: create_buffer(device, "Scene Vertex Buffer", wgpu::BufferUsages::VERTEX, MIN_BUFFER_SIZE),
            index_buffer: create_buffer(device, "Scene Index Buffer", wgpu::BufferUsages::INDEX, MIN_BUFFER_SIZE),
            index_count: 0,
        }
    }

    /// Write `mesh` into the buffers, growing them first if it does not fit.
    pub fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, mesh: &Mesh) {
        let vertices: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let indices: &[u8] = bytemuck::cast_slice(&mesh.indices);

        if let Some(size) = grown_capacity(self.vertex_buffer.size(), vertices.len() as u64) {
            self.vertex_buffer = create_buffer(device, "Scene Vertex Buffer", wgpu::BufferUsages::VERTEX, size);
        }
        if let Some(size) = grown_capacity(self.index_buffer.size(), indices.len() as u64) {
            self.index_buffer = create_buffer(device, "Scene Index Buffer", wgpu::BufferUsages::INDEX, size);
        }

        if !indices.is_empty() {
            queue.write_buffer(&self.vertex_buffer, 0, vertices);
            queue.write_buffer(&self.index_buffer, 0, indices);
        }
        self.index_count = mesh.indices.len() as u32;
    }

    pub fn is_empty(&self) -> bool {
        self.index_count == 0
    }
}

fn create_buffer(device: &wgpu::Device, label: &str, usage: wgpu::BufferUsages, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// New capacity when `needed` bytes do not fit in `current`, doubling up to
/// the next power of two.
pub fn grown_capacity(current: u64, needed: u64) -> Option<u64> {
    (needed > current).then(|| needed.next_power_of_two().max(MIN_BUFFER_SIZE))
}

/// World-space triangles batched for one draw call.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Append `mesh` transformed by its world matrix.
    pub fn push_instance(&mut self, world: Mat4, mesh: &MeshInstance) {
        let normal_matrix = Mat3::from_mat4(world).inverse().transpose();
        let base = self.vertices.len() as u32;
        let geometry = &mesh.geometry;

        for (i, pos) in geometry.positions.iter().enumerate() {
            let normal = geometry.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]);
            self.vertices.push(Vertex {
                pos: world.transform_point3(Vec3::from(*pos)).to_array(),
                normal: (normal_matrix * Vec3::from(normal)).normalize_or_zero().to_array(),
                color: mesh.color,
            });
        }
        self.indices
            .extend(geometry.triangle_indices().into_iter().map(|i| base + i));
    }
}

// glam <-> nalgebra, the scene speaks glam and rapier speaks nalgebra

pub fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

pub fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn to_rotation(q: Quat) -> Rotation<Real> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

pub fn from_rotation(r: &Rotation<Real>) -> Quat {
    let q = r.quaternion();
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

/// Run a one-shot future off the frame path.
///
/// Native: a short-lived thread driven by `pollster`. Web: the browser's
/// microtask queue.
pub fn spawn_task<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            wasm_bindgen_futures::spawn_local(task);
        } else {
            std::thread::spawn(move || pollster::block_on(task));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;
    use std::sync::Arc;

    #[test]
    fn scene_buffers_grow_only_when_outgrown() {
        assert_eq!(grown_capacity(MIN_BUFFER_SIZE, 1024), None);
        assert_eq!(grown_capacity(MIN_BUFFER_SIZE, MIN_BUFFER_SIZE), None);
        assert_eq!(grown_capacity(MIN_BUFFER_SIZE, MIN_BUFFER_SIZE + 4), Some(2 * MIN_BUFFER_SIZE));
        assert_eq!(grown_capacity(0, 40), Some(MIN_BUFFER_SIZE));

        let grown = grown_capacity(MIN_BUFFER_SIZE, 300_000).unwrap();
        assert_eq!(grown, 524_288);
        assert_eq!(grown % wgpu::COPY_BUFFER_ALIGNMENT, 0);
        assert_eq!(grown_capacity(grown, 400_000), None);
    }

    #[test]
    fn quaternion_conversion_round_trips_orientation() {
        let q = Quat::from_rotation_y(1.2) * Quat::from_rotation_x(0.3);
        let back = from_rotation(&to_rotation(q));
        assert!(q.dot(back).abs() > 0.9999);
    }

    #[test]
    fn push_instance_offsets_indices() {
        let instance = MeshInstance {
            geometry: Arc::new(Geometry::cuboid(1.0, 1.0, 1.0)),
            color: [1.0; 4],
        };
        let mut mesh = Mesh::empty();
        mesh.push_instance(Mat4::IDENTITY, &instance);
        mesh.push_instance(Mat4::from_translation(Vec3::X * 5.0), &instance);

        assert_eq!(mesh.vertices.len(), 48);
        assert_eq!(mesh.indices.len(), 72);
        assert_eq!(*mesh.indices.iter().max().unwrap(), 47);
        assert!(mesh.vertices[24..].iter().all(|v| (4.5 - 1e-5..=5.5 + 1e-5).contains(&v.pos[0])));
    }
}
