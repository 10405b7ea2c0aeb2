use crate::model::NodeId;

/// Rejected physics configuration. These are programming errors in how the
/// world is described, never "not loaded yet" conditions.
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("physics engine is not initialized yet")]
    NotReady,

    #[error("unknown rigid body type {0:?} (expected dynamic, fixed or kinematic)")]
    UnknownBodyType(String),

    #[error("unknown collider shape {0:?} (expected cuboid, ball or trimesh)")]
    UnknownColliderShape(String),

    #[error("malformed physics tag {0:?} (expected \"<body>:<shape>\")")]
    MalformedTag(String),

    #[error("node {0:?} does not exist or has no geometry")]
    MissingGeometry(NodeId),

    #[error("cannot build trimesh collider for node {node:?}: {reason}")]
    InvalidTrimesh { node: NodeId, reason: String },
}

/// Failure of the asynchronous asset load.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    #[error("no loader knows asset {0:?}")]
    UnknownAsset(String),

    #[error("asset loader went away before finishing")]
    LoaderDropped,
}

/// Fatal error surfaced from a frame.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("failed to build world: {0}")]
    World(#[from] PhysicsError),

    #[error("missing asset: {0}")]
    Assets(#[from] AssetError),
}

/// Graphics bring-up failed. The app cannot draw anything without it.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("cannot create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("no suitable GPU adapter found: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to request device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}
