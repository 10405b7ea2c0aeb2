// Re-export all public modules so they can be used from main.rs
pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

// MVC Architecture
pub mod model;
pub mod view;
pub mod controller;

// Browser entry point
#[cfg(target_arch = "wasm32")]
mod web;

pub use config::AppConfig;
pub use controller::{App, InputEvent};
pub use error::{AppError, AssetError, GpuError, PhysicsError};
