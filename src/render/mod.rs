//! 渲染与 GPU 设备层

pub mod context;
pub mod particles;

pub use context::GpuContext;
