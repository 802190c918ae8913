//! 核心类型：错误定义与公共常量

pub mod error;

pub use error::{ParticleError, ParticleResult};

/// 计算着色器工作组大小
///
/// 必须与 `render/particles/shaders/` 下所有 compute shader 的
/// `@workgroup_size` 声明保持一致。
pub const WORKGROUP_SIZE: u32 = 64;
