//! 粒子子系统统一错误类型
//!
//! 错误分类遵循引擎的约定：
//!
//! - **致命错误**：设备资源分配失败、同步等待失败。直接向调用者返回，
//!   没有设备重新初始化就不存在可用的恢复路径。
//! - **非错误**：无效的全局配置（回退默认值并记录警告）和死亡列表耗尽
//!   （发射静默饱和）都不会产生 `Err`。

use thiserror::Error;

/// 粒子子系统错误类型
#[derive(Error, Debug)]
pub enum ParticleError {
    /// 设备缓冲区或绑定组创建失败
    #[error("Failed to allocate device resources: {0}")]
    Allocation(String),

    /// 完成信号等待失败（设备挂起或丢失）
    #[error("Synchronization failure while waiting for device work: {0}")]
    Synchronization(String),

    /// 操作引用了不存在的发射器
    #[error("Unknown emitter id {id} (store holds {count} slots)")]
    UnknownEmitter { id: usize, count: usize },

    /// 发射器描述符不合法
    #[error("Invalid emitter descriptor: {0}")]
    InvalidDescriptor(String),
}

/// 粒子子系统结果类型
pub type ParticleResult<T> = Result<T, ParticleError>;
