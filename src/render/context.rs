//! GPU 设备上下文
//!
//! 粒子管线不访问任何进程级单例：设备与队列在构造时显式注入，
//! 生命周期由持有 `GpuContext` 的一方决定。

use std::sync::Arc;

use crate::core::{ParticleError, ParticleResult};

/// 显式注入的计算设备能力
///
/// 嵌入引擎时由渲染后端克隆自己的 `Device`/`Queue` 句柄构造；
/// 离屏测试通过 [`GpuContext::request_headless`] 自行获取。
#[derive(Clone)]
pub struct GpuContext {
    /// WGPU 设备
    pub device: Arc<wgpu::Device>,
    /// 提交队列
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// 从既有设备句柄构造上下文
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// 离屏获取设备（无窗口表面）
    ///
    /// 没有可用适配器时返回 `Allocation` 错误；集成测试以此判断
    /// 当前环境是否支持 GPU 路径。
    pub fn request_headless() -> ParticleResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| ParticleError::Allocation("no suitable GPU adapter".to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Particle Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| ParticleError::Allocation(e.to_string()))?;

        tracing::debug!(target: "particles", "headless device acquired: {:?}", adapter.get_info().name);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}
