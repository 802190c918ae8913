//! 发射器描述符
//!
//! CPU 侧的发射器配置，以及上传给 compute shader 的 POD 参数布局。
//! 描述符由拥有它的发射器独占，每帧由变换更新原地修改。

use glam::{Quat, Vec3, Vec4};

use crate::config::ParticleGlobalConfig;
use crate::core::{ParticleError, ParticleResult};

/// 粒子发射器描述符
#[derive(Debug, Clone)]
pub struct ParticleEmitterDescriptor {
    /// 发射位置（世界空间）
    pub position: Vec3,
    /// 发射朝向
    pub rotation: Quat,
    /// 每秒发射数量
    pub emission_rate: f32,
    /// 寿命下界（秒）
    pub life_min: f32,
    /// 寿命上界（秒）
    pub life_max: f32,
    /// 初速度方向（局部空间，发射时叠加锥形抖动）
    pub direction: Vec3,
    /// 初速度大小
    pub speed: f32,
    /// 初始大小范围
    pub size_min: f32,
    /// 初始大小上界
    pub size_max: f32,
    /// 粒子基础颜色
    pub color: Vec4,
    /// 槽位容量 N：粒子记录数组的固定大小
    pub capacity: u32,
    /// 创建时预热的存活粒子数（0 表示全部死亡）
    pub prewarm: u32,
    /// 发射数量的小数累积器（小数部分留到后续帧）
    emission_accumulator: f32,
}

impl Default for ParticleEmitterDescriptor {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            emission_rate: 100.0,
            life_min: 1.0,
            life_max: 3.0,
            direction: Vec3::Y,
            speed: 2.0,
            size_min: 0.1,
            size_max: 0.3,
            color: Vec4::ONE,
            capacity: 10_000,
            prewarm: 0,
            emission_accumulator: 0.0,
        }
    }
}

impl ParticleEmitterDescriptor {
    /// 创建指定容量的描述符
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// 设置发射速率
    pub fn with_emission_rate(mut self, rate: f32) -> Self {
        self.emission_rate = rate;
        self
    }

    /// 设置寿命范围
    pub fn with_lifetime(mut self, min: f32, max: f32) -> Self {
        self.life_min = min;
        self.life_max = max;
        self
    }

    /// 设置初速度
    pub fn with_velocity(mut self, direction: Vec3, speed: f32) -> Self {
        self.direction = direction;
        self.speed = speed;
        self
    }

    /// 设置预热数量
    pub fn with_prewarm(mut self, prewarm: u32) -> Self {
        self.prewarm = prewarm;
        self
    }

    /// 校验描述符
    ///
    /// 容量为零或数值字段非有限时拒绝创建发射器。
    pub fn validate(&self) -> ParticleResult<()> {
        if self.capacity == 0 {
            return Err(ParticleError::InvalidDescriptor(
                "capacity must be non-zero".to_string(),
            ));
        }
        if self.prewarm > self.capacity {
            return Err(ParticleError::InvalidDescriptor(format!(
                "prewarm {} exceeds capacity {}",
                self.prewarm, self.capacity
            )));
        }
        if !(self.emission_rate.is_finite() && self.emission_rate >= 0.0) {
            return Err(ParticleError::InvalidDescriptor(
                "emission_rate must be finite and non-negative".to_string(),
            ));
        }
        if !(self.life_min.is_finite()
            && self.life_max.is_finite()
            && self.life_min > 0.0
            && self.life_max >= self.life_min)
        {
            return Err(ParticleError::InvalidDescriptor(
                "lifetime bounds must satisfy 0 < life_min <= life_max".to_string(),
            ));
        }
        Ok(())
    }

    /// 合并一次变换增量（每帧调度器在 Kickoff 之前调用）
    pub fn apply_transform(&mut self, delta_position: Vec3, delta_rotation: Quat) {
        self.position += delta_position;
        self.rotation = (delta_rotation * self.rotation).normalize();
    }

    /// 计算本帧请求发射的粒子数
    ///
    /// 按 `emission_rate * time_step` 累积，小数部分留到后续帧。
    /// 实际发射量还会在 Kickoff 阶段被死亡计数钳制。
    pub fn requested_emit(&mut self, time_step: f32) -> u32 {
        self.emission_accumulator += self.emission_rate * time_step;
        let count = self.emission_accumulator.floor() as u32;
        self.emission_accumulator -= count as f32;
        count
    }
}

/// 每帧变换增量
#[derive(Debug, Clone, Copy)]
pub struct TransformUpdate {
    /// 目标发射器
    pub id: usize,
    /// 位置增量
    pub delta_position: Vec3,
    /// 旋转增量
    pub delta_rotation: Quat,
}

/// 上传给 compute shader 的发射器参数
///
/// 布局必须与 `shaders/` 下的 `EmitterParams` WGSL 结构一致。
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EmitterParamsGpu {
    /// 发射位置（xyz）+ 填充
    pub position: [f32; 4],
    /// 发射朝向四元数
    pub rotation: [f32; 4],
    /// 初速度方向（xyz）+ 速度大小（w）
    pub direction: [f32; 4],
    /// 基础颜色
    pub color: [f32; 4],
    /// 寿命范围 [min, max]
    pub life_range: [f32; 2],
    /// 大小范围 [min, max]
    pub size_range: [f32; 2],
    /// 重力（xyz）+ 时间步长（w）
    pub gravity_dt: [f32; 4],
    /// 本帧请求发射数（Kickoff 再按死亡计数钳制）
    pub requested_emit: u32,
    /// 帧序号（参与发射种子）
    pub frame_index: u32,
    /// 槽位容量 N
    pub capacity: u32,
    /// 是否对场景快照做碰撞采样
    pub collision_enabled: u32,
    /// 发射栅格间距
    pub emit_gap: f32,
    /// CPU 侧随机种子
    pub seed: u32,
    /// 填充
    pub _padding: [u32; 2],
}

impl EmitterParamsGpu {
    /// 打包本帧参数
    pub fn pack(
        descriptor: &ParticleEmitterDescriptor,
        config: &ParticleGlobalConfig,
        requested_emit: u32,
        frame_index: u64,
        collision_enabled: bool,
        seed: u32,
    ) -> Self {
        let position = descriptor.position;
        let rotation = descriptor.rotation;
        let direction = descriptor.direction.normalize_or_zero();
        // 描述符寿命上界仍受全局 max_life 约束
        let life_max = descriptor.life_max.min(config.max_life);
        let life_min = descriptor.life_min.min(life_max);
        Self {
            position: [position.x, position.y, position.z, 0.0],
            rotation: rotation.to_array(),
            direction: [direction.x, direction.y, direction.z, descriptor.speed],
            color: descriptor.color.to_array(),
            life_range: [life_min, life_max],
            size_range: [descriptor.size_min, descriptor.size_max],
            gravity_dt: [
                config.gravity.x,
                config.gravity.y,
                config.gravity.z,
                config.time_step,
            ],
            requested_emit,
            frame_index: frame_index as u32,
            capacity: descriptor.capacity,
            collision_enabled: collision_enabled as u32,
            emit_gap: config.emit_gap as f32,
            seed,
            _padding: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_default_is_valid() {
        assert!(ParticleEmitterDescriptor::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let descriptor = ParticleEmitterDescriptor::new(0);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_prewarm_beyond_capacity_rejected() {
        let descriptor = ParticleEmitterDescriptor::new(16).with_prewarm(17);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_requested_emit_accumulates_fraction() {
        let mut descriptor = ParticleEmitterDescriptor::new(1024).with_emission_rate(15.0);
        // 15 * 0.1 = 1.5：两帧合计应发射 3 个
        assert_eq!(descriptor.requested_emit(0.1), 1);
        assert_eq!(descriptor.requested_emit(0.1), 2);
    }

    #[test]
    fn test_requested_emit_exact_rate() {
        // 1000/s 在 dt=0.1 下正好每帧 100 个
        let mut descriptor = ParticleEmitterDescriptor::new(1024).with_emission_rate(1000.0);
        for _ in 0..10 {
            assert_eq!(descriptor.requested_emit(0.1), 100);
        }
    }

    #[test]
    fn test_apply_transform_accumulates() {
        let mut descriptor = ParticleEmitterDescriptor::default();
        descriptor.apply_transform(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        descriptor.apply_transform(Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY);
        assert_eq!(descriptor.position, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_params_respect_global_max_life() {
        let descriptor = ParticleEmitterDescriptor::new(64).with_lifetime(1.0, 100.0);
        let config = ParticleGlobalConfig {
            max_life: 2.0,
            ..Default::default()
        };
        let params = EmitterParamsGpu::pack(&descriptor, &config, 0, 0, false, 0);
        assert_eq!(params.life_range, [1.0, 2.0]);
    }
}
