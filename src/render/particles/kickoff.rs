//! Kickoff 阶段与计数器追踪
//!
//! 把上一帧结束时的计数器翻译成本帧的间接调度参数，全程不经过 CPU：
//! 一次 `@workgroup_size(1)` 的调度完成计数器滚动、发射数钳制、
//! 双缓冲存活列表选择位翻转，输出被后续两个阶段以间接调度方式消费。

use crate::core::WORKGROUP_SIZE;

use super::batch::ParticleBindGroupLayouts;

/// 间接参数缓冲区里发射调度参数的字节偏移
pub const EMIT_DISPATCH_OFFSET: wgpu::BufferAddress = 0;
/// 间接参数缓冲区里模拟调度参数的字节偏移
pub const SIMULATE_DISPATCH_OFFSET: wgpu::BufferAddress = 16;

/// 每发射器计数器
///
/// 守恒律：每帧开始 `dead_count + alive_count_after_sim == N`（上一帧
/// 幸存者尚未滚动），每帧结束同样成立。布局与 shader 中的
/// `Counters` 结构及回读缓冲区逐字对应。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Counter {
    /// 死亡列表长度
    pub dead_count: u32,
    /// 本帧存活数（Kickoff 由上一帧幸存数滚动而来，Emit 阶段递增）
    pub alive_count: u32,
    /// 本帧实际发射数（已钳制）
    pub emit_count: u32,
    /// 模拟后的幸存数，即下一帧的存活数
    pub alive_count_after_sim: u32,
}

impl Counter {
    /// 全部死亡的初始状态
    pub fn all_dead(capacity: u32) -> Self {
        Self {
            dead_count: capacity,
            ..Default::default()
        }
    }

    /// 预热 `prewarm` 个存活粒子的初始状态
    ///
    /// 预热粒子计入 `alive_count_after_sim`，第一次 Kickoff 会把它们
    /// 滚动成 `alive_count`。
    pub fn prewarmed(capacity: u32, prewarm: u32) -> Self {
        debug_assert!(prewarm <= capacity);
        Self {
            dead_count: capacity - prewarm,
            alive_count: 0,
            emit_count: 0,
            alive_count_after_sim: prewarm,
        }
    }

    /// 帧边界守恒律
    pub fn is_conserved(&self, capacity: u32) -> bool {
        self.dead_count + self.alive_count_after_sim == capacity
    }
}

/// 间接调度参数缓冲区布局
///
/// 发射调度参数在偏移 0，模拟调度参数在偏移 16，词 3 是存活列表
/// 选择位（双缓冲 ping-pong 标志），词 7 保留。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IndirectDispatchArgs {
    /// 发射阶段工作组数 (x, y, z)
    pub emit: [u32; 3],
    /// 当前存活列表选择位
    pub selector: u32,
    /// 模拟阶段工作组数 (x, y, z)
    pub simulate: [u32; 3],
    /// 保留
    pub reserved: u32,
}

impl IndirectDispatchArgs {
    /// 批次创建时的初始内容
    ///
    /// 选择位从 0 开始，第一次 Kickoff 翻转为 1，因此预热的存活
    /// 索引要写入 1 号列表。
    pub fn initial() -> Self {
        Self {
            emit: [0, 1, 1],
            selector: 0,
            simulate: [0, 1, 1],
            reserved: 0,
        }
    }
}

/// 一帧的调度预算（Kickoff 输出的 CPU 侧镜像）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchPlan {
    /// 钳制后的发射数
    pub emit_count: u32,
    /// 模拟阶段覆盖的线程数（旧存活 + 新发射）
    pub simulate_threads: u32,
    /// 发射阶段工作组数
    pub emit_groups: u32,
    /// 模拟阶段工作组数
    pub simulate_groups: u32,
}

/// 计数器追踪器
///
/// 保存最近一次回读观测到的计数器，以及据其推算本帧调度预算的逻辑
/// （与 `kickoff.wgsl` 的钳制规则一致，用于统计与日志）。
#[derive(Debug, Default)]
pub struct CounterTracker {
    /// 最近观测到的计数器
    pub last: Counter,
    /// 观测对应的帧序号
    pub observed_frame: u64,
}

impl CounterTracker {
    /// 创建追踪器并给定初始计数器
    pub fn new(initial: Counter) -> Self {
        Self {
            last: initial,
            observed_frame: 0,
        }
    }

    /// 记录一次回读观测
    pub fn observe(&mut self, counter: Counter, frame: u64) {
        self.last = counter;
        self.observed_frame = frame;
    }

    /// 推算本帧调度预算
    ///
    /// 镜像 Kickoff 的规则：发射数被死亡计数钳制，模拟线程数为
    /// 滚动后的存活数加发射数。
    pub fn plan(&self, requested_emit: u32) -> DispatchPlan {
        let alive = self.last.alive_count_after_sim;
        let emit_count = requested_emit.min(self.last.dead_count);
        let simulate_threads = alive + emit_count;
        DispatchPlan {
            emit_count,
            simulate_threads,
            emit_groups: emit_count.div_ceil(WORKGROUP_SIZE),
            simulate_groups: simulate_threads.div_ceil(WORKGROUP_SIZE),
        }
    }
}

/// Kickoff 计算管线
pub struct KickoffStage {
    pipeline: wgpu::ComputePipeline,
}

impl KickoffStage {
    /// 创建管线
    pub fn new(device: &wgpu::Device, layouts: &ParticleBindGroupLayouts) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Kickoff Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/kickoff.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Kickoff Pipeline Layout"),
            bind_group_layouts: &[&layouts.storage, &layouts.uniform],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Particle Kickoff Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Self { pipeline }
    }

    /// 录制本帧的 Kickoff 调度
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        storage_bind_group: &wgpu::BindGroup,
        uniform_bind_group: &wgpu::BindGroup,
    ) {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle Kickoff"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, storage_bind_group, &[]);
        cpass.set_bind_group(1, uniform_bind_group, &[]);
        cpass.dispatch_workgroups(1, 1, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_layout_is_16_bytes() {
        assert_eq!(std::mem::size_of::<Counter>(), 16);
        assert_eq!(std::mem::size_of::<IndirectDispatchArgs>(), 32);
    }

    #[test]
    fn test_all_dead_is_conserved() {
        let counter = Counter::all_dead(1024);
        assert!(counter.is_conserved(1024));
        assert_eq!(counter.dead_count, 1024);
    }

    #[test]
    fn test_prewarmed_is_conserved() {
        let counter = Counter::prewarmed(1024, 100);
        assert!(counter.is_conserved(1024));
        assert_eq!(counter.dead_count, 924);
        assert_eq!(counter.alive_count_after_sim, 100);
    }

    #[test]
    fn test_plan_clamps_emit_by_dead_count() {
        let tracker = CounterTracker::new(Counter {
            dead_count: 24,
            alive_count: 0,
            emit_count: 0,
            alive_count_after_sim: 1000,
        });
        let plan = tracker.plan(100);
        assert_eq!(plan.emit_count, 24);
        assert_eq!(plan.simulate_threads, 1024);
    }

    #[test]
    fn test_plan_workgroup_rounding() {
        let tracker = CounterTracker::new(Counter::all_dead(1024));
        let plan = tracker.plan(100);
        assert_eq!(plan.emit_count, 100);
        assert_eq!(plan.emit_groups, 2); // ceil(100 / 64)
        assert_eq!(plan.simulate_groups, 2);
    }

    #[test]
    fn test_plan_zero_request_is_noop() {
        let tracker = CounterTracker::new(Counter::all_dead(256));
        let plan = tracker.plan(0);
        assert_eq!(plan.emit_count, 0);
        assert_eq!(plan.emit_groups, 0);
        assert_eq!(plan.simulate_groups, 0);
    }
}
