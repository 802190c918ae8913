//! 发射阶段
//!
//! 以 Kickoff 写出的工作组数做间接调度。每个预算内的调用通过对死亡
//! 计数的原子递减认领一个槽位，初始化一条新粒子记录，并把槽位追加
//! 到当前存活列表。死亡列表耗尽后多余的调用是静默空转：发射饱和而
//! 不会越过固定容量 N。

use super::batch::ParticleBindGroupLayouts;
use super::kickoff::EMIT_DISPATCH_OFFSET;

/// 发射计算管线
pub struct EmitStage {
    pipeline: wgpu::ComputePipeline,
}

impl EmitStage {
    /// 创建管线
    pub fn new(device: &wgpu::Device, layouts: &ParticleBindGroupLayouts) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Emit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/emit.wgsl").into()),
        });

        // 间接参数缓冲区在本阶段作为间接调度源使用，storage 侧必须
        // 只读才能与 INDIRECT 用法共存
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Emit Pipeline Layout"),
            bind_group_layouts: &[&layouts.storage_ro_args, &layouts.uniform],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Particle Emit Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Self { pipeline }
    }

    /// 录制本帧的发射调度（间接，工作组数来自 Kickoff）
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        storage_bind_group: &wgpu::BindGroup,
        uniform_bind_group: &wgpu::BindGroup,
        indirect: &wgpu::Buffer,
    ) {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle Emit"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, storage_bind_group, &[]);
        cpass.set_bind_group(1, uniform_bind_group, &[]);
        cpass.dispatch_workgroups_indirect(indirect, EMIT_DISPATCH_OFFSET);
    }
}
