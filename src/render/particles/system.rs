//! 粒子系统管理器
//!
//! 面向调度器的统一入口：发射器生命周期、每帧 tick 与绘制。
//!
//! 单个 CPU 线程驱动整条管线。一帧内对每个激活的发射器严格按
//! 排空上帧回读 → 合并变换 → 上传参数 → Kickoff → Emit → Simulate →
//! 计数器拷贝 → 提交 → 登记回读令牌的顺序执行；发射器之间只靠这个
//! 顺序循环排序，不存在跨发射器的数据依赖。不在 tick 列表里的
//! 发射器被完整跳过，包括回读。

use std::sync::Arc;

use crate::config::ParticleGlobalConfig;
use crate::core::ParticleResult;
use crate::render::context::GpuContext;

use super::batch::{
    BatchBufferSet, EmitterBatch, EmitterBatchStore, GpuBatchAllocator, ParticleBindGroupLayouts,
};
use super::descriptor::{EmitterParamsGpu, ParticleEmitterDescriptor, TransformUpdate};
use super::emit::EmitStage;
use super::kickoff::KickoffStage;
use super::readback;
use super::render::{CameraPassData, ParticleBillboardRenderer};
use super::simulate::{SceneSnapshot, SimulateStage};

/// 粒子系统统计
#[derive(Debug, Default, Clone, Copy)]
pub struct ParticleSystemStats {
    /// 既有发射器数量
    pub emitters: u32,
    /// 最近观测到的幸存粒子总数
    pub alive_after_sim: u32,
    /// 本帧计划发射数（按最近观测的死亡计数钳制后的估计）
    pub frame_emitted: u32,
    /// 全部发射器的容量之和
    pub capacity: u32,
}

/// 粒子系统管理器
pub struct ParticleSystemManager {
    context: GpuContext,
    config: ParticleGlobalConfig,
    layouts: Arc<ParticleBindGroupLayouts>,
    store: EmitterBatchStore<GpuBatchAllocator>,
    kickoff: KickoffStage,
    emit: EmitStage,
    simulate: SimulateStage,
    renderer: ParticleBillboardRenderer,
    scene: SceneSnapshot,
    tick_indices: Vec<usize>,
    transform_updates: Vec<TransformUpdate>,
    frame_index: u64,
    stats: ParticleSystemStats,
}

impl ParticleSystemManager {
    /// 创建管理器
    ///
    /// 设备与队列显式注入；场景快照初始为哑快照（碰撞关闭），
    /// 渲染器经外层管线传入目标颜色格式。
    pub fn new(
        context: GpuContext,
        config: ParticleGlobalConfig,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let config = config.sanitize();
        let layouts = Arc::new(ParticleBindGroupLayouts::new(&context.device));
        let kickoff = KickoffStage::new(&context.device, &layouts);
        let emit = EmitStage::new(&context.device, &layouts);
        let simulate = SimulateStage::new(&context.device, &layouts);
        let renderer = ParticleBillboardRenderer::new(&context.device, &layouts, surface_format);
        let scene = SceneSnapshot::dummy(&context.device, &layouts);
        let allocator = GpuBatchAllocator::new(context.device.clone(), layouts.clone());

        Self {
            context,
            config,
            layouts,
            store: EmitterBatchStore::new(allocator),
            kickoff,
            emit,
            simulate,
            renderer,
            scene,
            tick_indices: Vec::new(),
            transform_updates: Vec::new(),
            frame_index: 0,
            stats: ParticleSystemStats::default(),
        }
    }

    /// 调整发射器槽位数量
    ///
    /// 释放旧批次前排空全部未完成的回读令牌，保证没有仍在飞行的
    /// 命令引用将被释放的缓冲区。
    pub fn set_emitter_count(&mut self, count: usize) -> ParticleResult<()> {
        self.drain_all_pending()?;
        self.store.set_emitter_count(count);
        Ok(())
    }

    /// 在指定槽位创建（或重建）发射器
    pub fn create_emitter(
        &mut self,
        id: usize,
        descriptor: ParticleEmitterDescriptor,
    ) -> ParticleResult<()> {
        if let Some(batch) = self.store.get_mut(id) {
            if let Some(pending) = batch.pending.take() {
                readback::block_drain(&self.context.device, &batch.buffers.staging, pending)?;
            }
        }
        self.store.create_emitter(id, descriptor)
    }

    /// 销毁一个发射器，释放其全部设备缓冲区
    pub fn destroy_emitter(&mut self, id: usize) -> ParticleResult<()> {
        if let Some(batch) = self.store.get_mut(id) {
            if let Some(pending) = batch.pending.take() {
                readback::block_drain(&self.context.device, &batch.buffers.staging, pending)?;
            }
        }
        self.store.destroy_emitter(id);
        Ok(())
    }

    /// 设定本帧要模拟的发射器集合
    ///
    /// 未列出的发射器被完整跳过：不调度、不回读、不触碰任何缓冲区。
    pub fn set_tick_indices(&mut self, ids: &[usize]) {
        self.tick_indices.clear();
        self.tick_indices.extend_from_slice(ids);
    }

    /// 提交每帧变换增量（在 Kickoff 之前合并进描述符）
    pub fn set_transform_indices(&mut self, updates: &[TransformUpdate]) {
        self.transform_updates.extend_from_slice(updates);
    }

    /// 安装渲染器提供的深度/法线场景快照（开启地面碰撞采样）
    ///
    /// `depth_view` 必须是 `R32Float` 视图，见 [`SceneSnapshot::new`]。
    pub fn install_scene_snapshot(
        &mut self,
        depth_view: &wgpu::TextureView,
        normal_view: &wgpu::TextureView,
        extent: (u32, u32),
        restitution: f32,
    ) {
        self.scene = SceneSnapshot::new(
            &self.context.device,
            &self.layouts,
            depth_view,
            normal_view,
            extent,
            restitution,
        );
    }

    /// 卸载场景快照（回到哑快照，碰撞关闭）
    pub fn clear_scene_snapshot(&mut self) {
        self.scene = SceneSnapshot::dummy(&self.context.device, &self.layouts);
    }

    /// 上传每帧场景快照（相机/视口）
    pub fn prepare_pass_data(&self, pass_data: &CameraPassData) {
        self.renderer.prepare_pass_data(&self.context.queue, pass_data);
        self.scene
            .update_matrices(&self.context.queue, pass_data.view_proj);
    }

    /// 模拟一帧
    pub fn tick(&mut self) -> ParticleResult<()> {
        self.frame_index += 1;
        self.stats.frame_emitted = 0;

        // 变换增量在任何调度之前合并进描述符
        for update in self.transform_updates.drain(..) {
            match self.store.get_mut(update.id) {
                Some(batch) => batch
                    .descriptor
                    .apply_transform(update.delta_position, update.delta_rotation),
                None => tracing::warn!(
                    target: "particles",
                    "transform update for unknown emitter {}",
                    update.id
                ),
            }
        }

        let tick_indices = std::mem::take(&mut self.tick_indices);
        for &id in &tick_indices {
            self.tick_emitter(id)?;
        }
        self.tick_indices = tick_indices;

        self.refresh_stats();
        Ok(())
    }

    fn tick_emitter(&mut self, id: usize) -> ParticleResult<()> {
        let device = self.context.device.clone();
        let queue = self.context.queue.clone();
        let frame_index = self.frame_index;
        let time_step = self.config.time_step;

        let Some(batch) = self.store.get_mut(id) else {
            tracing::warn!(target: "particles", "tick index {} has no emitter", id);
            return Ok(());
        };

        // 排空上一次提交的回读。staging 缓冲区即将复用，映射尚未完成
        // 时退化为阻塞等待。
        if let Some(pending) = batch.pending.take() {
            let frame = pending.frame;
            match readback::try_drain(&device, &batch.buffers.staging, pending)? {
                Ok(counter) => batch.tracker.observe(counter, frame),
                Err(still_pending) => {
                    let counter =
                        readback::block_drain(&device, &batch.buffers.staging, still_pending)?;
                    batch.tracker.observe(counter, frame);
                }
            }
            debug_assert!(batch.tracker.last.is_conserved(batch.capacity()));
        }

        let requested = batch.descriptor.requested_emit(time_step);
        let plan = batch.tracker.plan(requested);
        self.stats.frame_emitted += plan.emit_count;
        tracing::trace!(
            target: "particles",
            "emitter {}: requested {}, planned emit {}, simulate {} threads",
            id,
            requested,
            plan.emit_count,
            plan.simulate_threads
        );

        let params = EmitterParamsGpu::pack(
            &batch.descriptor,
            &self.config,
            requested,
            frame_index,
            self.scene.collision_enabled,
            rand::random::<u32>(),
        );
        queue.write_buffer(&batch.buffers.params, 0, bytemuck::bytes_of(&params));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Particle Tick Encoder"),
        });
        self.kickoff.encode(
            &mut encoder,
            &batch.buffers.storage_bind_group,
            &batch.buffers.uniform_bind_group,
        );
        self.emit.encode(
            &mut encoder,
            &batch.buffers.storage_ro_bind_group,
            &batch.buffers.uniform_bind_group,
            &batch.buffers.indirect,
        );
        self.simulate.encode(
            &mut encoder,
            &batch.buffers.storage_ro_bind_group,
            &batch.buffers.uniform_bind_group,
            &self.scene,
            &batch.buffers.indirect,
        );
        readback::encode_counter_copy(&mut encoder, &batch.buffers.counters, &batch.buffers.staging);
        queue.submit(Some(encoder.finish()));

        batch.pending = Some(readback::begin_map(&batch.buffers.staging, frame_index));
        Ok(())
    }

    /// 绘制全部发射器
    ///
    /// 每个发射器一次实例化绘制，实例数为其最近观测到的幸存数
    /// （流水线化回读下即上一帧的值）。渲染缓冲区本身已是本帧的
    /// 紧凑记录：群体缩减的那一帧，实例数多出的尾部会重放上一帧
    /// 的记录各一帧，多出量不超过两帧幸存数之差；群体增长时只是
    /// 少画新增的部分。下一帧观测追上后自行修正。
    pub fn render<'a>(&'a self, rpass: &mut wgpu::RenderPass<'a>) {
        for (_, batch) in self.store.iter() {
            self.renderer.draw(
                rpass,
                &batch.buffers.render_bind_group,
                batch.tracker.last.alive_count_after_sim,
            );
        }
    }

    /// 当前统计
    pub fn stats(&self) -> ParticleSystemStats {
        self.stats
    }

    /// 全局配置（清洗后）
    pub fn config(&self) -> &ParticleGlobalConfig {
        &self.config
    }

    /// 借用一个批次（只读，测试与上层诊断用）
    pub fn batch(&self, id: usize) -> Option<&EmitterBatch<BatchBufferSet>> {
        self.store.get(id)
    }

    fn refresh_stats(&mut self) {
        let mut stats = ParticleSystemStats {
            frame_emitted: self.stats.frame_emitted,
            ..Default::default()
        };
        for (_, batch) in self.store.iter() {
            stats.emitters += 1;
            stats.alive_after_sim += batch.tracker.last.alive_count_after_sim;
            stats.capacity += batch.capacity();
        }
        self.stats = stats;
    }

    fn drain_all_pending(&mut self) -> ParticleResult<()> {
        let device = self.context.device.clone();
        for id in 0..self.store.len() {
            if let Some(batch) = self.store.get_mut(id) {
                if let Some(pending) = batch.pending.take() {
                    let frame = pending.frame;
                    let counter =
                        readback::block_drain(&device, &batch.buffers.staging, pending)?;
                    batch.tracker.observe(counter, frame);
                }
            }
        }
        Ok(())
    }
}
