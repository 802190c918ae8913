//! 发射器批次与缓冲区集合
//!
//! 每个发射器独占一组设备缓冲区：槽位索引的粒子记录数组、计数器、
//! 双缓冲存活列表、死亡列表、间接参数缓冲区、描述符 uniform、
//! 渲染位置缓冲区和回读 staging 缓冲区。任何资源都不跨发射器共享。
//!
//! 缓冲区分配经由 [`BatchAllocator`] trait：生产实现包装 `wgpu::Device`，
//! 测试替身按 1:1 统计 allocate/release 以验证 resize 不泄漏。

use std::sync::Arc;

use crate::core::{ParticleError, ParticleResult};

use super::descriptor::{EmitterParamsGpu, ParticleEmitterDescriptor};
use super::kickoff::{Counter, CounterTracker, IndirectDispatchArgs};
use super::readback::PendingReadback;

/// 设备侧粒子记录（槽位索引，从不搬迁）
///
/// 布局与 shader 中的 `Particle` 结构一致。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParticle {
    /// 位置（世界空间）
    pub position: [f32; 3],
    /// 剩余寿命（秒）
    pub life: f32,
    /// 速度
    pub velocity: [f32; 3],
    /// 出生种子
    pub seed: u32,
}

/// 渲染用粒子记录（模拟阶段按幸存顺序紧凑写出，绘制时无空洞）
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RenderParticleGpu {
    /// 世界空间位置
    pub position: [f32; 3],
    /// 大小
    pub size: f32,
    /// 颜色
    pub color: [f32; 4],
}

/// 粒子管线的绑定组布局集合
///
/// Kickoff 与 Emit/Simulate 的 storage 布局只差在间接参数缓冲区的
/// 访问权限：Kickoff 写间接参数（read-write），Emit/Simulate 只读它。
/// 这个拆分是必须的——同一提交里 INDIRECT 用法与 STORAGE_READ_WRITE
/// 互斥，只有只读 storage 能与间接调度合法共存。
pub struct ParticleBindGroupLayouts {
    /// Kickoff 阶段存储缓冲区布局（group 0，间接参数可写）
    pub storage: wgpu::BindGroupLayout,
    /// Emit/Simulate 阶段存储缓冲区布局（group 0，间接参数只读）
    pub storage_ro_args: wgpu::BindGroupLayout,
    /// 发射器参数 uniform 布局（group 1）
    pub uniform: wgpu::BindGroupLayout,
    /// 场景深度/法线快照布局（仅模拟阶段 group 2）
    pub scene: wgpu::BindGroupLayout,
    /// 渲染位置缓冲区布局（绘制 group 1）
    pub render: wgpu::BindGroupLayout,
    /// 相机 uniform 布局（绘制 group 0）
    pub camera: wgpu::BindGroupLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn compute_storage_layout(
    device: &wgpu::Device,
    label: &str,
    args_read_only: bool,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            // 粒子记录
            storage_entry(0, false),
            // 死亡列表
            storage_entry(1, false),
            // 存活列表 0
            storage_entry(2, false),
            // 存活列表 1
            storage_entry(3, false),
            // 计数器
            storage_entry(4, false),
            // 间接调度参数
            storage_entry(5, args_read_only),
            // 渲染位置
            storage_entry(6, false),
        ],
    })
}

impl ParticleBindGroupLayouts {
    /// 创建全部布局
    pub fn new(device: &wgpu::Device) -> Self {
        let storage = compute_storage_layout(device, "Particle Kickoff Storage Layout", false);
        let storage_ro_args =
            compute_storage_layout(device, "Particle Stage Storage Layout", true);

        let uniform = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Emitter Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let scene = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Scene Snapshot Layout"),
            entries: &[
                // 深度快照（R32Float 拷贝；depth 纹理的 textureLoad
                // 无法翻译到 GLSL 后端）
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // 法线快照
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // 快照矩阵
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let render = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Render Storage Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let camera = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle Camera Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        Self {
            storage,
            storage_ro_args,
            uniform,
            scene,
            render,
            camera,
        }
    }
}

/// 一个发射器独占的设备缓冲区集合
pub struct BatchBufferSet {
    /// 粒子记录数组（N 个槽位）
    pub particles: wgpu::Buffer,
    /// 死亡列表（N 个槽位索引）
    pub dead_list: wgpu::Buffer,
    /// 双缓冲存活列表
    pub alive_lists: [wgpu::Buffer; 2],
    /// 计数器
    pub counters: wgpu::Buffer,
    /// 间接调度参数
    pub indirect: wgpu::Buffer,
    /// 渲染位置缓冲区
    pub render_particles: wgpu::Buffer,
    /// 发射器参数 uniform
    pub params: wgpu::Buffer,
    /// 计数器回读 staging
    pub staging: wgpu::Buffer,
    /// Kickoff 阶段存储绑定组（间接参数可写）
    pub storage_bind_group: wgpu::BindGroup,
    /// Emit/Simulate 阶段存储绑定组（间接参数只读）
    pub storage_ro_bind_group: wgpu::BindGroup,
    /// 发射器参数绑定组
    pub uniform_bind_group: wgpu::BindGroup,
    /// 绘制阶段绑定组
    pub render_bind_group: wgpu::BindGroup,
}

/// 批次缓冲区分配器
///
/// 生产实现创建真实设备资源；测试替身统计 allocate/release 调用。
pub trait BatchAllocator {
    /// 分配出的缓冲区集合类型
    type Buffers;

    /// 为一个发射器分配并播种全套缓冲区
    fn allocate(
        &self,
        id: usize,
        descriptor: &ParticleEmitterDescriptor,
    ) -> ParticleResult<Self::Buffers>;

    /// 释放一个批次的缓冲区
    ///
    /// 约定：调用方保证没有仍在飞行中的命令引用这些缓冲区，或者
    /// 实现自身在释放前等到设备空闲。
    fn release(&self, buffers: Self::Buffers);
}

/// 基于 wgpu 的批次分配器
pub struct GpuBatchAllocator {
    device: Arc<wgpu::Device>,
    layouts: Arc<ParticleBindGroupLayouts>,
}

impl GpuBatchAllocator {
    /// 创建分配器
    pub fn new(device: Arc<wgpu::Device>, layouts: Arc<ParticleBindGroupLayouts>) -> Self {
        Self { device, layouts }
    }

    fn create_seeded_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: contents.len() as wgpu::BufferAddress,
            usage,
            mapped_at_creation: true,
        });
        buffer
            .slice(..)
            .get_mapped_range_mut()
            .copy_from_slice(contents);
        buffer.unmap();
        buffer
    }
}

impl BatchAllocator for GpuBatchAllocator {
    type Buffers = BatchBufferSet;

    fn allocate(
        &self,
        id: usize,
        descriptor: &ParticleEmitterDescriptor,
    ) -> ParticleResult<Self::Buffers> {
        let capacity = descriptor.capacity;
        let prewarm = descriptor.prewarm;

        let list_usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;

        // 粒子记录：预热槽位获得一条出生在发射器原点的记录
        let mut records = vec![GpuParticle::default(); capacity as usize];
        for (slot, record) in records.iter_mut().enumerate().take(prewarm as usize) {
            let direction = descriptor.direction.normalize_or_zero() * descriptor.speed;
            *record = GpuParticle {
                position: descriptor.position.to_array(),
                life: descriptor.life_max,
                velocity: direction.to_array(),
                seed: slot as u32,
            };
        }
        let particles = self.create_seeded_buffer(
            &format!("Particle Records [{}]", id),
            bytemuck::cast_slice(&records),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );

        // 死亡列表：剩余槽位的完整排列
        let dead: Vec<u32> = (prewarm..capacity).collect();
        let mut dead_padded = dead;
        dead_padded.resize(capacity as usize, 0);
        let dead_list = self.create_seeded_buffer(
            &format!("Particle Dead List [{}]", id),
            bytemuck::cast_slice(&dead_padded),
            list_usage,
        );

        // 存活列表：选择位从 0 起步、首次 Kickoff 翻到 1，预热索引写入 1 号表
        let alive_zero = vec![0u32; capacity as usize];
        let mut alive_one = vec![0u32; capacity as usize];
        for (i, slot) in alive_one.iter_mut().enumerate().take(prewarm as usize) {
            *slot = i as u32;
        }
        let alive_lists = [
            self.create_seeded_buffer(
                &format!("Particle Alive List 0 [{}]", id),
                bytemuck::cast_slice(&alive_zero),
                list_usage,
            ),
            self.create_seeded_buffer(
                &format!("Particle Alive List 1 [{}]", id),
                bytemuck::cast_slice(&alive_one),
                list_usage,
            ),
        ];

        let counters = self.create_seeded_buffer(
            &format!("Particle Counters [{}]", id),
            bytemuck::bytes_of(&Counter::prewarmed(capacity, prewarm)),
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        );

        let indirect = self.create_seeded_buffer(
            &format!("Particle Indirect Args [{}]", id),
            bytemuck::bytes_of(&IndirectDispatchArgs::initial()),
            wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST,
        );

        let render_particles = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("Particle Render Buffer [{}]", id)),
            size: (capacity as usize * std::mem::size_of::<RenderParticleGpu>())
                as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("Particle Emitter Params [{}]", id)),
            size: std::mem::size_of::<EmitterParamsGpu>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("Particle Counter Staging [{}]", id)),
            size: std::mem::size_of::<Counter>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // 同一套缓冲区绑定两次：Kickoff 用可写间接参数的布局，
        // Emit/Simulate 用只读间接参数的布局
        let storage_entries = [
            wgpu::BindGroupEntry {
                binding: 0,
                resource: particles.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: dead_list.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: alive_lists[0].as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: alive_lists[1].as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: counters.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: indirect.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: render_particles.as_entire_binding(),
            },
        ];
        let storage_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("Particle Kickoff Bind Group [{}]", id)),
            layout: &self.layouts.storage,
            entries: &storage_entries,
        });
        let storage_ro_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("Particle Stage Bind Group [{}]", id)),
            layout: &self.layouts.storage_ro_args,
            entries: &storage_entries,
        });

        let uniform_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("Particle Uniform Bind Group [{}]", id)),
            layout: &self.layouts.uniform,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params.as_entire_binding(),
            }],
        });

        let render_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("Particle Render Bind Group [{}]", id)),
            layout: &self.layouts.render,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: render_particles.as_entire_binding(),
            }],
        });

        tracing::debug!(
            target: "particles",
            "allocated batch {} (capacity {}, prewarm {})",
            id,
            capacity,
            prewarm
        );

        Ok(BatchBufferSet {
            particles,
            dead_list,
            alive_lists,
            counters,
            indirect,
            render_particles,
            params,
            staging,
            storage_bind_group,
            storage_ro_bind_group,
            uniform_bind_group,
            render_bind_group,
        })
    }

    fn release(&self, buffers: Self::Buffers) {
        // 释放策略：等待设备空闲后再丢弃。wgpu 本身会把
        // 已提交命令引用的缓冲区保活到命令完成，这里的等待保证计数器
        // 镜像与回读槽的一致性。
        self.device.poll(wgpu::Maintain::Wait);
        drop(buffers);
    }
}

/// 一个发射器批次
pub struct EmitterBatch<B> {
    /// 发射器描述符（独占，变换更新原地合并）
    pub descriptor: ParticleEmitterDescriptor,
    /// 计数器追踪（最近一次回读观测）
    pub tracker: CounterTracker,
    /// 独占缓冲区集合
    pub buffers: B,
    /// 未完成的回读令牌
    pub pending: Option<PendingReadback>,
}

impl<B> EmitterBatch<B> {
    /// 槽位容量 N
    pub fn capacity(&self) -> u32 {
        self.descriptor.capacity
    }
}

/// 发射器批次仓库
///
/// 槽位按发射器 id 定长排布；`set_emitter_count` 调整槽位数并释放
/// 既有批次，`create_emitter` 在槽位内（重）建批次。
pub struct EmitterBatchStore<A: BatchAllocator> {
    allocator: A,
    batches: Vec<Option<EmitterBatch<A::Buffers>>>,
}

impl<A: BatchAllocator> EmitterBatchStore<A> {
    /// 创建空仓库
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            batches: Vec::new(),
        }
    }

    /// 槽位数量
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// 是否没有任何槽位
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// 调整发射器槽位数量
    ///
    /// 先释放所有既有批次再重建槽位。释放只能发生在没有在飞命令仍
    /// 引用旧缓冲区之后；生产分配器通过在 `release` 里等待设备空闲
    /// 来满足该契约。
    pub fn set_emitter_count(&mut self, count: usize) {
        for slot in self.batches.drain(..) {
            if let Some(batch) = slot {
                self.allocator.release(batch.buffers);
            }
        }
        self.batches.resize_with(count, || None);
        tracing::debug!(target: "particles", "emitter store resized to {} slots", count);
    }

    /// 在指定槽位创建发射器批次
    ///
    /// 槽位已有批次时先释放旧批次。死亡列表播种为剩余槽位的完整排列，
    /// 计数器置为全死亡（或按描述符的 `prewarm` 预热）。
    pub fn create_emitter(
        &mut self,
        id: usize,
        descriptor: ParticleEmitterDescriptor,
    ) -> ParticleResult<()> {
        descriptor.validate()?;
        if id >= self.batches.len() {
            return Err(ParticleError::UnknownEmitter {
                id,
                count: self.batches.len(),
            });
        }

        if let Some(old) = self.batches[id].take() {
            self.allocator.release(old.buffers);
        }

        let buffers = self.allocator.allocate(id, &descriptor)?;
        let initial = Counter::prewarmed(descriptor.capacity, descriptor.prewarm);
        self.batches[id] = Some(EmitterBatch {
            descriptor,
            tracker: CounterTracker::new(initial),
            buffers,
            pending: None,
        });
        Ok(())
    }

    /// 销毁一个槽位上的批次并释放其缓冲区
    ///
    /// 槽位本身保留，之后可以重新 `create_emitter`。空槽位是 no-op。
    pub fn destroy_emitter(&mut self, id: usize) {
        if let Some(slot) = self.batches.get_mut(id) {
            if let Some(batch) = slot.take() {
                self.allocator.release(batch.buffers);
                tracing::debug!(target: "particles", "destroyed emitter {}", id);
            }
        }
    }

    /// 借用一个批次
    pub fn get(&self, id: usize) -> Option<&EmitterBatch<A::Buffers>> {
        self.batches.get(id).and_then(|slot| slot.as_ref())
    }

    /// 可变借用一个批次
    pub fn get_mut(&mut self, id: usize) -> Option<&mut EmitterBatch<A::Buffers>> {
        self.batches.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// 遍历既有批次
    pub fn iter(&self) -> impl Iterator<Item = (usize, &EmitterBatch<A::Buffers>)> {
        self.batches
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|batch| (id, batch)))
    }
}
