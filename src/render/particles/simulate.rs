//! 模拟阶段与场景快照
//!
//! 以 Kickoff 写出的工作组数做间接调度，覆盖旧存活与本帧新发射的
//! 粒子。每个调用积分一条粒子并把槽位索引路由到恰好一个去向：
//! 寿命耗尽进死亡列表，否则追加到下一存活列表并按幸存顺序紧凑写出
//! 渲染记录。可选地对渲染器提供的深度/法线场景快照做地面碰撞。

use glam::Mat4;

use super::batch::ParticleBindGroupLayouts;
use super::kickoff::SIMULATE_DISPATCH_OFFSET;

/// 场景快照矩阵 uniform
///
/// 布局与 `simulate.wgsl` 中的 `SceneUniforms` 一致。
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SceneUniformsGpu {
    view_proj: [[f32; 4]; 4],
    inv_view_proj: [[f32; 4]; 4],
    /// 快照分辨率（xy）+ 碰撞恢复系数（z）+ 填充
    extent_restitution: [f32; 4],
}

/// 渲染器每帧提供的只读场景快照
///
/// 深度与法线纹理由外部渲染管线拥有；这里只持有为模拟阶段建好的
/// 绑定组。深度以 `R32Float` 拷贝提供（depth 纹理的 `textureLoad`
/// 无法翻译到 GLSL 后端）。未安装快照时使用 1×1 的哑快照，
/// 碰撞采样关闭。
pub struct SceneSnapshot {
    /// 模拟阶段绑定组（group 2）
    pub bind_group: wgpu::BindGroup,
    uniform: wgpu::Buffer,
    /// 是否启用碰撞采样
    pub collision_enabled: bool,
    extent: (u32, u32),
    restitution: f32,
}

impl SceneSnapshot {
    /// 由渲染器的深度/法线视图构建快照
    ///
    /// `depth_view` 必须是 `R32Float` 视图（渲染器深度附件的拷贝），
    /// 不能直接传 depth 格式的视图。
    pub fn new(
        device: &wgpu::Device,
        layouts: &ParticleBindGroupLayouts,
        depth_view: &wgpu::TextureView,
        normal_view: &wgpu::TextureView,
        extent: (u32, u32),
        restitution: f32,
    ) -> Self {
        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Scene Uniforms"),
            size: std::mem::size_of::<SceneUniformsGpu>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = Self::bind(device, layouts, depth_view, normal_view, &uniform);
        Self {
            bind_group,
            uniform,
            collision_enabled: true,
            extent,
            restitution,
        }
    }

    /// 无快照时的哑实现（碰撞关闭）
    pub fn dummy(device: &wgpu::Device, layouts: &ParticleBindGroupLayouts) -> Self {
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Particle Dummy Depth"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let normal = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Particle Dummy Normal"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Scene Uniforms"),
            size: std::mem::size_of::<SceneUniformsGpu>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = Self::bind(
            device,
            layouts,
            &depth.create_view(&wgpu::TextureViewDescriptor::default()),
            &normal.create_view(&wgpu::TextureViewDescriptor::default()),
            &uniform,
        );
        Self {
            bind_group,
            uniform,
            collision_enabled: false,
            extent: (1, 1),
            restitution: 0.0,
        }
    }

    fn bind(
        device: &wgpu::Device,
        layouts: &ParticleBindGroupLayouts,
        depth_view: &wgpu::TextureView,
        normal_view: &wgpu::TextureView,
        uniform: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Scene Bind Group"),
            layout: &layouts.scene,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(depth_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(normal_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
        })
    }

    /// 更新快照矩阵（每帧由 `prepare_pass_data` 路径调用）
    pub fn update_matrices(&self, queue: &wgpu::Queue, view_proj: Mat4) {
        let uniforms = SceneUniformsGpu {
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            extent_restitution: [
                self.extent.0 as f32,
                self.extent.1 as f32,
                self.restitution,
                0.0,
            ],
        };
        queue.write_buffer(&self.uniform, 0, bytemuck::bytes_of(&uniforms));
    }
}

/// 模拟计算管线
pub struct SimulateStage {
    pipeline: wgpu::ComputePipeline,
}

impl SimulateStage {
    /// 创建管线
    pub fn new(device: &wgpu::Device, layouts: &ParticleBindGroupLayouts) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Simulate Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/simulate.wgsl").into()),
        });

        // 与发射阶段同理：间接参数只读，才能与 INDIRECT 用法共存
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Simulate Pipeline Layout"),
            bind_group_layouts: &[&layouts.storage_ro_args, &layouts.uniform, &layouts.scene],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Particle Simulate Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Self { pipeline }
    }

    /// 录制本帧的模拟调度（间接，工作组数来自 Kickoff）
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        storage_bind_group: &wgpu::BindGroup,
        uniform_bind_group: &wgpu::BindGroup,
        scene: &SceneSnapshot,
        indirect: &wgpu::Buffer,
    ) {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Particle Simulate"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&self.pipeline);
        cpass.set_bind_group(0, storage_bind_group, &[]);
        cpass.set_bind_group(1, uniform_bind_group, &[]);
        cpass.set_bind_group(2, &scene.bind_group, &[]);
        cpass.dispatch_workgroups_indirect(indirect, SIMULATE_DISPATCH_OFFSET);
    }
}

// 布局断言：uniform 结构体必须是 16 的倍数
const _: () = assert!(std::mem::size_of::<SceneUniformsGpu>() % 16 == 0);
