//! 渲染集成
//!
//! 每个发射器一次实例化 billboard 绘制，实例数取该发射器最近一次
//! 回读观测到的 `alive_count_after_sim`（流水线化回读下即上一帧的
//! 幸存数）。渲染记录在模拟阶段已按幸存顺序紧凑写出，实例索引直接
//! 命中渲染位置缓冲区，绘制时没有空洞需要跳过。

use glam::{Mat4, Vec3};

use super::batch::ParticleBindGroupLayouts;

/// 每帧场景快照（相机/视口），由调度器在绘制前提供
#[derive(Debug, Clone, Copy)]
pub struct CameraPassData {
    /// 视图投影矩阵
    pub view_proj: Mat4,
    /// 相机右方向（世界空间）
    pub camera_right: Vec3,
    /// 相机上方向（世界空间）
    pub camera_up: Vec3,
    /// 视口尺寸（宽、高）
    pub viewport: (f32, f32),
}

/// 相机 uniform，布局与 `billboard.wgsl` 的 `Camera` 结构一致
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraGpu {
    view_proj: [[f32; 4]; 4],
    camera_right: [f32; 4],
    camera_up: [f32; 4],
    viewport: [f32; 4],
}

/// 粒子 billboard 渲染器
pub struct ParticleBillboardRenderer {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
}

impl ParticleBillboardRenderer {
    /// 创建渲染管线
    ///
    /// `surface_format` 由外层渲染管线决定。
    pub fn new(
        device: &wgpu::Device,
        layouts: &ParticleBindGroupLayouts,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Billboard Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/billboard.wgsl").into()),
        });

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Camera Buffer"),
            size: std::mem::size_of::<CameraGpu>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Camera Bind Group"),
            layout: &layouts.camera,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Particle Billboard Pipeline Layout"),
            bind_group_layouts: &[&layouts.camera, &layouts.render],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Particle Billboard Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        Self {
            pipeline,
            camera_buffer,
            camera_bind_group,
        }
    }

    /// 上传每帧相机快照
    pub fn prepare_pass_data(&self, queue: &wgpu::Queue, pass_data: &CameraPassData) {
        let camera = CameraGpu {
            view_proj: pass_data.view_proj.to_cols_array_2d(),
            camera_right: pass_data.camera_right.extend(0.0).to_array(),
            camera_up: pass_data.camera_up.extend(0.0).to_array(),
            viewport: [pass_data.viewport.0, pass_data.viewport.1, 0.0, 0.0],
        };
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera));
    }

    /// 绘制一个发射器
    ///
    /// `instance_count` 为最近观测到的幸存数；为 0 时整条绘制省略。
    pub fn draw<'a>(
        &'a self,
        rpass: &mut wgpu::RenderPass<'a>,
        render_bind_group: &'a wgpu::BindGroup,
        instance_count: u32,
    ) {
        if instance_count == 0 {
            return;
        }
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(0, &self.camera_bind_group, &[]);
        rpass.set_bind_group(1, render_bind_group, &[]);
        rpass.draw(0..4, 0..instance_count);
    }
}
