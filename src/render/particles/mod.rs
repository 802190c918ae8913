//! GPU 驱动的粒子系统
//!
//! 整条模拟管线常驻 GPU：每个发射器独占固定容量的粒子记录数组、
//! 双缓冲存活列表和死亡列表（空闲槽位的 GPU free-list），每帧由三个
//! compute 阶段推进：
//!
//! 1. **Kickoff**（单线程）：把上一帧的计数器滚动为本帧的间接调度
//!    参数，钳制发射数，翻转存活列表选择位；
//! 2. **Emit**（间接调度）：预算内的调用从死亡列表原子认领槽位并
//!    初始化粒子记录；
//! 3. **Simulate**（间接调度）：积分、回收或幸存路由，并按幸存顺序
//!    紧凑写出渲染记录。
//!
//! CPU 只在每帧回读一份 16 字节的计数器（流水线化、通常非阻塞），
//! 用于实例化绘制的实例数与统计。粒子数据本身从不回传。

pub mod batch;
pub mod descriptor;
pub mod emit;
pub mod kickoff;
pub mod readback;
pub mod render;
pub mod simulate;
pub mod system;

pub use batch::{
    BatchAllocator, BatchBufferSet, EmitterBatch, EmitterBatchStore, GpuParticle,
    ParticleBindGroupLayouts, RenderParticleGpu,
};
pub use descriptor::{EmitterParamsGpu, ParticleEmitterDescriptor, TransformUpdate};
pub use kickoff::{Counter, CounterTracker, DispatchPlan, IndirectDispatchArgs};
pub use readback::PendingReadback;
pub use render::{CameraPassData, ParticleBillboardRenderer};
pub use simulate::SceneSnapshot;
pub use system::{ParticleSystemManager, ParticleSystemStats};
