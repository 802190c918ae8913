//! 计数器回读与主机同步
//!
//! 模拟阶段之后把计数器拷贝到 host 可见的 staging 缓冲区。提交与观测
//! 解耦：提交后登记一个携带帧序号的待完成令牌，下一帧该发射器再次
//! 被调度时先非阻塞轮询；只有在 staging 缓冲区即将被复用而映射仍未
//! 完成时才退化为阻塞等待。映射失败或完成信号通道断开视为设备挂起，
//! 以致命的 `Synchronization` 错误上抛。

use crossbeam_channel::{Receiver, TryRecvError};

use crate::core::{ParticleError, ParticleResult};

use super::kickoff::Counter;

/// 待完成的回读令牌
///
/// `frame` 标记这次回读对应的帧；映射完成信号经 channel 送达。
pub struct PendingReadback {
    /// 提交这次回读的帧序号
    pub frame: u64,
    receiver: Receiver<Result<(), wgpu::BufferAsyncError>>,
}

/// 录制模拟结果计数器到 staging 的拷贝
///
/// 排在模拟写入之后录制；wgpu 依据缓冲区用法自动在两者之间插入
/// 读写屏障。
pub fn encode_counter_copy(
    encoder: &mut wgpu::CommandEncoder,
    counters: &wgpu::Buffer,
    staging: &wgpu::Buffer,
) {
    encoder.copy_buffer_to_buffer(
        counters,
        0,
        staging,
        0,
        std::mem::size_of::<Counter>() as wgpu::BufferAddress,
    );
}

/// 提交后发起映射并返回待完成令牌
pub fn begin_map(staging: &wgpu::Buffer, frame: u64) -> PendingReadback {
    let (sender, receiver) = crossbeam_channel::bounded(1);
    staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        // 接收端先行丢弃（批次被销毁）时忽略发送失败
        let _ = sender.send(result);
    });
    PendingReadback { frame, receiver }
}

/// 非阻塞轮询一次回读
///
/// 完成则读出计数器并解除映射；尚未完成则原样归还令牌。
pub fn try_drain(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    pending: PendingReadback,
) -> ParticleResult<Result<Counter, PendingReadback>> {
    device.poll(wgpu::Maintain::Poll);
    match pending.receiver.try_recv() {
        Ok(Ok(())) => Ok(Ok(read_counter(staging))),
        Ok(Err(e)) => Err(ParticleError::Synchronization(format!(
            "counter readback map failed: {e}"
        ))),
        Err(TryRecvError::Empty) => Ok(Err(pending)),
        Err(TryRecvError::Disconnected) => Err(ParticleError::Synchronization(
            "counter readback completion channel disconnected".to_string(),
        )),
    }
}

/// 阻塞等待一次回读完成
///
/// 只在 staging 缓冲区必须复用、或批次即将销毁时调用。
pub fn block_drain(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    pending: PendingReadback,
) -> ParticleResult<Counter> {
    device.poll(wgpu::Maintain::Wait);
    match pending.receiver.recv() {
        Ok(Ok(())) => Ok(read_counter(staging)),
        Ok(Err(e)) => Err(ParticleError::Synchronization(format!(
            "counter readback map failed: {e}"
        ))),
        Err(_) => Err(ParticleError::Synchronization(
            "counter readback completion channel disconnected".to_string(),
        )),
    }
}

fn read_counter(staging: &wgpu::Buffer) -> Counter {
    let counter = {
        let view = staging.slice(..).get_mapped_range();
        *bytemuck::from_bytes::<Counter>(&view)
    };
    staging.unmap();
    counter
}
