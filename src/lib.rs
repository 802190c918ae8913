//! # GPU-Driven Particles
//!
//! A GPU-driven particle simulation subsystem built on wgpu.
//!
//! ## Features
//!
//! - **GPU-Resident Simulation**: Particle state lives in device buffers and
//!   is advanced entirely by compute shaders; the CPU never touches particle
//!   data
//! - **Atomic Free-List Recycling**: Dead/alive index lists managed by GPU
//!   atomics give O(1) slot recycling inside a fixed-capacity pool
//! - **Indirect Dispatch**: A single-thread kickoff stage sizes the emit and
//!   simulate dispatches on the GPU, so thread counts track live particle
//!   counts without a CPU round-trip
//! - **Pipelined Counter Readback**: One 16-byte counter block per emitter is
//!   read back per frame through frame-tagged tokens, normally without
//!   blocking
//! - **Instanced Billboard Rendering**: Survivors are compacted into a render
//!   buffer each frame and drawn with one instanced quad per particle
//!
//! ## Architecture Design
//!
//! Each emitter owns an isolated batch of device buffers; nothing is shared
//! between emitters. Per frame and per active emitter the schedule is:
//!
//! ```text
//! drain readback -> merge transforms -> upload params
//!     -> Kickoff -> Emit -> Simulate -> counter copy -> submit -> map token
//! ```
//!
//! ### Example
//!
//! ```ignore
//! use game_engine_particles::render::particles::{
//!     ParticleEmitterDescriptor, ParticleSystemManager,
//! };
//!
//! let mut particles = ParticleSystemManager::new(context, config, surface_format);
//! particles.set_emitter_count(1)?;
//! particles.create_emitter(0, ParticleEmitterDescriptor::new(10_000))?;
//! particles.set_tick_indices(&[0]);
//! particles.tick()?;
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Error types and shared constants
//! - [`config`]: Global simulation configuration (TOML/JSON)
//! - [`render`]: GPU device context and the particle pipeline

/// Error types and shared constants
pub mod core;
/// Global simulation configuration
pub mod config;
/// GPU device context and particle pipeline
pub mod render;

pub use crate::core::{ParticleError, ParticleResult, WORKGROUP_SIZE};
pub use config::ParticleGlobalConfig;
pub use render::context::GpuContext;
pub use render::particles::{
    CameraPassData, ParticleEmitterDescriptor, ParticleSystemManager, ParticleSystemStats,
    TransformUpdate,
};
