// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! binds_and_barriers tracks resource bindings and state transitions for a GPU command stream.

A renderer records into a [`CommandContext`]: it selects pipelines, binds uniform buffers and
render targets, and issues draws and dispatches. The context turns that into the smallest set
of driver calls that produces the same GPU state, and refuses (or, in shipping builds, reports)
uses of a resource that would race with an earlier write.

# Moving parts

| Piece                                               | Job                                                               |
|-----------------------------------------------------|-------------------------------------------------------------------|
| [`GPUResource`](resource::GPUResource)               | Identity plus current access, dirty flag and last write frame     |
| [`BindingCache`](bindings::cache::BindingCache)      | Which resource sits in which slot; skips redundant binds          |
| [`DirtyMask`](bindings::dirty_tracking::DirtyMask)   | Which uniform buffers changed since the last resolve, per stage   |
| [`ResourceTableResolver`](resolver::ResourceTableResolver) | Applies a shader's resource table for the dirty buffers only |
| [`RenderTargetBinder`](render_target::RenderTargetBinder) | Color, depth-stencil and UAV outputs                         |
| [`TransitionValidator`](transition::TransitionValidator) | Read-after-write and write-after-write hazard checks         |

# Hazards

A resource written in the current frame is *dirty* until a barrier is issued. Reading it, or
writing it again through an unordered-access view, before that barrier is a hazard. How a hazard
is reported is controlled by [`Severity`](config::Severity): development builds default to
returning an error, release builds to logging it and carrying on.

# Backends

Everything the tracker decides reaches the GPU through the [`Driver`] trait. [`RecordingDriver`]
keeps a log of calls and is what the tests use. With the default `backend_wgpu` feature,
`WgpuDriver` replays the state into [wgpu](https://wgpu.rs) passes.
*/

pub mod bindings;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod render_target;
pub mod resolver;
pub mod resource;
pub mod stats;
pub mod transition;
pub mod uniform_buffer;
mod bittricks;
mod imp;

pub use context::CommandContext;
pub use error::CommandError;
pub use imp::{DrawCommand, Driver, DriverCall, IndexFormat, RecordingDriver};
#[cfg(feature = "backend_wgpu")]
pub use imp::{WgpuDriver, WgpuError};
pub use resource::{Access, GPUResource};
pub use transition::FrameClock;
