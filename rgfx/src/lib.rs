//! Vulkan rendering core built on [`ash`] and [`gpu_allocator`].
//!
//! # Object hierarchy
//!
//! ```text
//! Instance
//! ├── Surface<T>
//! │   └── Backbuffer<T>
//! └── Device (queues, per-family command pools, allocator)
//!     ├── Buffer / RingBuffer
//!     ├── Texture → descriptor set (when sampled)
//!     ├── Sampler / DescriptorLayoutManager
//!     ├── DescriptorAllocator → DescriptorSet
//!     ├── RenderPass / Framebuffer
//!     ├── PipelineLayout → Pipeline ← MultiPipeline
//!     ├── ShaderModule ← ShaderCache
//!     ├── CommandBuffer
//!     └── Fence / Semaphore
//! ```
//!
//! Each wrapper holds its parent via `Arc` so parents cannot be
//! destroyed while children are alive.
//!
//! # Naming conventions
//!
//! | prefix  | meaning                                   |
//! |---------|-------------------------------------------|
//! | `raw_*` | accepts or returns a raw `ash::vk` handle |
//! | `ash_*` | returns the `ash` wrapper object          |
//! | `cmd_*` | records into a raw command buffer         |

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod backbuffer;
pub mod buffer;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod layout_manager;
pub mod multi_pipeline;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod renderer;
pub mod ring_buffer;
pub mod sampler;
pub mod shader;
pub mod shader_cache;
pub mod surface;
pub mod sync;
pub mod texture;
pub mod upload;

pub use ash;
pub use raw_window_handle::HandleError as RwhHandleError;
