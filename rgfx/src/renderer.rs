//! Frame orchestration.
//!
//! The [`Renderer`] owns everything a frame touches and runs one frame at a
//! time:
//!
//! 1. wait for the previous frame's fence and release its ring allocations
//! 2. write camera and light data into their persistent buffers and per-draw
//!    data into the ring
//! 3. acquire a backbuffer image
//! 4. record the scene into the offscreen framebuffer and copy it to the
//!    backbuffer
//! 5. submit, waiting on image acquisition and signalling render completion
//! 6. present
//!
//! A frame that fails is logged by the caller and skipped; the renderer
//! rebuilds whatever swapchain state the failure left behind.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::backbuffer::{
    AcquireImageError, Backbuffer, BackbufferDesc, CreateBackbufferError, PresentError,
};
use crate::buffer::{
    Buffer, BufferDesc, BufferType, CreateBufferError, WriteBufferError,
};
use crate::command::{
    BeginCommandBufferError, ClearType, CommandBuffer, CopyTextureError,
    CreateCommandBufferError, EndCommandBufferError,
};
use crate::config::RendererConfig;
use crate::descriptor::{
    AllocateDescriptorSetError, CreateDescriptorPoolError, DescriptorAllocator, DescriptorSet,
};
use crate::device::{Device, ExecuteError};
use crate::layout_manager::{CreateLayoutManagerError, DescriptorLayoutManager};
use crate::multi_pipeline::{
    CreateMultiPipelineError, DevicePipelineError, DevicePipelineFactory, MultiPipeline,
    MultiPipelineDesc, ShaderCombination,
};
use crate::pipeline::{CreatePipelineLayoutError, PipelineLayout, StandardVertex, VertexLayout};
use crate::queue::QueueType;
use crate::render_pass::{
    CreateFramebufferError, CreateRenderPassError, Framebuffer, RenderPass, RenderPassDesc,
};
use crate::ring_buffer::RingBuffer;
use crate::shader::{MacroLimit, ShaderMacro, ShaderStage, macros};
use crate::shader_cache::{GlslangCompiler, ShaderCache};
use crate::surface::Surface;
use crate::sync::{
    CreateFenceError, CreateSemaphoreError, Fence, FrameSemaphores, WaitFenceError,
};
use crate::texture::{CreateTextureError, Texture, TextureDesc, TextureDescriptor};

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const VERTEX_SHADER: &str = "basic.vert";
const FRAGMENT_SHADER: &str = "basic.frag";

// Descriptor set indices in the scene pipeline layout.
const SET_VERTEX: u32 = 0;
const SET_FRAGMENT: u32 = 1;
const SET_LIGHT: u32 = 2;
const SET_DIFFUSE: u32 = 3;

// ---------------------------------------------------------------------------
// Uniform data
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightUniforms {
    /// xyz direction the light travels, w unused.
    pub direction: [f32; 4],
    pub color: [f32; 4],
}

/// Per-draw vertex data, written to the ring every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: [[f32; 4]; 4],
}

/// Per-draw fragment data, written to the ring every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialUniforms {
    pub base_color: [f32; 4],
}

const fn uniform_size<T>() -> vk::DeviceSize {
    std::mem::size_of::<T>() as vk::DeviceSize
}

// ---------------------------------------------------------------------------
// Meshes and draws
// ---------------------------------------------------------------------------

/// Indexed geometry in device-local memory.
#[derive(Debug)]
pub struct Mesh {
    vertices: Buffer,
    indices: Buffer,
    index_count: u32,
}

impl Mesh {
    /// Uploads both buffers, blocking until the copies finish.
    pub fn new(
        device: &Arc<Device>,
        vertices: &[StandardVertex],
        indices: &[u32],
        name: Option<&str>,
    ) -> Result<Self, CreateBufferError> {
        let vertices = Buffer::new(
            device,
            &BufferDesc::from_pod(
                BufferType::Static,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                vertices,
            ),
            name,
        )?;
        let index_count = indices.len() as u32;
        let indices = Buffer::new(
            device,
            &BufferDesc::from_pod(BufferType::Static, vk::BufferUsageFlags::INDEX_BUFFER, indices),
            name,
        )?;
        Ok(Self {
            vertices,
            indices,
            index_count,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// One mesh instance to draw this frame.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem<'a> {
    pub mesh: &'a Mesh,
    pub object: ObjectUniforms,
    pub material: MaterialUniforms,
    /// Needs a descriptor set from [`Renderer::texture_descriptor`].
    pub diffuse: Option<&'a Texture>,
    /// Shade with the light; unlit draws use the base color as is.
    pub lit: bool,
}

impl DrawItem<'_> {
    /// Which fragment variant renders this draw.
    pub fn combination(&self) -> ShaderCombination {
        let textured = self.diffuse.is_some_and(|t| t.descriptor_set().is_some());
        ShaderCombination::new().with(
            ShaderStage::Fragment,
            vec![
                ShaderMacro::new(macros::HAS_TEXTURE, u32::from(textured)),
                ShaderMacro::new(macros::HAS_NORMAL, u32::from(self.lit)),
            ],
        )
    }
}

/// Macros the scene pipeline is compiled with.
pub fn scene_pipeline_desc() -> MultiPipelineDesc {
    MultiPipelineDesc::new()
        .stage(ShaderStage::Vertex, VERTEX_SHADER, Vec::new())
        .stage(
            ShaderStage::Fragment,
            FRAGMENT_SHADER,
            vec![
                MacroLimit::new(macros::HAS_TEXTURE, 1),
                MacroLimit::new(macros::HAS_NORMAL, 1),
            ],
        )
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateRenderTargetsError {
    #[error("Failed to create render target texture: {0}")]
    Texture(#[from] CreateTextureError),
    #[error("Failed to create framebuffer: {0}")]
    Framebuffer(#[from] CreateFramebufferError),
}

#[derive(Debug, Error)]
pub enum CreateRendererError {
    #[error("Failed to create backbuffer: {0}")]
    Backbuffer(#[from] CreateBackbufferError),
    #[error("Failed to create render pass: {0}")]
    RenderPass(#[from] CreateRenderPassError),
    #[error(transparent)]
    RenderTargets(#[from] CreateRenderTargetsError),
    #[error("Failed to create descriptor layouts: {0}")]
    Layouts(#[from] CreateLayoutManagerError),
    #[error("Failed to create pipeline layout: {0}")]
    PipelineLayout(#[from] CreatePipelineLayoutError),
    #[error("Failed to create scene pipelines: {0}")]
    Pipeline(#[from] CreateMultiPipelineError<DevicePipelineError>),
    #[error("Failed to create descriptor pool: {0}")]
    DescriptorPool(#[from] CreateDescriptorPoolError),
    #[error("Failed to allocate descriptor set: {0}")]
    DescriptorSet(#[from] AllocateDescriptorSetError),
    #[error("Failed to create uniform buffer: {0}")]
    Buffer(#[from] CreateBufferError),
    #[error("Failed to create frame fence: {0}")]
    Fence(#[from] CreateFenceError),
    #[error("Failed to create frame semaphores: {0}")]
    Semaphore(#[from] CreateSemaphoreError),
}

#[derive(Debug, Error)]
pub enum RenderFrameError {
    #[error("Waiting for the previous frame failed: {0}")]
    WaitFrame(#[from] WaitFenceError),
    #[error("Resetting the frame fence failed: {0}")]
    ResetFence(vk::Result),
    #[error("Failed to write frame uniforms: {0}")]
    WriteUniforms(#[from] WriteBufferError),
    #[error("Failed to acquire backbuffer image: {0}")]
    Acquire(#[from] AcquireImageError),
    #[error("Failed to create frame command buffer: {0}")]
    CreateCommandBuffer(#[from] CreateCommandBufferError),
    #[error("Failed to begin frame command buffer: {0}")]
    Begin(#[from] BeginCommandBufferError),
    #[error("Failed to end frame command buffer: {0}")]
    End(#[from] EndCommandBufferError),
    #[error("Failed to get pipeline variant: {0}")]
    Pipeline(#[from] CreateMultiPipelineError<DevicePipelineError>),
    #[error("Failed to copy frame to backbuffer: {0}")]
    Copy(#[from] CopyTextureError),
    #[error("Failed to submit frame: {0}")]
    Execute(#[from] ExecuteError),
    #[error("Failed to present frame: {0}")]
    Present(#[from] PresentError),
}

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("Waiting for device idle failed: {0}")]
    WaitIdle(vk::Result),
    #[error("Failed to recreate backbuffer: {0}")]
    Backbuffer(#[from] CreateBackbufferError),
    #[error(transparent)]
    RenderTargets(#[from] CreateRenderTargetsError),
    #[error("Failed to recreate frame semaphores: {0}")]
    Semaphore(#[from] CreateSemaphoreError),
}

/// Outcome of a frame that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the backbuffer no longer matches the surface.
    Suboptimal,
    /// Nothing was drawn; resize before the next frame.
    OutOfDate,
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

fn create_framebuffer(
    device: &Arc<Device>,
    render_pass: &RenderPass,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<Framebuffer, CreateRenderTargetsError> {
    let color = Texture::new(
        device,
        &TextureDesc::new(
            extent.width,
            extent.height,
            format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        ),
        Some("scene color"),
    )?;
    let depth = Texture::new(
        device,
        &TextureDesc::new(
            extent.width,
            extent.height,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ),
        Some("scene depth"),
    )?;
    Ok(Framebuffer::new(
        device,
        render_pass,
        color,
        Some(depth),
        Some("scene framebuffer"),
    )?)
}

pub struct Renderer<T: HasDisplayHandle + HasWindowHandle> {
    device: Arc<Device>,
    config: RendererConfig,
    backbuffer: Backbuffer<T>,
    render_pass: Arc<RenderPass>,
    framebuffer: Framebuffer,
    layouts: DescriptorLayoutManager,
    descriptors: DescriptorAllocator,
    pipeline_layout: Arc<PipelineLayout>,
    pipelines: MultiPipeline<DevicePipelineFactory<GlslangCompiler>>,
    ring: RingBuffer,
    camera_buffer: Buffer,
    light_buffer: Buffer,
    vertex_set: DescriptorSet,
    fragment_set: DescriptorSet,
    light_set: DescriptorSet,
    frame_fence: Fence,
    semaphores: FrameSemaphores,
    /// The last submitted frame's commands, kept until its fence signals.
    in_flight: Option<CommandBuffer>,
    frame_index: u64,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Renderer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backbuffer", &self.backbuffer)
            .field("pipelines", &self.pipelines)
            .field("frame_index", &self.frame_index)
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Renderer<T> {
    /// Build the backbuffer, render targets, layouts and scene pipelines.
    ///
    /// Every shader variant is compiled (or loaded from the cache) here.
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        config: &RendererConfig,
        extent: vk::Extent2D,
    ) -> Result<Self, CreateRendererError> {
        let backbuffer = Backbuffer::new(
            device,
            surface,
            &BackbufferDesc {
                extent,
                image_count: config.backbuffer_count,
                vsync: config.vsync,
                preferred_format: config.backbuffer_format.map(|f| f.to_vk()),
            },
        )?;

        let render_pass = Arc::new(RenderPass::new(
            device,
            RenderPassDesc {
                color_format: backbuffer.format(),
                depth_format: Some(DEPTH_FORMAT),
                clear: ClearType::ALL,
            },
            Some("scene pass"),
        )?);
        let framebuffer =
            create_framebuffer(device, &render_pass, backbuffer.format(), backbuffer.extent())?;

        let layouts = DescriptorLayoutManager::new(device)?;
        let pipeline_layout = Arc::new(PipelineLayout::new(
            device,
            &[
                &layouts.vertex_shader,
                &layouts.fragment_shader,
                &layouts.all_shaders,
                &layouts.diffuse,
            ],
            &[],
            Some("scene pipeline layout"),
        )?);

        let cache = Arc::new(ShaderCache::new(
            &config.shader_source_dir,
            &config.shader_cache_dir,
            GlslangCompiler::new(&config.shader_compiler),
        ));
        let factory = DevicePipelineFactory::new(
            device,
            cache,
            Arc::clone(&render_pass),
            Arc::clone(&pipeline_layout),
            VertexLayout::standard(),
            "scene pipeline",
        );
        let pipelines = MultiPipeline::new(factory, &scene_pipeline_desc())?;

        let ring = RingBuffer::new(
            device,
            config.ring_buffer_size,
            Some("frame ring"),
        )?;
        let uniform = |size, name| {
            Buffer::new(
                device,
                &BufferDesc::empty(BufferType::Dynamic, vk::BufferUsageFlags::UNIFORM_BUFFER, size),
                Some(name),
            )
        };
        let camera_buffer = uniform(uniform_size::<CameraUniforms>(), "camera uniforms")?;
        let light_buffer = uniform(uniform_size::<LightUniforms>(), "light uniforms")?;

        let descriptors = DescriptorAllocator::new(device, config.descriptor_limits)?;
        let vertex_set = descriptors.allocate(&layouts.vertex_shader)?;
        let fragment_set = descriptors.allocate(&layouts.fragment_shader)?;
        let light_set = descriptors.allocate(&layouts.all_shaders)?;
        // SAFETY: every buffer is live, carries UNIFORM_BUFFER usage and is at
        // least as large as the range written; no set is in use yet.
        unsafe {
            vertex_set.write_buffer(
                0,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                &ring,
                0,
                uniform_size::<ObjectUniforms>(),
            );
            vertex_set.write_buffer(
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
                &camera_buffer,
                0,
                uniform_size::<CameraUniforms>(),
            );
            fragment_set.write_buffer(
                0,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                &ring,
                0,
                uniform_size::<MaterialUniforms>(),
            );
            light_set.write_buffer(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                &light_buffer,
                0,
                uniform_size::<LightUniforms>(),
            );
        }

        let frame_fence = Fence::new(device, true, Some("frame fence"))?;
        let semaphores = FrameSemaphores::new(device)?;

        tracing::info!(
            "Renderer ready: {}x{} backbuffer, {} byte ring",
            backbuffer.extent().width,
            backbuffer.extent().height,
            config.ring_buffer_size
        );

        Ok(Self {
            device: Arc::clone(device),
            config: config.clone(),
            backbuffer,
            render_pass,
            framebuffer,
            layouts,
            descriptors,
            pipeline_layout,
            pipelines,
            ring,
            camera_buffer,
            light_buffer,
            vertex_set,
            fragment_set,
            light_set,
            frame_fence,
            semaphores,
            in_flight: None,
            frame_index: 0,
        })
    }

    /// Render and present one frame.
    ///
    /// On failure the frame is dropped and any acquired backbuffer image is
    /// reclaimed by rebuilding the swapchain; the caller logs and carries on.
    pub fn render_frame(
        &mut self,
        camera: &CameraUniforms,
        light: &LightUniforms,
        draws: &[DrawItem<'_>],
    ) -> Result<FrameStatus, RenderFrameError> {
        let _span = tracing::debug_span!("frame", index = self.frame_index).entered();
        let result = self.try_render_frame(camera, light, draws);
        if result.is_err() && self.backbuffer.current_index().is_some() {
            let extent = self.backbuffer.extent();
            if let Err(e) = self.resize(extent) {
                tracing::error!("Failed to recover from a failed frame: {e}");
            }
        }
        self.frame_index += 1;
        result
    }

    fn try_render_frame(
        &mut self,
        camera: &CameraUniforms,
        light: &LightUniforms,
        draws: &[DrawItem<'_>],
    ) -> Result<FrameStatus, RenderFrameError> {
        if self.frame_fence.is_submitted() {
            self.ring.mark_finished_frame(&self.frame_fence)?;
            // SAFETY: the wait above returned, so the fence is not pending.
            unsafe { self.frame_fence.reset() }.map_err(RenderFrameError::ResetFence)?;
        } else {
            // The last frame never reached submission.
            self.ring.mark_finished_frame_unchecked();
        }
        self.in_flight = None;

        self.camera_buffer.write_pod(std::slice::from_ref(camera), 0)?;
        self.light_buffer.write_pod(std::slice::from_ref(light), 0)?;

        let acquired = match self
            .backbuffer
            .acquire_next_image(Some(&self.semaphores.image_acquired))
        {
            Ok(acquired) => acquired,
            Err(AcquireImageError::OutOfDate) => return Ok(FrameStatus::OutOfDate),
            Err(e) => return Err(e.into()),
        };

        let mut cmd = CommandBuffer::new(&self.device, QueueType::Graphics, Some("frame"))?;
        cmd.begin()?;
        self.record_scene(&mut cmd, draws)?;
        cmd.copy_texture_to_backbuffer(self.framebuffer.color_mut(), &mut self.backbuffer)?;
        cmd.end()?;

        self.device.execute(
            QueueType::Graphics,
            &mut cmd,
            &[(
                self.semaphores.image_acquired.raw_semaphore(),
                vk::PipelineStageFlags2::ALL_TRANSFER,
            )],
            Some(self.semaphores.render_finished.raw_semaphore()),
            Some(&mut self.frame_fence),
        )?;
        self.in_flight = Some(cmd);

        let suboptimal = match self
            .backbuffer
            .present(Some(&self.semaphores.render_finished))
        {
            Ok(suboptimal) => suboptimal,
            Err(PresentError::OutOfDate) => return Ok(FrameStatus::OutOfDate),
            Err(e) => return Err(e.into()),
        };
        Ok(if suboptimal || acquired.suboptimal {
            FrameStatus::Suboptimal
        } else {
            FrameStatus::Presented
        })
    }

    fn record_scene(
        &mut self,
        cmd: &mut CommandBuffer,
        draws: &[DrawItem<'_>],
    ) -> Result<(), RenderFrameError> {
        let extent = self.framebuffer.extent();
        cmd.begin_render_pass(
            &self.render_pass,
            &mut self.framebuffer,
            self.config.clear_color,
            1.0,
        );
        cmd.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.set_scissor(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        });
        cmd.bind_descriptor_set(
            vk::PipelineBindPoint::GRAPHICS,
            &self.pipeline_layout,
            SET_LIGHT,
            &self.light_set,
            None,
        );

        for draw in draws {
            let (Some(object_offset), Some(material_offset)) = (
                self.ring.write_pod(&draw.object),
                self.ring.write_pod(&draw.material),
            ) else {
                tracing::warn!("Skipping draw: frame ring is out of space");
                continue;
            };

            let pipeline = self
                .pipelines
                .get_pipeline_with_shaders(&draw.combination())?;
            cmd.bind_pipeline(pipeline);
            cmd.bind_descriptor_set(
                vk::PipelineBindPoint::GRAPHICS,
                &self.pipeline_layout,
                SET_VERTEX,
                &self.vertex_set,
                Some(object_offset),
            );
            cmd.bind_descriptor_set(
                vk::PipelineBindPoint::GRAPHICS,
                &self.pipeline_layout,
                SET_FRAGMENT,
                &self.fragment_set,
                Some(material_offset),
            );
            if let Some(set) = draw.diffuse.and_then(Texture::descriptor_set) {
                cmd.bind_descriptor_set(
                    vk::PipelineBindPoint::GRAPHICS,
                    &self.pipeline_layout,
                    SET_DIFFUSE,
                    set,
                    None,
                );
            }
            cmd.bind_vertex_buffer(&draw.mesh.vertices);
            cmd.bind_index_buffer(&draw.mesh.indices);
            cmd.draw_indexed(draw.mesh.index_count);
        }

        cmd.end_render_pass(&mut self.framebuffer);
        Ok(())
    }

    /// Rebuild the backbuffer and render targets at `extent`.
    ///
    /// Blocks until the device is idle.
    pub fn resize(&mut self, extent: vk::Extent2D) -> Result<(), ResizeError> {
        self.device.wait_idle().map_err(ResizeError::WaitIdle)?;
        self.in_flight = None;
        self.backbuffer.resize(extent)?;

        let extent = self.backbuffer.extent();
        if extent != self.framebuffer.extent() {
            self.framebuffer = create_framebuffer(
                &self.device,
                &self.render_pass,
                self.backbuffer.format(),
                extent,
            )?;
        }
        // A failed frame may have left image_acquired signalled.
        self.semaphores = FrameSemaphores::new(&self.device)?;
        tracing::debug!("Renderer resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Where textures sampled by the scene get their descriptor sets.
    pub fn texture_descriptor(&self) -> TextureDescriptor<'_> {
        TextureDescriptor {
            allocator: &self.descriptors,
            layout: &self.layouts.diffuse,
        }
    }

    /// Build every pipeline variant up front instead of on first use.
    pub fn warm_pipelines(&mut self) -> Result<(), CreateMultiPipelineError<DevicePipelineError>> {
        for textured in 0..=1 {
            for lit in 0..=1 {
                let combination = ShaderCombination::new().with(
                    ShaderStage::Fragment,
                    vec![
                        ShaderMacro::new(macros::HAS_TEXTURE, textured),
                        ShaderMacro::new(macros::HAS_NORMAL, lit),
                    ],
                );
                self.pipelines.get_pipeline_with_shaders(&combination)?;
            }
        }
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.backbuffer.extent()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Renderer<T> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle while dropping renderer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_match_std140_sizes() {
        assert_eq!(uniform_size::<CameraUniforms>(), 80);
        assert_eq!(uniform_size::<LightUniforms>(), 32);
        assert_eq!(uniform_size::<ObjectUniforms>(), 64);
        assert_eq!(uniform_size::<MaterialUniforms>(), 16);
    }

    #[test]
    fn scene_pipeline_declares_four_fragment_variants() {
        use crate::multi_pipeline::combination_count;

        let limits = [
            MacroLimit::new(macros::HAS_TEXTURE, 1),
            MacroLimit::new(macros::HAS_NORMAL, 1),
        ];
        assert_eq!(combination_count(&limits), 4);
        // Building the desc must not panic or reorder the required stages.
        let _ = scene_pipeline_desc();
    }
}
