//! The quad renderer.
//!
//! Owns everything that survives swapchain rebuilds: the render pass, the
//! pipeline and the geometry. Framebuffers come from the live swapchain
//! generation at record time.

use ash::vk;
use vkquad_core::{QUAD_INDEX_COUNT, QUAD_INDICES, QUAD_INSTANCE_COUNT, QUAD_VERTICES};
use vkquad_gpu::command::{begin_command_buffer, end_command_buffer, CommandPool};
use vkquad_gpu::error::Result;
use vkquad_gpu::memory::{GpuAllocator, GpuBuffer};
use vkquad_gpu::pipeline::{GraphicsPipeline, GraphicsPipelineConfig, RenderPass};

/// Viewport covering the whole extent with the standard depth range.
#[allow(clippy::cast_precision_loss)]
pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering the whole extent.
pub fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

pub const fn clear_value(color: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }
}

/// Draws the hard-coded quad.
pub struct QuadRenderer {
    render_pass: RenderPass,
    pipeline: GraphicsPipeline,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    clear_color: [f32; 4],
}

impl QuadRenderer {
    /// Create the pipeline for `color_format` and upload the quad.
    ///
    /// # Safety
    /// The device must be valid and `pool` must belong to `queue`'s family.
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        pool: &CommandPool,
        queue: vk::Queue,
        color_format: vk::Format,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let render_pass = unsafe { RenderPass::new(device, color_format)? };

        let config = GraphicsPipelineConfig {
            vertex_shader: vkquad_shaders::quad_vertex_shader().to_vec(),
            fragment_shader: vkquad_shaders::quad_fragment_shader().to_vec(),
            ..Default::default()
        };
        let pipeline = unsafe { GraphicsPipeline::new(device, &config, render_pass.render_pass) }
            .inspect_err(|_| unsafe { render_pass.destroy(device) })?;

        let release_pipeline = || unsafe {
            pipeline.destroy(device);
            render_pass.destroy(device);
        };

        let mut vertex_buffer = unsafe {
            allocator.create_buffer_with_data(
                pool,
                queue,
                &QUAD_VERTICES,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                "quad vertices",
            )
        }
        .inspect_err(|_| release_pipeline())?;

        let index_buffer = match unsafe {
            allocator.create_buffer_with_data(
                pool,
                queue,
                &QUAD_INDICES,
                vk::BufferUsageFlags::INDEX_BUFFER,
                "quad indices",
            )
        } {
            Ok(buffer) => buffer,
            Err(e) => {
                if let Err(free_err) = allocator.free_buffer(&mut vertex_buffer) {
                    tracing::warn!("Failed to free vertex buffer: {}", free_err);
                }
                release_pipeline();
                return Err(e);
            }
        };

        tracing::info!(
            "Quad renderer ready ({} vertices, {} indices)",
            QUAD_VERTICES.len(),
            QUAD_INDEX_COUNT
        );

        Ok(Self {
            render_pass,
            pipeline,
            vertex_buffer,
            index_buffer,
            clear_color,
        })
    }

    /// The render pass framebuffers must be compatible with.
    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.render_pass
    }

    /// Format the render pass was built for.
    pub const fn color_format(&self) -> vk::Format {
        self.render_pass.color_format
    }

    pub const fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Reset `cmd` and record one frame of the quad into `framebuffer`.
    ///
    /// # Safety
    /// `cmd` must not be pending and `framebuffer` must belong to the live
    /// swapchain generation.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> Result<()> {
        unsafe {
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::empty())?;

            let clear_values = [clear_value(self.clear_color)];
            let render_pass_begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(scissor_for(extent))
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_set_viewport(cmd, 0, &[viewport_for(extent)]);
            device.cmd_set_scissor(cmd, 0, &[scissor_for(extent)]);
            device.cmd_draw_indexed(cmd, QUAD_INDEX_COUNT, QUAD_INSTANCE_COUNT, 0, 0, 0);
            device.cmd_end_render_pass(cmd);

            end_command_buffer(device, cmd)
        }
    }

    /// Destroy the pipeline, render pass and geometry.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device, allocator: &mut GpuAllocator) {
        if let Err(e) = allocator.free_buffer(&mut self.vertex_buffer) {
            tracing::warn!("Failed to free vertex buffer: {}", e);
        }
        if let Err(e) = allocator.free_buffer(&mut self.index_buffer) {
            tracing::warn!("Failed to free index buffer: {}", e);
        }
        unsafe {
            self.pipeline.destroy(device);
            self.render_pass.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn viewport_covers_extent() {
        let viewport = viewport_for(EXTENT);
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn scissor_covers_extent() {
        let scissor = scissor_for(EXTENT);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
        assert_eq!(scissor.extent, EXTENT);
    }

    #[test]
    fn clear_value_carries_color() {
        let value = clear_value([0.1, 0.2, 0.3, 1.0]);
        // SAFETY: constructed through the color member
        let color = unsafe { value.color.float32 };
        assert_eq!(color, [0.1, 0.2, 0.3, 1.0]);
    }
}
