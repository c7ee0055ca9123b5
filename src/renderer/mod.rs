mod allocator;
pub mod vulkan;

use crate::{RendererError, RendererResult};
use ash::{vk, Device, Instance};
use imgui::{
    internal::RawWrapper, Context, DrawCmd, DrawCmdParams, DrawData, TextureId, Textures,
};
use mesh::*;
use ultraviolet::projection::orthographic_vk;
use vulkan::*;

use self::allocator::Allocator;

/// Texture id imgui uses to reference the fonts atlas.
const FONTS_TEXTURE_ID: usize = usize::MAX;

/// Vulkan renderer for imgui.
///
/// It records rendering command to the provided command buffer at each call to [`cmd_draw`].
/// When done with the renderer you should call [`destroy`] before droping it to release all
/// Vulkan resources held by the renderer.
///
/// The renderer does not own a descriptor pool. Descriptor sets (the fonts atlas one included)
/// are allocated from the pool passed at creation, which must allow freeing individual sets.
///
/// The renderer holds one set of vertex/index buffers per swapchain image, selected by the frame
/// index passed to [`cmd_draw`]. Buffers are grown when draw data does not fit.
///
/// [`cmd_draw`]: #method.cmd_draw
/// [`destroy`]: #method.destroy
pub struct Renderer {
    device: Device,
    allocator: Allocator,
    descriptor_pool: vk::DescriptorPool,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    fonts: Option<Fonts>,
    font_upload: Option<StagingBuffer>,
    textures: Textures<vk::DescriptorSet>,
    min_image_count: u32,
    meshes: Vec<Option<Mesh>>,
    destroyed: bool,
}

struct Fonts {
    texture: Texture,
    descriptor_set: vk::DescriptorSet,
}

impl Renderer {
    /// Initialize and return a new instance of the renderer.
    ///
    /// Pipeline and descriptor set layout are created here. The fonts texture is not: record its
    /// upload with [`cmd_upload_fonts`] before the first frame.
    ///
    /// # Arguments
    ///
    /// * `instance` - A reference to a Vulkan instance.
    /// * `physical_device` - A Vulkan physical device.
    /// * `device` - A Vulkan device.
    /// * `descriptor_pool` - The pool descriptor sets are allocated from.
    /// * `render_pass` - The render pass used to render the gui.
    /// * `min_image_count` - The minimum image count of the swapchain.
    ///
    /// # Errors
    ///
    /// * [`RendererError`] - If the min image count is zero.
    /// * [`RendererError`] - If any Vulkan or io error is encountered during initialization.
    ///
    /// [`cmd_upload_fonts`]: #method.cmd_upload_fonts
    pub fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
        descriptor_pool: vk::DescriptorPool,
        render_pass: vk::RenderPass,
        min_image_count: u32,
    ) -> RendererResult<Self> {
        check_min_image_count(min_image_count)?;

        // Descriptor set layout
        let descriptor_set_layout = create_vulkan_descriptor_set_layout(&device)?;

        // Pipeline and layout
        let pipeline_layout = create_vulkan_pipeline_layout(&device, descriptor_set_layout)?;
        let pipeline = create_vulkan_pipeline(&device, pipeline_layout, render_pass)?;

        let allocator = Allocator::new(instance, physical_device);

        Ok(Self {
            device,
            allocator,
            descriptor_pool,
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
            fonts: None,
            font_upload: None,
            textures: Textures::new(),
            min_image_count,
            meshes: Vec::new(),
            destroyed: false,
        })
    }

    /// Record the upload of the imgui fonts atlas into `command_buffer`.
    ///
    /// The staging buffer used for the copy stays alive until [`destroy_font_upload_objects`]
    /// is called, which must happen once the command buffer has finished executing.
    ///
    /// # Errors
    ///
    /// * [`RendererError`] - If the fonts were already uploaded.
    /// * [`RendererError`] - If any Vulkan error is encountered during command recording.
    ///
    /// [`destroy_font_upload_objects`]: #method.destroy_font_upload_objects
    pub fn cmd_upload_fonts(
        &mut self,
        command_buffer: vk::CommandBuffer,
        imgui: &mut Context,
    ) -> RendererResult<()> {
        if self.destroyed {
            return Err(RendererError::Destroyed);
        }
        if self.fonts.is_some() || self.font_upload.is_some() {
            return Err(RendererError::Init("Fonts texture was already uploaded".into()));
        }

        let fonts = imgui.fonts();
        let atlas_texture = fonts.build_rgba32_texture();
        log::debug!(
            "Recording fonts texture upload ({}x{})",
            atlas_texture.width,
            atlas_texture.height
        );

        let (texture, staging) = Texture::cmd_from_rgba(
            &self.device,
            &mut self.allocator,
            command_buffer,
            atlas_texture.width,
            atlas_texture.height,
            atlas_texture.data,
        )?;

        let descriptor_set = create_vulkan_descriptor_set(
            &self.device,
            self.descriptor_set_layout,
            self.descriptor_pool,
            texture.image_view,
            texture.sampler,
        )?;

        fonts.tex_id = TextureId::from(FONTS_TEXTURE_ID);
        self.fonts = Some(Fonts {
            texture,
            descriptor_set,
        });
        self.font_upload = Some(staging);

        Ok(())
    }

    /// Release the staging objects of the fonts upload.
    ///
    /// Calling it when nothing is pending does nothing.
    pub fn destroy_font_upload_objects(&mut self) -> RendererResult<()> {
        if let Some(staging) = self.font_upload.take() {
            log::debug!("Destroying fonts upload objects");
            staging.destroy(&self.device, &mut self.allocator)?;
        }
        Ok(())
    }

    /// Change the render pass to render to.
    ///
    /// Useful if you need to render to a new render pass but don't want to rebuild
    /// the entire renderer. It will rebuild the graphics pipeline from scratch so it
    /// is an expensive operation.
    ///
    /// # Errors
    ///
    /// * [`RendererError`] - If any Vulkan error is encountered during pipeline creation.
    /// * [`RendererError`] - If the method is call after [`destroy`] was called.
    ///
    /// [`destroy`]: #method.destroy
    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass) -> RendererResult<()> {
        if self.destroyed {
            return Err(RendererError::Destroyed);
        }

        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
        self.pipeline = create_vulkan_pipeline(&self.device, self.pipeline_layout, render_pass)?;
        Ok(())
    }

    /// Tell the renderer the swapchain is about to be created with a new min image count.
    ///
    /// Per-frame buffers are released and re-created lazily by [`cmd_draw`]. The device must be
    /// idle.
    ///
    /// [`cmd_draw`]: #method.cmd_draw
    pub fn set_min_image_count(&mut self, min_image_count: u32) -> RendererResult<()> {
        if self.destroyed {
            return Err(RendererError::Destroyed);
        }
        check_min_image_count(min_image_count)?;

        if self.min_image_count != min_image_count {
            log::debug!(
                "Min image count changed from {} to {}",
                self.min_image_count,
                min_image_count
            );
            self.destroy_meshes()?;
            self.min_image_count = min_image_count;
        }
        Ok(())
    }

    /// Returns the texture mapping used by the renderer to lookup textures.
    ///
    /// Textures are provided by the application as `vk::DescriptorSet`s.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let descriptor_set = ...;
    /// // Insert a vk::DescriptorSet in the renderer textures map.
    /// // The renderer returns a generated texture id.
    /// let texture_id = renderer.textures().insert(descriptor_set);
    /// ...
    /// // Create an `Image` that references the texture by its id.
    /// Image::new(texture_id, [100, 100]).build(&ui);
    /// ```
    ///
    /// # Caveat
    ///
    /// Provided `vk::DescriptorSet`s must be created with a descriptor set layout that is compatible with the one used by the renderer.
    /// See [Pipeline Layout Compatibility](https://www.khronos.org/registry/vulkan/specs/1.2-extensions/html/vkspec.html#descriptorsets-compatibility).
    pub fn textures(&mut self) -> &mut Textures<vk::DescriptorSet> {
        &mut self.textures
    }

    fn lookup_descriptor_set(&self, texture_id: TextureId) -> RendererResult<vk::DescriptorSet> {
        if texture_id.id() == FONTS_TEXTURE_ID {
            self.fonts
                .as_ref()
                .map(|fonts| fonts.descriptor_set)
                .ok_or(RendererError::BadTexture(texture_id))
        } else if let Some(descriptor_set) = self.textures.get(texture_id) {
            Ok(*descriptor_set)
        } else {
            Err(RendererError::BadTexture(texture_id))
        }
    }

    /// Record commands required to render the gui.
    ///
    /// # Arguments
    ///
    /// * `command_buffer` - The Vulkan command buffer that command will be recorded to.
    /// * `draw_data` - A reference to the imgui `DrawData` containing rendering data.
    /// * `frame_index` - Index of the swapchain image the commands render to. Its vertex and
    ///   index buffers must not be in use by the gpu.
    ///
    /// # Errors
    ///
    /// * [`RendererError`] - If any Vulkan error is encountered during command recording.
    /// * [`RendererError`] - If the method is call after [`destroy`] was called.
    ///
    /// [`destroy`]: #method.destroy
    pub fn cmd_draw(
        &mut self,
        command_buffer: vk::CommandBuffer,
        draw_data: &DrawData,
        frame_index: usize,
    ) -> RendererResult<()> {
        if self.destroyed {
            return Err(RendererError::Destroyed);
        }

        if draw_data.total_vtx_count == 0 {
            return Ok(());
        }

        if self.meshes.len() <= frame_index {
            self.meshes.resize_with(frame_index + 1, || None);
        }
        let mesh = match &mut self.meshes[frame_index] {
            Some(mesh) => {
                mesh.update(&self.device, &mut self.allocator, draw_data)?;
                mesh
            }
            slot => slot.insert(Mesh::new(&self.device, &mut self.allocator, draw_data)?),
        };
        let (vertices, indices) = (mesh.vertices, mesh.indices);

        let device = &self.device;
        unsafe {
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            )
        };

        let framebuffer_width = draw_data.framebuffer_scale[0] * draw_data.display_size[0];
        let framebuffer_height = draw_data.framebuffer_scale[1] * draw_data.display_size[1];
        let viewports = [vk::Viewport {
            width: framebuffer_width,
            height: framebuffer_height,
            max_depth: 1.0,
            ..Default::default()
        }];

        unsafe { device.cmd_set_viewport(command_buffer, 0, &viewports) };

        // Ortho projection
        let projection = orthographic_vk(
            0.0,
            draw_data.display_size[0],
            0.0,
            -draw_data.display_size[1],
            -1.0,
            1.0,
        );
        unsafe {
            let push = any_as_u8_slice(&projection);
            device.cmd_push_constants(
                command_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                push,
            )
        };

        unsafe {
            device.cmd_bind_index_buffer(command_buffer, indices, 0, vk::IndexType::UINT16);
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertices], &[0]);
        };

        let mut index_offset = 0;
        let mut vertex_offset = 0;
        let mut current_texture_id: Option<TextureId> = None;
        let clip_offset = draw_data.display_pos;
        let clip_scale = draw_data.framebuffer_scale;
        for draw_list in draw_data.draw_lists() {
            for command in draw_list.commands() {
                match command {
                    DrawCmd::Elements {
                        count,
                        cmd_params:
                            DrawCmdParams {
                                clip_rect,
                                texture_id,
                                vtx_offset,
                                idx_offset,
                            },
                    } => {
                        let scissor = match scissor_from_clip_rect(
                            clip_rect,
                            clip_offset,
                            clip_scale,
                            [framebuffer_width, framebuffer_height],
                        ) {
                            Some(scissor) => scissor,
                            None => continue,
                        };
                        unsafe { device.cmd_set_scissor(command_buffer, 0, &[scissor]) };

                        if Some(texture_id) != current_texture_id {
                            let descriptor_set = self.lookup_descriptor_set(texture_id)?;
                            unsafe {
                                device.cmd_bind_descriptor_sets(
                                    command_buffer,
                                    vk::PipelineBindPoint::GRAPHICS,
                                    self.pipeline_layout,
                                    0,
                                    &[descriptor_set],
                                    &[],
                                )
                            };
                            current_texture_id = Some(texture_id);
                        }

                        unsafe {
                            device.cmd_draw_indexed(
                                command_buffer,
                                count as _,
                                1,
                                index_offset + idx_offset as u32,
                                vertex_offset + vtx_offset as i32,
                                0,
                            )
                        };
                    }
                    DrawCmd::ResetRenderState => {
                        log::trace!("Reset render state command ignored")
                    }
                    DrawCmd::RawCallback { callback, raw_cmd } => unsafe {
                        callback(draw_list.raw(), raw_cmd)
                    },
                }
            }

            index_offset += draw_list.idx_buffer().len() as u32;
            vertex_offset += draw_list.vtx_buffer().len() as i32;
        }

        Ok(())
    }

    fn destroy_meshes(&mut self) -> RendererResult<()> {
        for mesh in self.meshes.drain(..).flatten() {
            mesh.destroy(&self.device, &mut self.allocator)?;
        }
        Ok(())
    }

    /// Destroy Vulkan resources held by the renderer.
    ///
    /// The fonts descriptor set is freed back to the shared pool. The device must be idle.
    ///
    /// # Errors
    ///
    /// * [`RendererError`] - If the method is call after [`destroy`] was called.
    ///
    /// [`destroy`]: #method.destroy
    pub fn destroy(&mut self) -> RendererResult<()> {
        if self.destroyed {
            return Err(RendererError::Destroyed);
        }
        log::debug!("Destroying imgui renderer");

        self.destroy_meshes()?;
        self.destroy_font_upload_objects()?;
        if let Some(fonts) = self.fonts.take() {
            free_vulkan_descriptor_set(&self.device, self.descriptor_pool, fonts.descriptor_set)?;
            fonts.texture.destroy(&self.device, &mut self.allocator)?;
        }
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
        self.destroyed = true;

        Ok(())
    }
}

fn check_min_image_count(min_image_count: u32) -> RendererResult<()> {
    if min_image_count == 0 {
        return Err(RendererError::Init(String::from(
            "'min_image_count' parameter should be at least one",
        )));
    }
    Ok(())
}

/// Convert an imgui clip rectangle to a framebuffer scissor.
///
/// Returns `None` when nothing of the rectangle lies inside the framebuffer.
fn scissor_from_clip_rect(
    clip_rect: [f32; 4],
    clip_offset: [f32; 2],
    clip_scale: [f32; 2],
    framebuffer_size: [f32; 2],
) -> Option<vk::Rect2D> {
    let min_x = ((clip_rect[0] - clip_offset[0]) * clip_scale[0]).max(0.0);
    let min_y = ((clip_rect[1] - clip_offset[1]) * clip_scale[1]).max(0.0);
    let max_x = ((clip_rect[2] - clip_offset[0]) * clip_scale[0]).min(framebuffer_size[0]);
    let max_y = ((clip_rect[3] - clip_offset[1]) * clip_scale[1]).min(framebuffer_size[1]);

    if max_x <= min_x || max_y <= min_y {
        return None;
    }

    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x as i32,
            y: min_y as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        },
    })
}

mod mesh {

    use super::allocator::{Allocate, Allocator, Memory};
    use super::vulkan::*;
    use crate::RendererResult;
    use ash::{vk, Device};
    use imgui::{DrawData, DrawIdx, DrawVert};
    use std::mem::size_of;

    /// Vertex and index buffer resources for one swapchain image.
    pub struct Mesh {
        pub vertices: vk::Buffer,
        vertices_mem: Memory,
        vertex_count: usize,
        pub indices: vk::Buffer,
        indices_mem: Memory,
        index_count: usize,
    }

    impl Mesh {
        pub fn new(
            device: &Device,
            allocator: &mut Allocator,
            draw_data: &DrawData,
        ) -> RendererResult<Self> {
            let vertices = create_vertices(draw_data);
            let vertex_count = vertices.len();
            let indices = create_indices(draw_data);
            let index_count = indices.len();

            // Create a vertex buffer
            let (vertices, vertices_mem) = create_and_fill_buffer(
                device,
                allocator,
                &vertices,
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )?;

            // Create an index buffer
            let (indices, indices_mem) = create_and_fill_buffer(
                device,
                allocator,
                &indices,
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?;

            Ok(Mesh {
                vertices,
                vertices_mem,
                vertex_count,
                indices,
                indices_mem,
                index_count,
            })
        }

        pub fn update(
            &mut self,
            device: &Device,
            allocator: &mut Allocator,
            draw_data: &DrawData,
        ) -> RendererResult<()> {
            let vertices = create_vertices(draw_data);
            if vertices.len() > self.vertex_count {
                log::trace!("Resizing vertex buffers");

                let vertex_count = vertices.len();
                let size = vertex_count * size_of::<DrawVert>();
                let (buffer, memory) =
                    allocator.create_buffer(device, size, vk::BufferUsageFlags::VERTEX_BUFFER)?;

                let old_buffer = std::mem::replace(&mut self.vertices, buffer);
                let old_memory = std::mem::replace(&mut self.vertices_mem, memory);
                allocator.destroy_buffer(device, old_buffer, old_memory)?;
                self.vertex_count = vertex_count;
            }
            allocator.update_buffer(device, &mut self.vertices_mem, &vertices)?;

            let indices = create_indices(draw_data);
            if indices.len() > self.index_count {
                log::trace!("Resizing index buffers");

                let index_count = indices.len();
                let size = index_count * size_of::<DrawIdx>();
                let (buffer, memory) =
                    allocator.create_buffer(device, size, vk::BufferUsageFlags::INDEX_BUFFER)?;

                let old_buffer = std::mem::replace(&mut self.indices, buffer);
                let old_memory = std::mem::replace(&mut self.indices_mem, memory);
                allocator.destroy_buffer(device, old_buffer, old_memory)?;
                self.index_count = index_count;
            }
            allocator.update_buffer(device, &mut self.indices_mem, &indices)?;

            Ok(())
        }

        pub fn destroy(self, device: &Device, allocator: &mut Allocator) -> RendererResult<()> {
            allocator.destroy_buffer(device, self.vertices, self.vertices_mem)?;
            allocator.destroy_buffer(device, self.indices, self.indices_mem)?;
            Ok(())
        }
    }

    fn create_vertices(draw_data: &DrawData) -> Vec<DrawVert> {
        let vertex_count = draw_data.total_vtx_count as usize;
        let mut vertices = Vec::with_capacity(vertex_count);
        for draw_list in draw_data.draw_lists() {
            vertices.extend_from_slice(draw_list.vtx_buffer());
        }
        vertices
    }

    fn create_indices(draw_data: &DrawData) -> Vec<DrawIdx> {
        let index_count = draw_data.total_idx_count as usize;
        let mut indices = Vec::with_capacity(index_count);
        for draw_list in draw_data.draw_lists() {
            indices.extend_from_slice(draw_list.idx_buffer());
        }
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scissor_is_scaled_and_offset() {
        let scissor =
            scissor_from_clip_rect([10.0, 20.0, 110.0, 70.0], [0.0, 0.0], [2.0, 2.0], [800.0, 600.0])
                .unwrap();

        assert_eq!(scissor.offset.x, 20);
        assert_eq!(scissor.offset.y, 40);
        assert_eq!(scissor.extent.width, 200);
        assert_eq!(scissor.extent.height, 100);
    }

    #[test]
    fn scissor_is_clamped_to_the_framebuffer() {
        let scissor = scissor_from_clip_rect(
            [-50.0, -10.0, 1000.0, 300.0],
            [0.0, 0.0],
            [1.0, 1.0],
            [800.0, 600.0],
        )
        .unwrap();

        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.offset.y, 0);
        assert_eq!(scissor.extent.width, 800);
        assert_eq!(scissor.extent.height, 300);
    }

    #[test]
    fn clip_rect_outside_the_framebuffer_is_skipped() {
        let scissor = scissor_from_clip_rect(
            [900.0, 0.0, 1000.0, 100.0],
            [0.0, 0.0],
            [1.0, 1.0],
            [800.0, 600.0],
        );
        assert!(scissor.is_none());
    }

    #[test]
    fn zero_min_image_count_is_rejected() {
        assert!(check_min_image_count(0).is_err());
        assert!(check_min_image_count(2).is_ok());
    }
}
