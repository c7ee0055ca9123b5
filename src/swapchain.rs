use crate::{
    premultiplied_clear_value, AppError, AppResult, FrameRing, VulkanContext, VSYNC,
};
use ash::{
    extensions::khr::{Surface, Swapchain as SwapchainLoader},
    vk, Device,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Image count requested when creating the swapchain.
pub const MIN_IMAGE_COUNT: u32 = 2;

/// Surface formats in order of preference, all in the sRGB non linear colour space.
pub const REQUESTED_SURFACE_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

/// Resources owned by one swapchain image.
pub struct Frame {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

/// Semaphores ordering the gpu work of one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSemaphores {
    pub image_acquired: vk::Semaphore,
    pub render_complete: vk::Semaphore,
}

/// The window surface and everything built on top of it.
///
/// Surface format and present mode are selected once, when the surface is created. Everything
/// else is recreated by [`WindowData::rebuild`].
pub struct WindowData {
    surface_loader: Surface,
    pub surface: vk::SurfaceKHR,
    pub(crate) swapchain_loader: SwapchainLoader,
    pub swapchain: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub render_pass: vk::RenderPass,
    pub frames: Vec<Frame>,
    pub semaphores: Vec<FrameSemaphores>,
    pub ring: FrameRing,
    pub clear_value: vk::ClearValue,
}

impl WindowData {
    /// Create the surface of a window and a swapchain of `width` x `height` pixels for it.
    ///
    /// # Errors
    ///
    /// * [`AppError::NoSurfaceSupport`] - If the selected queue family cannot present to the
    ///   surface. No other device is tried.
    /// * [`AppError::Vulkan`] - If any Vulkan call fails.
    pub fn new(
        context: &VulkanContext,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        min_image_count: u32,
        width: u32,
        height: u32,
    ) -> AppResult<Self> {
        log::debug!("Creating window surface");
        let surface_loader = Surface::new(&context.entry, &context.instance);
        let surface = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                display_handle,
                window_handle,
                None,
            )?
        };

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                context.physical_device,
                context.queue_family_index,
                surface,
            )
        };
        let (surface_format, present_mode) = match supported {
            Ok(true) => match query_surface(&surface_loader, context.physical_device, surface) {
                Ok(selection) => selection,
                Err(error) => {
                    unsafe { surface_loader.destroy_surface(surface, None) };
                    return Err(error);
                }
            },
            Ok(false) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(AppError::NoSurfaceSupport);
            }
            Err(error) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(error.into());
            }
        };
        log::debug!("Swapchain format: {:?}", surface_format);
        log::debug!("Swapchain present mode: {:?}", present_mode);

        let mut window_data = Self {
            surface_loader,
            surface,
            swapchain_loader: SwapchainLoader::new(&context.instance, &context.device),
            swapchain: vk::SwapchainKHR::null(),
            surface_format,
            present_mode,
            extent: vk::Extent2D::default(),
            min_image_count,
            render_pass: vk::RenderPass::null(),
            frames: Vec::new(),
            semaphores: Vec::new(),
            ring: FrameRing::new(0),
            clear_value: vk::ClearValue::default(),
        };
        window_data.create_swapchain(context, width, height)?;

        Ok(window_data)
    }

    pub fn image_count(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Set the colour the render pass clears to. The rgb components are premultiplied by alpha.
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_value = premultiplied_clear_value(color);
    }

    /// Recreate the swapchain and per image resources for a framebuffer of `width` x `height`.
    ///
    /// Waits for the device to be idle first. Frame and semaphore indices restart at 0.
    pub fn rebuild(
        &mut self,
        context: &VulkanContext,
        min_image_count: u32,
        width: u32,
        height: u32,
    ) -> AppResult<()> {
        log::debug!("Rebuilding the swapchain ({}x{})", width, height);
        context.wait_idle()?;

        self.destroy_frames(&context.device);
        self.min_image_count = min_image_count;
        self.create_swapchain(context, width, height)
    }

    fn create_swapchain(
        &mut self,
        context: &VulkanContext,
        width: u32,
        height: u32,
    ) -> AppResult<()> {
        log::debug!("Creating vulkan swapchain");
        let device = &context.device;
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, self.surface)?
        };

        let image_count = swapchain_min_image_count(self.min_image_count, &capabilities);
        let extent = swapchain_extent(&capabilities, width, height);
        log::debug!("Swapchain extent: {:?}", extent);

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(swapchain_pre_transform(&capabilities))
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        self.swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.extent = extent;

        let images = unsafe { self.swapchain_loader.get_swapchain_images(self.swapchain)? };
        log::debug!("Swapchain image count: {}", images.len());

        self.render_pass = create_vulkan_render_pass(device, self.surface_format.format)?;

        for image in images {
            let frame = Frame::new(
                device,
                context.queue_family_index,
                image,
                self.surface_format.format,
                self.render_pass,
                extent,
            )?;
            self.frames.push(frame);
        }

        for _ in 0..self.frames.len() {
            let semaphores = FrameSemaphores::new(device)?;
            self.semaphores.push(semaphores);
        }

        self.ring.reset(self.image_count());

        Ok(())
    }

    fn destroy_frames(&mut self, device: &Device) {
        unsafe {
            for frame in self.frames.drain(..) {
                frame.destroy(device);
            }
            for semaphores in self.semaphores.drain(..) {
                semaphores.destroy(device);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }

    /// Destroy the swapchain, its per image resources and the surface.
    ///
    /// The device must be idle.
    pub fn destroy(mut self, context: &VulkanContext) {
        log::debug!("Destroying swapchain and window surface");
        self.destroy_frames(&context.device);
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

impl Frame {
    fn new(
        device: &Device,
        queue_family_index: u32,
        image: vk::Image,
        format: vk::Format,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> AppResult<Self> {
        let command_pool = {
            let create_info =
                vk::CommandPoolCreateInfo::builder().queue_family_index(queue_family_index);
            unsafe { device.create_command_pool(&create_info, None)? }
        };

        let command_buffer = {
            let allocate_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            unsafe { device.allocate_command_buffers(&allocate_info)?[0] }
        };

        let fence = {
            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            unsafe { device.create_fence(&fence_info, None)? }
        };

        let image_view = {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::R,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::B,
                    a: vk::ComponentSwizzle::A,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { device.create_image_view(&create_info, None)? }
        };

        let framebuffer = {
            let attachments = [image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            unsafe { device.create_framebuffer(&framebuffer_info, None)? }
        };

        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            image,
            image_view,
            framebuffer,
        })
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_fence(self.fence, None);
        device.free_command_buffers(self.command_pool, &[self.command_buffer]);
        device.destroy_command_pool(self.command_pool, None);
        device.destroy_framebuffer(self.framebuffer, None);
        device.destroy_image_view(self.image_view, None);
    }
}

impl FrameSemaphores {
    fn new(device: &Device) -> AppResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe {
            let image_acquired = device.create_semaphore(&semaphore_info, None)?;
            let render_complete = device.create_semaphore(&semaphore_info, None)?;
            Ok(Self {
                image_acquired,
                render_complete,
            })
        }
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_semaphore(self.image_acquired, None);
        device.destroy_semaphore(self.render_complete, None);
    }
}

fn query_surface(
    surface_loader: &Surface,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> AppResult<(vk::SurfaceFormatKHR, vk::PresentModeKHR)> {
    let formats =
        unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface)? };
    let format = select_surface_format(
        &formats,
        &REQUESTED_SURFACE_FORMATS,
        vk::ColorSpaceKHR::SRGB_NONLINEAR,
    )
    .ok_or(AppError::NoSurfaceSupport)?;

    let present_modes = unsafe {
        surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
    };
    let present_mode = select_present_mode(&present_modes, &requested_present_modes(VSYNC));

    Ok((format, present_mode))
}

/// Present modes in order of preference.
pub fn requested_present_modes(vsync: bool) -> Vec<vk::PresentModeKHR> {
    if vsync {
        vec![vk::PresentModeKHR::FIFO]
    } else {
        vec![
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ]
    }
}

/// Pick the first requested format the surface supports with `color_space`.
///
/// A surface reporting a single `UNDEFINED` format accepts anything, the first requested one
/// is used. When nothing matches the first available format is used. Returns `None` only when
/// the surface reports no format.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    requested: &[vk::Format],
    color_space: vk::ColorSpaceKHR,
) -> Option<vk::SurfaceFormatKHR> {
    let first = *available.first()?;

    if available.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Some(vk::SurfaceFormatKHR {
            format: requested.first().copied().unwrap_or(first.format),
            color_space,
        });
    }

    let selected = requested
        .iter()
        .find_map(|format| {
            available
                .iter()
                .find(|available| available.format == *format && available.color_space == color_space)
        })
        .copied()
        .unwrap_or(first);
    Some(selected)
}

/// Pick the first requested present mode the surface supports, FIFO otherwise.
pub fn select_present_mode(
    available: &[vk::PresentModeKHR],
    requested: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    requested
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Requested image count raised to [`MIN_IMAGE_COUNT`] and the surface minimum, then clamped
/// to its maximum.
///
/// A maximum of 0 means no limit.
pub fn swapchain_min_image_count(requested: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = requested
        .max(MIN_IMAGE_COUNT)
        .max(capabilities.min_image_count);
    if capabilities.max_image_count != 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Identity when the surface supports it, the current transform of the surface otherwise.
pub fn swapchain_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

/// The current extent of the surface, or the framebuffer size when the surface lets the
/// swapchain decide.
pub fn swapchain_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width == u32::MAX {
        vk::Extent2D { width, height }
    } else {
        capabilities.current_extent
    }
}

fn create_vulkan_render_pass(device: &Device, format: vk::Format) -> AppResult<vk::RenderPass> {
    log::debug!("Creating vulkan render pass");
    let attachment_descs = [vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()];

    let color_attachment_refs = [vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build()];

    let subpass_descs = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)
        .build()];

    let subpass_deps = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build()];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachment_descs)
        .subpasses(&subpass_descs)
        .dependencies(&subpass_deps);

    Ok(unsafe { device.create_render_pass(&render_pass_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            ..Default::default()
        }
    }

    fn select(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
        select_surface_format(
            available,
            &REQUESTED_SURFACE_FORMATS,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )
    }

    #[test]
    fn preferred_surface_format_wins() {
        let available = [
            format(vk::Format::R8G8B8A8_SRGB),
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            select(&available).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );
    }

    #[test]
    fn surface_format_needs_the_requested_color_space() {
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
            format(vk::Format::R8G8B8_UNORM),
        ];
        assert_eq!(
            select(&available).map(|f| f.format),
            Some(vk::Format::R8G8B8_UNORM)
        );
    }

    #[test]
    fn undefined_surface_format_takes_the_first_request() {
        let available = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let selected = select(&available).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn unmatched_surface_format_falls_back_to_the_first_available() {
        let available = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32),
            format(vk::Format::R16G16B16A16_SFLOAT),
        ];
        assert_eq!(
            select(&available).map(|f| f.format),
            Some(vk::Format::A2B10G10R10_UNORM_PACK32)
        );
        assert!(select(&[]).is_none());
    }

    #[test]
    fn vsync_only_accepts_fifo() {
        let available = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(
            select_present_mode(&available, &requested_present_modes(true)),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn present_mode_preference_without_vsync() {
        let requested = requested_present_modes(false);
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            select_present_mode(&all, &requested),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&all[..2], &requested),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO_RELAXED], &requested),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_is_raised_and_clamped() {
        assert_eq!(swapchain_min_image_count(2, &capabilities(1, 0, (0, 0))), 2);
        assert_eq!(swapchain_min_image_count(2, &capabilities(3, 8, (0, 0))), 3);
        assert_eq!(swapchain_min_image_count(4, &capabilities(1, 3, (0, 0))), 3);
        assert_eq!(swapchain_min_image_count(16, &capabilities(2, 0, (0, 0))), 16);
    }

    #[test]
    fn image_count_never_drops_below_two() {
        assert_eq!(swapchain_min_image_count(1, &capabilities(1, 0, (0, 0))), 2);
        assert_eq!(swapchain_min_image_count(0, &capabilities(1, 8, (0, 0))), 2);
        // A surface limited to one image wins over the minimum
        assert_eq!(swapchain_min_image_count(1, &capabilities(1, 1, (0, 0))), 1);
    }

    #[test]
    fn pre_transform_prefers_identity() {
        let mut caps = capabilities(2, 0, (0, 0));
        caps.supported_transforms =
            vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90;
        caps.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            swapchain_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );

        caps.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            swapchain_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );
    }

    #[test]
    fn extent_follows_the_surface_when_defined() {
        let caps = capabilities(2, 0, (1280, 720));
        assert_eq!(
            swapchain_extent(&caps, 1600, 900),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );

        let caps = capabilities(2, 0, (u32::MAX, u32::MAX));
        assert_eq!(
            swapchain_extent(&caps, 1600, 900),
            vk::Extent2D {
                width: 1600,
                height: 900
            }
        );
    }
}
