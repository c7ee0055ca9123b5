use crate::{AppResult, Renderer, VulkanContext, WindowData};
use ash::{prelude::VkResult, vk};
use imgui::DrawData;

/// Index and rebuild bookkeeping of the swapchain frames.
///
/// `frame_index` is the swapchain image being rendered, `semaphore_index` selects the
/// semaphore pair of the next frame and advances after each successful present. Once a rebuild
/// is requested no more work is submitted or presented until [`FrameRing::reset`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRing {
    image_count: u32,
    frame_index: u32,
    semaphore_index: u32,
    rebuild: bool,
}

impl FrameRing {
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count,
            frame_index: 0,
            semaphore_index: 0,
            rebuild: false,
        }
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn semaphore_index(&self) -> u32 {
        self.semaphore_index
    }

    pub fn needs_rebuild(&self) -> bool {
        self.rebuild
    }

    /// Mark the swapchain as out of date. Requesting several times before the next reset still
    /// leads to a single rebuild.
    pub fn request_rebuild(&mut self) {
        self.rebuild = true;
    }

    /// Whether the swapchain should be rebuilt now for a framebuffer of `width` x `height`.
    ///
    /// A minimized window has no framebuffer, the rebuild waits until it is restored.
    pub fn should_rebuild(&self, width: u32, height: u32) -> bool {
        self.rebuild && width > 0 && height > 0
    }

    /// Whether a frame of `display_size` can be rendered and presented.
    pub fn should_render(&self, display_size: [f32; 2]) -> bool {
        let [width, height] = display_size;
        !self.rebuild && width > 0.0 && height > 0.0
    }

    /// Start over after the swapchain was rebuilt with `image_count` images.
    pub fn reset(&mut self, image_count: u32) {
        *self = Self::new(image_count);
    }

    /// Record the outcome of an image acquisition.
    ///
    /// Returns the image to render to, or `None` when the frame must be abandoned because the
    /// swapchain is out of date or suboptimal.
    pub fn acquired(&mut self, result: VkResult<(u32, bool)>) -> AppResult<Option<u32>> {
        match result {
            Ok((image_index, false)) => {
                self.frame_index = image_index;
                Ok(Some(image_index))
            }
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire");
                self.rebuild = true;
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Whether the rendered frame can be handed to the presentation engine.
    pub fn can_present(&self) -> bool {
        !self.rebuild
    }

    /// Record the outcome of a present.
    pub fn presented(&mut self, result: VkResult<bool>) -> AppResult<()> {
        match result {
            Ok(false) => {
                self.semaphore_index = (self.semaphore_index + 1) % self.image_count;
                Ok(())
            }
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on present");
                self.rebuild = true;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// Clear value for `color` with its rgb components premultiplied by alpha.
pub fn premultiplied_clear_value(color: [f32; 4]) -> vk::ClearValue {
    let [r, g, b, a] = color;
    vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [r * a, g * a, b * a, a],
        },
    }
}

/// Acquire the next swapchain image, record the render pass with the gui draw commands and
/// submit it.
///
/// Nothing is recorded nor submitted when the acquisition reports the swapchain out of date.
pub fn render_frame(
    context: &VulkanContext,
    window_data: &mut WindowData,
    renderer: &mut Renderer,
    draw_data: &DrawData,
) -> AppResult<()> {
    let device = &context.device;
    let semaphores = window_data.semaphores[window_data.ring.semaphore_index() as usize];

    let result = unsafe {
        window_data.swapchain_loader.acquire_next_image(
            window_data.swapchain,
            u64::MAX,
            semaphores.image_acquired,
            vk::Fence::null(),
        )
    };
    let frame_index = match window_data.ring.acquired(result)? {
        Some(index) => index as usize,
        None => return Ok(()),
    };
    let frame = &window_data.frames[frame_index];

    unsafe {
        device.wait_for_fences(&[frame.fence], true, u64::MAX)?;
        device.reset_fences(&[frame.fence])?;
        device.reset_command_pool(frame.command_pool, vk::CommandPoolResetFlags::empty())?;
    }

    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(frame.command_buffer, &begin_info)? };

    let clear_values = [window_data.clear_value];
    let render_pass_begin_info = vk::RenderPassBeginInfo::builder()
        .render_pass(window_data.render_pass)
        .framebuffer(frame.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: window_data.extent,
        })
        .clear_values(&clear_values);

    unsafe {
        device.cmd_begin_render_pass(
            frame.command_buffer,
            &render_pass_begin_info,
            vk::SubpassContents::INLINE,
        )
    };

    renderer.cmd_draw(frame.command_buffer, draw_data, frame_index)?;

    unsafe {
        device.cmd_end_render_pass(frame.command_buffer);
        device.end_command_buffer(frame.command_buffer)?;
    }

    let wait_semaphores = [semaphores.image_acquired];
    let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let command_buffers = [frame.command_buffer];
    let signal_semaphores = [semaphores.render_complete];
    let submit_info = [vk::SubmitInfo::builder()
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .command_buffers(&command_buffers)
        .signal_semaphores(&signal_semaphores)
        .build()];
    unsafe { device.queue_submit(context.queue, &submit_info, frame.fence)? };

    Ok(())
}

/// Hand the last rendered image to the presentation engine.
///
/// Skipped while a rebuild is pending.
pub fn present_frame(context: &VulkanContext, window_data: &mut WindowData) -> AppResult<()> {
    if !window_data.ring.can_present() {
        return Ok(());
    }

    let semaphores = window_data.semaphores[window_data.ring.semaphore_index() as usize];
    let wait_semaphores = [semaphores.render_complete];
    let swapchains = [window_data.swapchain];
    let image_indices = [window_data.ring.frame_index()];
    let present_info = vk::PresentInfoKHR::builder()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);

    let result = unsafe {
        window_data
            .swapchain_loader
            .queue_present(context.queue, &present_info)
    };
    window_data.ring.presented(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;

    fn clear_color(value: vk::ClearValue) -> [f32; 4] {
        unsafe { value.color.float32 }
    }

    #[test]
    fn single_frame_advances_the_semaphore() {
        let mut ring = FrameRing::new(3);

        let image = ring.acquired(Ok((1, false))).unwrap();
        assert_eq!(image, Some(1));
        assert!(ring.can_present());
        ring.presented(Ok(false)).unwrap();

        assert_eq!(ring.semaphore_index(), 1);
        assert!(ring.frame_index() < ring.image_count());
        assert!(!ring.needs_rebuild());
    }

    #[test]
    fn semaphore_index_wraps_around_the_image_count() {
        let mut ring = FrameRing::new(3);
        for frame in 0..10u32 {
            assert_eq!(ring.semaphore_index(), frame % 3);
            ring.acquired(Ok((frame % 3, false))).unwrap();
            ring.presented(Ok(false)).unwrap();
        }
    }

    #[test]
    fn out_of_date_acquire_abandons_the_frame() {
        let mut ring = FrameRing::new(2);
        ring.acquired(Ok((0, false))).unwrap();
        ring.presented(Ok(false)).unwrap();

        let image = ring
            .acquired(Err(vk::Result::ERROR_OUT_OF_DATE_KHR))
            .unwrap();
        assert_eq!(image, None);
        assert!(ring.needs_rebuild());
        assert!(!ring.can_present());
        assert_eq!(ring.semaphore_index(), 1);
    }

    #[test]
    fn suboptimal_acquire_abandons_the_frame() {
        let mut ring = FrameRing::new(2);
        assert_eq!(ring.acquired(Ok((1, true))).unwrap(), None);
        assert!(ring.needs_rebuild());
        assert_eq!(ring.frame_index(), 0);
    }

    #[test]
    fn out_of_date_present_keeps_the_semaphore() {
        let mut ring = FrameRing::new(2);
        ring.acquired(Ok((0, false))).unwrap();
        ring.presented(Ok(true)).unwrap();
        assert!(ring.needs_rebuild());
        assert_eq!(ring.semaphore_index(), 0);

        let mut ring = FrameRing::new(2);
        ring.acquired(Ok((0, false))).unwrap();
        ring.presented(Err(vk::Result::ERROR_OUT_OF_DATE_KHR))
            .unwrap();
        assert!(ring.needs_rebuild());
        assert_eq!(ring.semaphore_index(), 0);
    }

    #[test]
    fn other_errors_are_propagated() {
        let mut ring = FrameRing::new(2);
        let error = ring
            .acquired(Err(vk::Result::ERROR_DEVICE_LOST))
            .unwrap_err();
        assert!(matches!(
            error,
            AppError::Vulkan(vk::Result::ERROR_DEVICE_LOST)
        ));
        assert!(!ring.needs_rebuild());

        assert!(ring.presented(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn resize_then_rebuild_starts_over() {
        let mut ring = FrameRing::new(3);
        ring.acquired(Ok((2, false))).unwrap();
        ring.presented(Ok(false)).unwrap();

        // Resize reported by the window then by the presentation engine
        ring.request_rebuild();
        ring.acquired(Ok((0, true))).unwrap();
        ring.request_rebuild();
        assert!(ring.needs_rebuild());

        ring.reset(4);
        assert!(!ring.needs_rebuild());
        assert_eq!(ring.frame_index(), 0);
        assert_eq!(ring.semaphore_index(), 0);
        assert_eq!(ring.image_count(), 4);
    }

    #[test]
    fn minimized_window_waits_for_restore_to_rebuild() {
        let mut ring = FrameRing::new(3);
        ring.acquired(Ok((1, false))).unwrap();
        ring.presented(Ok(false)).unwrap();
        ring.request_rebuild();
        let before = ring;

        for _ in 0..5 {
            assert!(!ring.should_rebuild(0, 0));
            assert!(!ring.should_render([0.0, 0.0]));
        }
        assert_eq!(ring, before);

        // Restored: one rebuild then rendering resumes
        let mut rebuilds = 0;
        for _ in 0..3 {
            if ring.should_rebuild(1280, 720) {
                rebuilds += 1;
                ring.reset(3);
                assert_eq!(ring.frame_index(), 0);
                assert_eq!(ring.semaphore_index(), 0);
            }
            assert!(ring.should_render([1280.0, 720.0]));
        }
        assert_eq!(rebuilds, 1);
    }

    #[test]
    fn pending_rebuild_blocks_rendering() {
        let mut ring = FrameRing::new(2);
        assert!(ring.should_render([800.0, 600.0]));
        assert!(!ring.should_rebuild(800, 600));

        ring.acquired(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
        assert!(!ring.should_render([800.0, 600.0]));
        assert!(!ring.should_rebuild(800, 0));
        assert!(ring.should_rebuild(800, 600));

        let ring = FrameRing::new(2);
        assert!(!ring.should_render([0.0, 600.0]));
    }

    #[test]
    fn rebuild_at_the_same_size_keeps_the_image_count() {
        let mut ring = FrameRing::new(3);
        ring.request_rebuild();
        ring.reset(3);
        assert_eq!(ring, FrameRing::new(3));
    }

    #[test]
    fn clear_color_is_premultiplied() {
        let color = clear_color(premultiplied_clear_value([0.45, 0.55, 0.60, 0.5]));
        assert!((color[0] - 0.225).abs() < 1e-6);
        assert!((color[1] - 0.275).abs() < 1e-6);
        assert!((color[2] - 0.30).abs() < 1e-6);
        assert_eq!(color[3], 0.5);

        let opaque = clear_color(premultiplied_clear_value([0.45, 0.55, 0.60, 1.0]));
        assert_eq!(opaque, [0.45, 0.55, 0.60, 1.0]);
    }
}
