use crate::{AppResult, Renderer, VulkanContext, WindowData};
use ash::{vk, Device};
use imgui::Context;

/// Releases the staging objects of the fonts upload once the device is idle, whatever way the
/// upload ends.
struct FontUpload<'a> {
    device: &'a Device,
    renderer: &'a mut Renderer,
    idle: bool,
}

impl Drop for FontUpload<'_> {
    fn drop(&mut self) {
        if !self.idle {
            if let Err(error) = unsafe { self.device.device_wait_idle() } {
                log::error!("Failed to wait for the device before fonts cleanup: {}", error);
            }
        }
        if let Err(error) = self.renderer.destroy_font_upload_objects() {
            log::error!("Failed to destroy fonts upload objects: {}", error);
        }
    }
}

/// Upload the imgui fonts atlas with the command buffer of the first frame.
///
/// Blocks until the device is idle. Must run once, before the first frame is rendered.
pub fn upload_fonts(
    context: &VulkanContext,
    window_data: &WindowData,
    renderer: &mut Renderer,
    imgui: &mut Context,
) -> AppResult<()> {
    log::debug!("Uploading fonts texture");
    let device = &context.device;
    let frame = &window_data.frames[0];

    unsafe {
        device.reset_command_pool(frame.command_pool, vk::CommandPoolResetFlags::empty())?;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(frame.command_buffer, &begin_info)?;
    }

    let mut upload = FontUpload {
        device,
        renderer,
        idle: false,
    };
    upload
        .renderer
        .cmd_upload_fonts(frame.command_buffer, imgui)?;

    let command_buffers = [frame.command_buffer];
    let submit_info = [vk::SubmitInfo::builder()
        .command_buffers(&command_buffers)
        .build()];
    unsafe {
        device.end_command_buffer(frame.command_buffer)?;
        device.queue_submit(context.queue, &submit_info, vk::Fence::null())?;
        device.device_wait_idle()?;
    }
    upload.idle = true;

    drop(upload);
    Ok(())
}
