use crate::{
    present_frame, render_frame, upload_fonts, AppResult, Renderer, VulkanContext, WindowData,
    DOCKING, MIN_IMAGE_COUNT, VALIDATION, VSYNC,
};
use imgui::{Context, FontConfig, FontSource, Ui};
use imgui_winit_support::{HiDpiMode, WinitPlatform};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::time::{Duration, Instant};
use winit::{
    dpi::{LogicalSize, PhysicalSize},
    event::{Event, WindowEvent},
    event_loop::EventLoop,
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowBuilder},
};

/// Startup parameters of a [`System`].
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Initial clear colour, editable by the gui every frame.
    pub clear_color: [f32; 4],
    /// Raised to [`MIN_IMAGE_COUNT`] when lower.
    pub min_image_count: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            title: String::from("Dear ImGui winit+Vulkan example"),
            width: 1280,
            height: 720,
            clear_color: [0.45, 0.55, 0.60, 1.0],
            min_image_count: MIN_IMAGE_COUNT,
        }
    }
}

/// A window presenting an imgui frame through Vulkan at each loop iteration.
pub struct System {
    event_loop: EventLoop<()>,
    window: Window,
    context: VulkanContext,
    window_data: WindowData,
    pub imgui: Context,
    platform: WinitPlatform,
    renderer: Renderer,
    clear_color: [f32; 4],
    min_image_count: u32,
}

impl System {
    /// Open the window, bring up Vulkan and the gui, and upload the fonts atlas.
    ///
    /// # Errors
    ///
    /// * [`AppError::EventLoop`] - If the windowing system is not available.
    /// * [`AppError::Loading`] - If the Vulkan loader is not available.
    /// * [`AppError`] - If any step of the bring-up fails.
    ///
    /// [`AppError`]: crate::AppError
    /// [`AppError::EventLoop`]: crate::AppError::EventLoop
    /// [`AppError::Loading`]: crate::AppError::Loading
    pub fn new(config: SystemConfig) -> AppResult<Self> {
        log::info!("Create application");
        log::debug!(
            "Build flags: validation={} vsync={} docking={}",
            VALIDATION,
            VSYNC,
            DOCKING
        );

        log::debug!("Creating window and event loop");
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(config.title.as_str())
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .with_resizable(true)
            .build(&event_loop)?;

        let context = VulkanContext::new(window.raw_display_handle(), &config.title)?;

        let min_image_count = config.min_image_count.max(MIN_IMAGE_COUNT);
        let PhysicalSize { width, height } = window.inner_size();
        let mut window_data = WindowData::new(
            &context,
            window.raw_display_handle(),
            window.raw_window_handle(),
            min_image_count,
            width,
            height,
        )?;
        window_data.set_clear_color(config.clear_color);

        let mut imgui = Context::create();
        imgui.set_ini_filename(None);
        #[cfg(feature = "docking")]
        enable_docking(&mut imgui);

        let mut platform = WinitPlatform::init(&mut imgui);
        let hidpi_factor = platform.hidpi_factor();
        let font_size = (13.0 * hidpi_factor) as f32;
        imgui.fonts().add_font(&[FontSource::DefaultFontData {
            config: Some(FontConfig {
                size_pixels: font_size,
                ..FontConfig::default()
            }),
        }]);
        imgui.io_mut().font_global_scale = (1.0 / hidpi_factor) as f32;
        platform.attach_window(imgui.io_mut(), &window, HiDpiMode::Rounded);

        let mut renderer = Renderer::new(
            &context.instance,
            context.physical_device,
            context.device.clone(),
            context.descriptor_pool,
            window_data.render_pass,
            min_image_count,
        )?;

        upload_fonts(&context, &window_data, &mut renderer, &mut imgui)?;

        Ok(Self {
            event_loop,
            window,
            context,
            window_data,
            imgui,
            platform,
            renderer,
            clear_color: config.clear_color,
            min_image_count,
        })
    }

    /// Run the main loop until the window is closed or `ui_builder` clears its run flag.
    ///
    /// Everything is released before returning, in reverse creation order, even when the loop
    /// ends with an error.
    pub fn run<F>(mut self, mut ui_builder: F) -> AppResult<()>
    where
        F: FnMut(&mut bool, &mut Ui, &mut [f32; 4]),
    {
        log::info!("Starting application");
        let result = self.main_loop(&mut ui_builder);
        log::info!("Stopping application");
        let teardown = self.teardown();
        result.and(teardown)
    }

    fn main_loop<F>(&mut self, ui_builder: &mut F) -> AppResult<()>
    where
        F: FnMut(&mut bool, &mut Ui, &mut [f32; 4]),
    {
        let Self {
            event_loop,
            window,
            context,
            window_data,
            imgui,
            platform,
            renderer,
            clear_color,
            min_image_count,
        } = self;
        let window: &Window = window;

        let mut run = true;
        let mut last_frame = Instant::now();

        while run {
            let status = event_loop.pump_events(Some(Duration::ZERO), |event, _| {
                platform.handle_event(imgui.io_mut(), window, &event);

                if let Event::WindowEvent { event, .. } = event {
                    match event {
                        WindowEvent::Resized(new_size) => {
                            log::debug!("Window was resized. New size is {:?}", new_size);
                            window_data.ring.request_rebuild();
                        }
                        WindowEvent::CloseRequested => run = false,
                        _ => (),
                    }
                }
            });
            if let PumpStatus::Exit(code) = status {
                log::debug!("Event loop exited with code {}", code);
                break;
            }
            if !run {
                break;
            }

            let now = Instant::now();
            imgui.io_mut().update_delta_time(now - last_frame);
            last_frame = now;

            let PhysicalSize { width, height } = window.inner_size();
            if window_data.ring.should_rebuild(width, height) {
                // The device is idle after the rebuild
                window_data.rebuild(context, *min_image_count, width, height)?;
                renderer.set_min_image_count(*min_image_count)?;
                renderer.set_render_pass(window_data.render_pass)?;
            }

            platform.prepare_frame(imgui.io_mut(), window)?;
            let ui = imgui.new_frame();
            ui_builder(&mut run, ui, clear_color);
            platform.prepare_render(ui, window);
            let draw_data = imgui.render();

            if !window_data.ring.should_render(draw_data.display_size) {
                continue;
            }

            window_data.set_clear_color(*clear_color);
            render_frame(context, window_data, renderer, draw_data)?;
            present_frame(context, window_data)?;
        }

        Ok(())
    }

    fn teardown(self) -> AppResult<()> {
        let Self {
            event_loop,
            window,
            context,
            window_data,
            imgui,
            platform,
            mut renderer,
            ..
        } = self;

        let idle = context.wait_idle();
        let destroyed = renderer.destroy();
        drop(platform);
        drop(imgui);
        window_data.destroy(&context);
        drop(context);
        drop(window);
        drop(event_loop);

        idle?;
        destroyed?;
        Ok(())
    }
}

#[cfg(feature = "docking")]
fn enable_docking(imgui: &mut Context) {
    use imgui::{ConfigFlags, StyleColor};

    let io = imgui.io_mut();
    io.config_flags |= ConfigFlags::DOCKING_ENABLE | ConfigFlags::VIEWPORTS_ENABLE;
    let viewports = io.config_flags.contains(ConfigFlags::VIEWPORTS_ENABLE);

    // Platform windows look identical to regular ones
    if viewports {
        let style = imgui.style_mut();
        style.window_rounding = 0.0;
        style[StyleColor::WindowBg][3] = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_showcase() {
        let config = SystemConfig::default();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.clear_color, [0.45, 0.55, 0.60, 1.0]);
        assert!(config.min_image_count >= 2);
        assert_eq!(config.title, "Dear ImGui winit+Vulkan example");
    }
}
