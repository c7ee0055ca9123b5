use glutin::{
    config::{Api, ConfigTemplateBuilder},
    context::{ContextApi, ContextAttributesBuilder, PossiblyCurrentContext, Version},
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};
use imgui::Context;
use imgui_ash_showcase::{
    gles::{
        TrianglesProgram, Uniforms, INSTANCES_RANGE, RADIUS_RANGE, ROTATION_RANGE, SIZE_RANGE,
    },
    AppError, AppResult, FREE_RUNNING,
};
use imgui_glow_renderer::{
    glow::{self, HasContext},
    AutoRenderer,
};
use imgui_winit_support::{HiDpiMode, WinitPlatform};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use simple_logger::SimpleLogger;
use std::{
    ffi::CString,
    num::NonZeroU32,
    time::{Duration, Instant},
};
use winit::{
    dpi::{LogicalSize, PhysicalSize},
    event::{Event, WindowEvent},
    event_loop::EventLoop,
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowBuilder},
};

const TITLE: &str = "raspberry pi 4 - imgui + shader demo";
const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() {
    if let Err(error) = SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
    {
        eprintln!("Failed to initialize logger: {}", error);
    }

    if let Err(error) = run() {
        log::error!("{}", error);
        if error.is_unavailable() || matches!(error, AppError::Gl(_)) {
            std::process::exit(1);
        }
        std::process::abort();
    }
}

fn run() -> AppResult<()> {
    log::info!("Create application");
    let mut event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(TITLE)
        .with_inner_size(LogicalSize::new(WIDTH, HEIGHT))
        .with_resizable(true)
        .build(&event_loop)?;

    let (display, surface, context) = create_gl_context(&window)?;
    let gl = unsafe {
        glow::Context::from_loader_function(|symbol| {
            CString::new(symbol)
                .map(|symbol| display.get_proc_address(&symbol))
                .unwrap_or(std::ptr::null())
        })
    };

    let swap_interval = if FREE_RUNNING {
        SwapInterval::DontWait
    } else {
        SwapInterval::Wait(NonZeroU32::MIN)
    };
    if let Err(error) = surface.set_swap_interval(&context, swap_interval) {
        log::warn!("Failed to set swap interval (free running: {}): {}", FREE_RUNNING, error);
    }

    let mut imgui = Context::create();
    imgui.set_ini_filename(None);
    let mut platform = WinitPlatform::init(&mut imgui);
    platform.attach_window(imgui.io_mut(), &window, HiDpiMode::Default);

    let mut renderer = AutoRenderer::initialize(gl, &mut imgui)
        .map_err(|error| AppError::Gl(error.to_string()))?;
    let program = TrianglesProgram::new(renderer.gl_context())?;

    let mut uniforms = Uniforms::default();
    let mut show_demo_window = true;
    let mut last_frame = Instant::now();
    let mut run = true;

    log::info!("Starting application");
    let result = (|| -> AppResult<()> {
        while run {
            let status = event_loop.pump_events(Some(Duration::ZERO), |event, _| {
                platform.handle_event(imgui.io_mut(), &window, &event);

                if let Event::WindowEvent { event, .. } = event {
                    match event {
                        WindowEvent::Resized(PhysicalSize { width, height }) => {
                            if let (Some(width), Some(height)) =
                                (NonZeroU32::new(width), NonZeroU32::new(height))
                            {
                                surface.resize(&context, width, height);
                            }
                        }
                        WindowEvent::CloseRequested => run = false,
                        _ => (),
                    }
                }
            });
            if let PumpStatus::Exit(_) = status {
                break;
            }

            let now = Instant::now();
            imgui.io_mut().update_delta_time(now - last_frame);
            last_frame = now;

            platform.prepare_frame(imgui.io_mut(), &window)?;
            let ui = imgui.new_frame();

            if show_demo_window {
                ui.show_demo_window(&mut show_demo_window);
            }
            ui.slider(
                "Instances",
                *INSTANCES_RANGE.start(),
                *INSTANCES_RANGE.end(),
                &mut uniforms.num_instances,
            );
            ui.slider(
                "Rotation",
                *ROTATION_RANGE.start(),
                *ROTATION_RANGE.end(),
                &mut uniforms.rotation,
            );
            ui.slider(
                "Radius",
                *RADIUS_RANGE.start(),
                *RADIUS_RANGE.end(),
                &mut uniforms.radius,
            );
            ui.slider(
                "Size",
                *SIZE_RANGE.start(),
                *SIZE_RANGE.end(),
                &mut uniforms.size,
            );
            // Ctrl+click lets the user type values out of range
            uniforms = uniforms.clamped();

            platform.prepare_render(ui, &window);
            let draw_data = imgui.render();

            let PhysicalSize { width, height } = window.inner_size();
            let gl = renderer.gl_context();
            unsafe {
                gl.viewport(0, 0, width as i32, height as i32);
                gl.clear_color(0.0, 0.0, 0.0, 1.0);
                gl.clear(glow::COLOR_BUFFER_BIT);
            }
            program.draw(gl, &uniforms);

            renderer
                .render(draw_data)
                .map_err(|error| AppError::Gl(error.to_string()))?;
            surface.swap_buffers(&context)?;
        }
        Ok(())
    })();

    log::info!("Stopping application");
    program.destroy(renderer.gl_context());
    drop(renderer);
    drop(platform);
    drop(imgui);
    drop(surface);
    drop(context);
    drop(display);
    drop(window);
    drop(event_loop);

    result
}

fn create_gl_context(
    window: &Window,
) -> AppResult<(Display, Surface<WindowSurface>, PossiblyCurrentContext)> {
    log::debug!("Creating GLES context");
    let window_handle = window.raw_window_handle();
    let display =
        unsafe { Display::new(window.raw_display_handle(), DisplayApiPreference::Egl)? };

    let template = ConfigTemplateBuilder::new().with_api(Api::GLES3).build();
    let config = unsafe { display.find_configs(template)? }
        .next()
        .ok_or_else(|| AppError::Gl(String::from("No GLES 3 framebuffer config")))?;

    let PhysicalSize { width, height } = window.inner_size();
    let surface_attributes = SurfaceAttributesBuilder::<WindowSurface>::new().build(
        window_handle,
        NonZeroU32::new(width).unwrap_or(NonZeroU32::MIN),
        NonZeroU32::new(height).unwrap_or(NonZeroU32::MIN),
    );
    let surface = unsafe { display.create_window_surface(&config, &surface_attributes)? };

    let context_attributes = ContextAttributesBuilder::new()
        .with_context_api(ContextApi::Gles(Some(Version::new(3, 1))))
        .build(Some(window_handle));
    let context = unsafe { display.create_context(&config, &context_attributes)? }
        .make_current(&surface)?;

    Ok((display, surface, context))
}
