use imgui::{Condition, Ui};
use imgui_ash_showcase::{AppResult, System, SystemConfig};
use simple_logger::SimpleLogger;

#[derive(Debug)]
struct State {
    show_demo_window: bool,
    show_another_window: bool,
    value: f32,
    counter: i32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            show_demo_window: true,
            show_another_window: false,
            value: 0.0,
            counter: 0,
        }
    }
}

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
        if error.is_unavailable() {
            std::process::exit(1);
        }
        std::process::abort();
    }
}

fn run() -> AppResult<()> {
    let system = System::new(SystemConfig::default())?;

    let mut state = State::default();
    system.run(move |_, ui, clear_color| build_ui(ui, &mut state, clear_color))
}

fn build_ui(ui: &mut Ui, state: &mut State, clear_color: &mut [f32; 4]) {
    if state.show_demo_window {
        ui.show_demo_window(&mut state.show_demo_window);
    }

    ui.window("Hello, world!")
        .size([400.0, 200.0], Condition::FirstUseEver)
        .build(|| {
            ui.text("This is some useful text.");
            ui.checkbox("Demo Window", &mut state.show_demo_window);
            ui.checkbox("Another Window", &mut state.show_another_window);

            ui.slider("float", 0.0, 1.0, &mut state.value);
            let mut rgb = [clear_color[0], clear_color[1], clear_color[2]];
            if ui.color_edit3("clear color", &mut rgb) {
                clear_color[..3].copy_from_slice(&rgb);
            }

            if ui.button("Button") {
                state.counter += 1;
            }
            ui.same_line();
            ui.text(format!("counter = {}", state.counter));

            let framerate = ui.io().framerate;
            ui.text(format!(
                "Application average {:.3} ms/frame ({:.1} FPS)",
                1000.0 / framerate,
                framerate
            ));
        });

    if state.show_another_window {
        let mut opened = true;
        ui.window("Another Window")
            .opened(&mut opened)
            .build(|| {
                ui.text("Hello from another window!");
                if ui.button("Close Me") {
                    state.show_another_window = false;
                }
            });
        state.show_another_window &= opened;
    }
}
