mod app;
mod config;
mod dialog;
mod doc;
mod error;
mod focus;
mod input;
mod layout;
mod refresh;
mod shell;
mod style;
mod ui;
mod validate;
mod widgets;

use crate::app::{App, AppOptions, Launcher, ShellLauncher};
use crate::config::{exe_dir, find_file, load_config};
use crate::error::AppError;
use crate::input::{button_to_nav, key_to_nav, AxisTracker, Nav};
use crate::layout::parse_layout;
use crate::refresh::ValueSource;
use crate::style::load_style;
use crate::ui::{Renderer, UIColors};
use crate::validate::validate;
use crate::widgets::Page;
use clap::Parser;
use sdl2::event::{Event, WindowEvent};
use sdl2::image::InitFlag;
use sdl2::mouse::MouseButton;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const WINDOW_TITLE: &str = "Batocera Control Center";
const DEFAULT_LOG: &str = "/var/log/controlcenter.log";
const FRAME: Duration = Duration::from_millis(16);

static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);
static TOGGLE_REQUESTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "controlcenter", version, about = "On-screen control panel driven by an XML layout")]
struct Cli {
    /// Start with the window hidden; SIGUSR1 shows it
    #[arg(long)]
    hidden: bool,

    /// Validate the layout, print the report and exit
    #[arg(long)]
    check: bool,

    /// Settings file to use instead of the per-user config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Auto-close timeout in seconds, layout (.xml) and style file, in any order
    #[arg(allow_negative_numbers = true)]
    inputs: Vec<String>,
}

#[derive(Debug, Default, PartialEq)]
struct Inputs {
    layout: Option<PathBuf>,
    style: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

/// Sort positional arguments: integers are the timeout (last one wins), the
/// first `.xml` or first other argument is the layout, the next is the style.
fn classify_inputs(args: &[String]) -> Inputs {
    let mut out = Inputs::default();
    for arg in args {
        if let Ok(n) = arg.trim().parse::<i64>() {
            out.timeout_secs = Some(n.max(0) as u64);
            continue;
        }
        if arg.ends_with(".xml") || out.layout.is_none() {
            if out.layout.is_none() {
                out.layout = Some(PathBuf::from(arg));
            }
        } else if out.style.is_none() {
            out.style = Some(PathBuf::from(arg));
        }
    }
    out
}

fn has_display() -> bool {
    ["WAYLAND_DISPLAY", "DISPLAY"]
        .iter()
        .any(|v| std::env::var(v).map_or(false, |s| !s.is_empty()))
}

fn init_logging() {
    let debug = std::env::var("CONTROLCENTER_DEBUG").map_or(false, |v| v == "1");
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let log_file = if debug {
        let path = std::env::var("CONTROLCENTER_LOG").unwrap_or_else(|_| DEFAULT_LOG.to_string());
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    } else {
        None
    };
    match log_file {
        Some(f) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(f))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

extern "C" fn on_quit_signal(_: libc::c_int) {
    QUIT_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_toggle_signal(_: libc::c_int) {
    TOGGLE_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let quit = on_quit_signal as extern "C" fn(libc::c_int);
    let toggle = on_toggle_signal as extern "C" fn(libc::c_int);
    // the handlers only store to atomics
    unsafe {
        libc::signal(libc::SIGINT, quit as libc::sighandler_t);
        libc::signal(libc::SIGTERM, quit as libc::sighandler_t);
        libc::signal(libc::SIGUSR1, toggle as libc::sighandler_t);
    }
}

/// Window size and position for a display of `display` pixels.
fn window_geometry(display: Option<(u32, u32)>, fractions: (f32, f32)) -> (i32, i32, u32, u32) {
    let (mut dw, mut dh) = display.filter(|(w, h)| *w > 0 && *h > 0).unwrap_or((1280, 720));
    if dh > dw {
        std::mem::swap(&mut dw, &mut dh);
    }
    let w = ((dw as f32) * fractions.0) as u32;
    let h = ((dh as f32) * fractions.1) as u32;
    let x = (dw.saturating_sub(w) / 2) as i32;
    (x, 20, w.max(1), h.max(1))
}

fn main() {
    if let Err(e) = run() {
        error!("{}", e);
        eprintln!("ERROR: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging();

    let config = load_config(cli.config.as_deref());
    let inputs = classify_inputs(&cli.inputs);
    let dirs = config.search_dirs();
    let layout_path = inputs
        .layout
        .unwrap_or_else(|| find_file("controlcenter.xml", &dirs, exe_dir().join("controlcenter.xml")));
    let style_path = inputs
        .style
        .unwrap_or_else(|| find_file("style.toml", &dirs, exe_dir().join("style.toml")));

    if !cli.check && !has_display() {
        return Err(AppError::NoDisplay);
    }
    if !layout_path.exists() {
        return Err(AppError::LayoutMissing(layout_path));
    }

    let root = parse_layout(&layout_path)?;
    let report = validate(&root);
    if !report.warnings.is_empty() {
        eprintln!("XML warnings:");
        for w in &report.warnings {
            eprintln!(" - {}", w);
        }
    }
    if !report.is_ok() {
        eprintln!("XML errors:");
        for e in &report.errors {
            eprintln!(" - {}", e);
        }
        return Err(AppError::Invalid(report.errors.len()));
    }
    if cli.check {
        println!("{}: ok ({} warning(s))", layout_path.display(), report.warnings.len());
        return Ok(());
    }
    info!("layout {}", layout_path.display());

    let style = load_style(Some(&style_path));
    install_signal_handlers();

    let sdl_ctx = sdl2::init().map_err(AppError::Sdl)?;
    let video = sdl_ctx.video().map_err(AppError::Sdl)?;
    let controller_subsystem = sdl_ctx.game_controller().map_err(AppError::Sdl)?;
    let _image_ctx = sdl2::image::init(InitFlag::PNG | InitFlag::JPG | InitFlag::WEBP)
        .map_err(AppError::Sdl)?;

    let display = video
        .desktop_display_mode(0)
        .ok()
        .map(|m| (m.w.max(0) as u32, m.h.max(0) as u32));
    let (x, y, w, h) = window_geometry(display, config.window_fractions());
    let mut builder = video.window(WINDOW_TITLE, w, h);
    builder.borderless().position(x, y);
    if cli.hidden {
        builder.hidden();
    }
    let window = builder.build().map_err(|e| AppError::Sdl(e.to_string()))?;
    let mut canvas = window
        .into_canvas()
        .accelerated()
        .present_vsync()
        .build()
        .map_err(|e| AppError::Sdl(e.to_string()))?;

    let ttf_ctx = sdl2::ttf::init().map_err(|e| AppError::Sdl(e.to_string()))?;
    let font_path = config.resolve_font().ok_or(AppError::NoFont)?;
    let font = ttf_ctx
        .load_font(&font_path, config.font_size())
        .map_err(AppError::Sdl)?;
    debug!("font {}", font_path.display());

    // Keep opened controllers alive, keyed by instance id
    let mut controllers: HashMap<u32, sdl2::controller::GameController> = HashMap::new();
    let joysticks = sdl_ctx
        .joystick()
        .and_then(|j| j.num_joysticks())
        .unwrap_or(0);
    for id in 0..joysticks {
        if controller_subsystem.is_game_controller(id) {
            match controller_subsystem.open(id) {
                Ok(gc) => {
                    info!("opened controller: {}", gc.name());
                    controllers.insert(gc.instance_id(), gc);
                }
                Err(e) => warn!("failed opening controller {}: {}", id, e),
            }
        }
    }

    let now = Instant::now();
    let mut launcher = ShellLauncher {
        timeout: config.shell_timeout(),
    };
    let mut resolve = |s: &ValueSource| launcher.resolve(s);
    let (page, tasks) = Page::build(&root, &mut resolve, now);
    debug!("{} refresh task(s)", tasks.len());
    let opts = AppOptions {
        shell_timeout: config.shell_timeout(),
        action_debounce: config.action_debounce(),
        gamepad_debounce: config.gamepad_debounce(),
        auto_close: inputs.timeout_secs.map(Duration::from_secs),
    };
    let mut app = App::new(page, tasks, opts, Box::new(launcher), now);
    if cli.hidden {
        app.toggle_visibility(now);
    }

    let texture_creator = canvas.texture_creator();
    let mut renderer = Renderer::new(&texture_creator, UIColors::from_style(&style));
    let mut event_pump = sdl_ctx.event_pump().map_err(AppError::Sdl)?;
    let mut axes = AxisTracker::default();
    let mut held: HashSet<Nav> = HashSet::new();

    'running: loop {
        if QUIT_REQUESTED.load(Ordering::SeqCst) {
            info!("quit requested by signal");
            break 'running;
        }
        if TOGGLE_REQUESTED.swap(false, Ordering::SeqCst) {
            let window = canvas.window_mut();
            if app.toggle_visibility(Instant::now()) {
                window.show();
                window.raise();
            } else {
                window.hide();
            }
        }

        for event in event_pump.poll_iter() {
            let now = Instant::now();
            match event {
                Event::Quit { .. } => break 'running,
                Event::KeyDown {
                    keycode: Some(k),
                    repeat: false,
                    ..
                } => {
                    if let Some(nav) = key_to_nav(k) {
                        held.insert(nav);
                        app.handle_nav(nav, now);
                    } else {
                        app.touch(now);
                    }
                }
                Event::KeyUp { keycode: Some(k), .. } => {
                    if let Some(nav) = key_to_nav(k) {
                        held.remove(&nav);
                        app.release(nav);
                    }
                }
                Event::ControllerButtonDown { button, .. } => {
                    if let Some(nav) = button_to_nav(button) {
                        held.insert(nav);
                        app.pad_nav(nav, now);
                    } else {
                        app.touch(now);
                    }
                }
                Event::ControllerButtonUp { button, .. } => {
                    if let Some(nav) = button_to_nav(button) {
                        held.remove(&nav);
                        app.release(nav);
                    }
                }
                Event::ControllerAxisMotion {
                    which, axis, value, ..
                } => {
                    let before = axes.held();
                    if let Some(nav) = axes.update(which, axis, value) {
                        app.pad_nav(nav, now);
                    }
                    let after = axes.held();
                    for nav in before.into_iter().filter(|n| !after.contains(n)) {
                        app.release(nav);
                    }
                }
                Event::ControllerDeviceAdded { which, .. } => match controller_subsystem.open(which) {
                    Ok(gc) => {
                        info!("controller connected: {}", gc.name());
                        controllers.insert(gc.instance_id(), gc);
                    }
                    Err(e) => warn!("failed opening controller {}: {}", which, e),
                },
                Event::ControllerDeviceRemoved { which, .. } => {
                    if let Some(gc) = controllers.remove(&which) {
                        info!("controller disconnected: {}", gc.name());
                    }
                    axes.remove(which);
                }
                Event::MouseButtonDown {
                    mouse_btn: MouseButton::Left,
                    x,
                    y,
                    ..
                } => match renderer.hit_test(x, y) {
                    Some(hit) => app.click(hit, now),
                    None => app.touch(now),
                },
                Event::MouseWheel { y, .. } => {
                    renderer.scroll_by(y);
                    app.touch(now);
                }
                Event::MouseMotion { .. } | Event::FingerDown { .. } => app.touch(now),
                Event::Window { win_event, .. } => match win_event {
                    WindowEvent::FocusLost => app.focus_lost(now),
                    WindowEvent::FocusGained => app.focus_gained(),
                    _ => {}
                },
                _ => {}
            }
        }

        let now = Instant::now();
        let mut pressed: Vec<Nav> = held.iter().copied().collect();
        pressed.extend(axes.held());
        app.repeat_held(&pressed, now);
        app.tick(now);
        if app.quit {
            break 'running;
        }

        if app.visible {
            renderer.draw(&mut canvas, &font, &mut app);
            canvas.present();
        }
        std::thread::sleep(FRAME);
    }

    info!("bye");
    Ok(())
}
