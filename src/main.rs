// =============================================================================
// VULKAN TRIANGLE
// =============================================================================
//
// Opens a window and draws one colour-interpolated triangle every frame,
// with up to two frames in flight.
//
// FRAME FLOW (see frame::FrameLoop):
// 1. Wait for the current slot's fence
// 2. Acquire a swapchain image
// 3. Reset the fence, record the slot's command buffer
// 4. Submit to the graphics queue
// 5. Present, rebuilding the swapchain if it went stale or the window resized
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod renderer;
mod window;

use anyhow::{anyhow, Context, Result};
use config::Config;
use frame::{FrameLoop, FrameOutcome};
use renderer::Renderer;
use window::{EventSource, ResizeSignal, WindowHost};

fn main() -> Result<()> {
    init_logging();

    if let Err(e) = run() {
        log::error!("Fatal: {:#}", e);
        return Err(e);
    }
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    // RUST_LOG still wins when set
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();
}

fn run() -> Result<()> {
    let config = Config::load();
    log::info!("Starting Vulkan triangle");

    let resize = ResizeSignal::new();
    let mut host = WindowHost::new(&config.window, resize.clone())?;

    let Some(size) = window::wait_for_usable_size(&mut host) else {
        log::info!("Window closed before it was ever shown");
        return Ok(());
    };

    let window = host.window().ok_or_else(|| anyhow!("Window vanished after creation"))?;
    // Declared after `host` so it drops first: the surface must die before the window.
    let mut renderer = Renderer::new(&config, window, size).context("Failed to initialize renderer")?;
    let mut frames = FrameLoop::new(resize);

    let mut presented: u64 = 0;
    loop {
        host.poll_events();
        if host.close_requested() {
            break;
        }

        let outcome = match frames.draw_frame(&mut renderer, &mut host) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Frame in slot {} failed at {}", frames.current_frame(), e.op());
                return Err(e.into());
            }
        };

        match outcome {
            FrameOutcome::Presented { recreated, .. } => {
                presented += 1;
                if recreated {
                    let extent = renderer.extent();
                    log::debug!("Now rendering at {}x{}", extent.width, extent.height);
                }
            }
            FrameOutcome::Abandoned { .. } => {}
        }
    }

    renderer.wait_idle()?;
    log::info!("Exiting after {} presented frames", presented);
    Ok(())
}
