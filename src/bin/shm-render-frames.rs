// Render a run of frames through a render context and save them as PNG files.
//
//   shm-render-frames --shader XsBXWt --size 640x360 --frames 90 --out frames/

use clap::Parser;
use shm_render::{ContextParams, FrameDriver, RenderConfig, RendererEnvironment};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Render shader frames through shared memory and save them as PNG")]
struct Args {
    /// Shader identifier passed to the renderer
    #[arg(long, default_value = "XsBXWt")]
    shader: String,

    /// Frame size as WIDTHxHEIGHT
    #[arg(long, default_value = "640x360", value_parser = parse_size)]
    size: (u32, u32),

    /// Number of frames to render
    #[arg(long, default_value_t = 100)]
    frames: u32,

    /// Frames per second used to derive frame times
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Output directory
    #[arg(long, default_value = "frames")]
    out: PathBuf,

    /// Access key for the renderer
    #[arg(long, env = "SHADERTOY_KEY", default_value = "")]
    key: String,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    Ok((w, h))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        tracing::error!(error = %e, "render run failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.fps <= 0.0 {
        return Err("fps must be positive".into());
    }
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    std::fs::create_dir_all(&args.out)?;

    let env = RendererEnvironment::initialize(RenderConfig::from_env()?)?;
    let driver = FrameDriver::default();
    let (width, height) = args.size;
    let params = ContextParams::new(width, height, &args.shader).with_credential(&args.key);
    let handle = driver.create_context(&env, &params)?;

    let mut result = Ok(());
    for i in 0..args.frames {
        if !running.load(Ordering::SeqCst) {
            tracing::info!(frame = i, "interrupted, stopping");
            break;
        }
        let time = i as f64 / args.fps;
        let saved = driver.with_context(handle, |context| -> shm_render::Result<Vec<u8>> {
            context.render(time)?;
            Ok(context.frame().to_vec())
        });
        let pixels = match saved {
            Ok(Ok(pixels)) => pixels,
            Ok(Err(e)) | Err(e) => {
                result = Err(e.into());
                break;
            }
        };

        let path = args.out.join(format!("frame_{:03}.png", i));
        if let Err(e) = image::save_buffer(&path, &pixels, width, height, image::ColorType::Rgba8) {
            result = Err(e.into());
            break;
        }
        tracing::info!(frame = i, time, path = %path.display(), "frame saved");
    }

    if let Err(e) = driver.close_context(handle) {
        tracing::warn!(error = %e, "context closed with errors");
    }
    result
}
