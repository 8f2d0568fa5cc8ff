use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use glam::Vec2;
use serde_json::json;

use depth_parallax::driver::DepthUniforms;
use depth_parallax::encoding::{write_png, FrameSink};
use depth_parallax::error_codes::{envelope_for, exit_code_for, CodedError};
use depth_parallax::fit::{
    compute_aspect_fill_dimensions, compute_cover_scale_factors, DEFAULT_IMAGE_ASPECT_RATIO,
};
use depth_parallax::logging::{init_logging, LoggingConfig};
use depth_parallax::materials::MaterialRegistry;
use depth_parallax::renderer::{BackendPreference, Renderer};
use depth_parallax::scene::{load_scene, Scene};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PARALLAX_GIT_HASH"), ")");

#[derive(Debug, Parser)]
#[command(name = "parallax")]
#[command(about = "Depth-map parallax background renderer")]
#[command(version = VERSION)]
struct Cli {
    /// Print errors (and `check`/`fit` results) as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a scene and report the fit it would mount with.
    Check { scene: PathBuf },
    /// Render every frame to a PNG directory or a .mov/.mp4/.mkv file.
    Render {
        scene: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = BackendPreference::Auto)]
        backend: BackendPreference,
    },
    /// Render a single frame to PNG.
    Still {
        scene: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        frame: u32,
        /// Override the scripted pointer with a fixed "x,y" in [-1, 1].
        #[arg(long, allow_hyphen_values = true)]
        pointer: Option<String>,
        #[arg(long, value_enum, default_value_t = BackendPreference::Auto)]
        backend: BackendPreference,
    },
    /// Cover scale factors and aspect-fill dimensions for an image/viewport pair.
    Fit {
        /// Image size as WxH.
        #[arg(long)]
        image: String,
        /// Viewport size as WxH.
        #[arg(long)]
        viewport: String,
        /// Aspect ratio used for the aspect-fill size.
        #[arg(long, default_value_t = DEFAULT_IMAGE_ASPECT_RATIO)]
        aspect: f32,
    },
    /// Interactive preview window driven by the real cursor.
    #[cfg(feature = "play")]
    Play { scene: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_verbosity(cli.verbose));

    let json = cli.json;
    match run(cli.command, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json {
                match serde_json::to_string_pretty(&envelope_for(&error)) {
                    Ok(text) => println!("{text}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error: {error:#}");
            }
            ExitCode::from(exit_code_for(&error))
        }
    }
}

fn run(command: Commands, json: bool) -> Result<()> {
    let registry = MaterialRegistry::with_builtins();
    match command {
        Commands::Check { scene } => run_check(&scene, &registry, json),
        Commands::Render {
            scene,
            output,
            backend,
        } => run_render(&scene, &output, &registry, backend),
        Commands::Still {
            scene,
            output,
            frame,
            pointer,
            backend,
        } => {
            let pointer = pointer.as_deref().map(parse_pointer).transpose()?;
            run_still(&scene, &output, frame, pointer, &registry, backend)
        }
        Commands::Fit {
            image,
            viewport,
            aspect,
        } => run_fit(&image, &viewport, aspect, json),
        #[cfg(feature = "play")]
        Commands::Play { scene } => depth_parallax::play::run(&scene, registry),
    }
}

fn run_check(scene_path: &Path, registry: &MaterialRegistry, json: bool) -> Result<()> {
    let config = load_scene(scene_path)?;
    registry.resolve(&config.material)?;
    let scene = Scene::mount(config)?;

    let resolution = scene.config.output.resolution;
    let (image_width, image_height) = scene.textures.color_dimensions();
    let viewport = scene.viewport();
    let scale = scene.scale_factors();

    if json {
        let report = json!({
            "ok": true,
            "scene": scene_path.display().to_string(),
            "material": scene.config.material,
            "resolution": [resolution.width, resolution.height],
            "fps": scene.config.output.fps,
            "frames": scene.total_frames(),
            "image": [image_width, image_height],
            "viewport": [viewport.x, viewport.y],
            "scale_factors": scale,
            "overscan": scene.overscan(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "OK: {} ({}x{}, {} fps, {} frames, material {})",
        scene_path.display(),
        resolution.width,
        resolution.height,
        scene.config.output.fps,
        scene.total_frames(),
        scene.config.material
    );
    println!(
        "Image {}x{} on viewport {:.3}x{:.3}: scale factors x={:.4} y={:.4}",
        image_width, image_height, viewport.x, viewport.y, scale.x, scale.y
    );
    Ok(())
}

fn run_render(
    scene_path: &Path,
    output_path: &Path,
    registry: &MaterialRegistry,
    backend: BackendPreference,
) -> Result<()> {
    let mut scene = Scene::mount(load_scene(scene_path)?)?;
    let mut renderer = Renderer::new(&scene, registry, backend)?;
    log::info!(
        "rendering with {} backend ({})",
        renderer.backend_name(),
        renderer.backend_reason()
    );

    let (width, height) = renderer.dimensions();
    let fps = scene.config.output.fps;
    let total_frames = scene.total_frames();
    let mut sink = FrameSink::for_path(output_path, width, height, fps)?;

    for frame_index in 0..total_frames {
        let uniforms = *scene.advance(frame_index)?;
        sink.write_frame(renderer.render_frame_rgba(&uniforms)?)?;

        if frame_index % fps == 0 {
            log::info!("rendered frame {}/{}", frame_index + 1, total_frames);
        }
    }

    sink.finish()?;
    println!("Wrote {}", output_path.display());
    Ok(())
}

fn run_still(
    scene_path: &Path,
    output_path: &Path,
    frame: u32,
    pointer: Option<Vec2>,
    registry: &MaterialRegistry,
    backend: BackendPreference,
) -> Result<()> {
    let mut scene = Scene::mount(load_scene(scene_path)?)?;
    let total_frames = scene.total_frames();
    if frame >= total_frames {
        return Err(anyhow!(CodedError::usage(
            "INVALID_FRAME",
            format!("--frame {frame} is out of bounds for {total_frames} frame(s)"),
        )
        .with_details(json!({ "frame": frame, "total_frames": total_frames }))));
    }
    let mut renderer = Renderer::new(&scene, registry, backend)?;

    // Replay every frame up to `frame` so pointer smoothing lands where a full render would.
    let mut uniforms = DepthUniforms::default();
    for index in 0..=frame {
        uniforms = match pointer {
            Some(pointer) => *scene.advance_with_pointer(pointer)?,
            None => *scene.advance(index)?,
        };
    }

    let (width, height) = renderer.dimensions();
    write_png(output_path, width, height, renderer.render_frame_rgba(&uniforms)?)?;
    println!("Wrote {}", output_path.display());
    Ok(())
}

fn run_fit(image: &str, viewport: &str, aspect: f32, json: bool) -> Result<()> {
    let (image_width, image_height) = parse_size("image", image)?;
    let (viewport_width, viewport_height) = parse_size("viewport", viewport)?;

    let scale = compute_cover_scale_factors(image_width, image_height, viewport_width, viewport_height)
        .map_err(CodedError::from)?;
    let (fill_width, fill_height) =
        compute_aspect_fill_dimensions(aspect, viewport_width, viewport_height)
            .map_err(CodedError::from)?;

    if json {
        let report = json!({
            "ok": true,
            "scale_factors": scale,
            "aspect_fill": { "aspect_ratio": aspect, "width": fill_width, "height": fill_height },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("scale factors: x={:.6} y={:.6}", scale.x, scale.y);
        println!("aspect fill ({aspect}): {fill_width:.3}x{fill_height:.3}");
    }
    Ok(())
}

fn parse_size(what: &str, value: &str) -> Result<(f32, f32)> {
    let invalid = || {
        anyhow!(CodedError::usage(
            "INVALID_SIZE",
            format!("{what} size must look like WIDTHxHEIGHT, got '{value}'"),
        )
        .with_details(json!({ "argument": what, "provided": value })))
    };

    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let width: f32 = width.trim().parse().map_err(|_| invalid())?;
    let height: f32 = height.trim().parse().map_err(|_| invalid())?;
    Ok((width, height))
}

fn parse_pointer(value: &str) -> Result<Vec2> {
    let invalid = || {
        anyhow!(CodedError::usage(
            "INVALID_POINTER",
            format!("pointer must look like X,Y with both in [-1, 1], got '{value}'"),
        )
        .with_details(json!({ "provided": value })))
    };

    let (x, y) = value.split_once(',').ok_or_else(invalid)?;
    let x: f32 = x.trim().parse().map_err(|_| invalid())?;
    let y: f32 = y.trim().parse().map_err(|_| invalid())?;
    if !((-1.0..=1.0).contains(&x) && (-1.0..=1.0).contains(&y)) {
        return Err(invalid());
    }
    Ok(Vec2::new(x, y))
}
