//! fxgraph CLI renderer
//!
//! Renders an image through a chain of bundled effects on the GPU and saves
//! the final frame.
//!
//! # Usage
//! ```bash
//! cargo run --example cli -- input.png output.png -e filter/invert -e filter/trail --frames 30 -p amount=0.8
//! ```

use clap::Parser;
use fxgraph_wgpu::backend::{Backend, SurfaceDesc, SurfaceFormat};
use fxgraph_wgpu::{BoundSurface, EffectChain, EffectInstance, FrameContext, WgpuBackend, presets};
use fxgraph_wgpu_build::definition::ParamValue;
use image::GenericImageView;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Render an image through a chain of fxgraph effects")]
struct Args {
    /// Input image file path
    input: Option<PathBuf>,

    /// Output image file path
    output: Option<PathBuf>,

    /// Effect id, repeat to build a chain
    #[arg(long, short)]
    effect: Vec<String>,

    /// Parameter as name=value, applied to every effect declaring it
    #[arg(long = "param", short)]
    params: Vec<String>,

    /// Number of frames to render before saving
    #[arg(long, short, default_value = "1")]
    frames: u32,

    /// Frame rate used to derive time and deltaTime
    #[arg(long, default_value = "60.0")]
    fps: f64,

    /// Length of the animation loop oscillating parameters follow, in seconds
    #[arg(long, default_value = "10.0")]
    duration: f64,

    /// List bundled effects and exit
    #[arg(long)]
    list: bool,
}

/// Parses a command-line parameter value
///
/// Booleans, integers, floats and comma separated vectors are recognized.
fn parse_value(value: &str) -> Result<ParamValue, String> {
    match value {
        "true" => return Ok(ParamValue::Bool(true)),
        "false" => return Ok(ParamValue::Bool(false)),
        _ => {}
    }
    if let Ok(int) = value.parse::<i64>() {
        return Ok(ParamValue::Int(int));
    }
    if value.contains(',') {
        let components = value.split(',').map(|c| c.trim().parse::<f64>()).collect::<Result<Vec<_>, _>>().map_err(|e| format!("Invalid vector '{value}': {e}"))?;
        return Ok(ParamValue::Vector(components));
    }
    value.parse::<f64>().map(ParamValue::Float).map_err(|_| format!("Invalid value '{value}'"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();

    if args.list {
        for id in presets::ids() {
            let effect = presets::load(id)?;
            println!("{id:<16} {}", effect.definition.description.as_deref().unwrap_or(""));
        }
        return Ok(());
    }

    let (Some(input), Some(output)) = (&args.input, &args.output) else {
        return Err("Input and output paths are required".into());
    };
    if args.effect.is_empty() {
        return Err("At least one --effect is required".into());
    }

    let mut params = Vec::new();
    for param in &args.params {
        let (name, value) = param.split_once('=').ok_or_else(|| format!("Parameter '{param}' is not name=value"))?;
        params.push((name.to_string(), parse_value(value)?));
    }

    let mut chain = EffectChain::new();
    for id in &args.effect {
        let mut instance = EffectInstance::new(presets::load(id)?)?;
        for (name, value) in &params {
            if instance.effect().definition.globals.contains_key(name) {
                instance.set_param(name, value.clone())?;
            }
        }
        chain.push(instance);
    }

    println!("Loading image from: {}", input.display());
    let image = image::open(input)?;
    let (width, height) = image.dimensions();
    let pixels: Vec<[f32; 4]> = image.to_rgba32f().pixels().map(|pixel| pixel.0).collect();

    println!("Initializing GPU...");
    let mut backend = WgpuBackend::headless()?;
    let source = backend.create_surface(&SurfaceDesc {
        label: "Input Image".to_string(),
        width,
        height,
        format: SurfaceFormat::Rgba16Float,
    })?;
    backend.write_surface(source, &pixels)?;
    let source = BoundSurface { id: source, extent: (width, height) };

    let delta = 1.0 / args.fps;
    let mut result = None;
    for frame in 0..args.frames.max(1) {
        let context = FrameContext::new(frame as f64 * delta, delta, (width, height))
            .with_duration(args.duration)
            .with_input("inputTex", source)
            .with_input("imageTex", source);
        let rendered = chain.render_frame(&mut backend, &context);
        for (id, error) in &rendered.errors {
            eprintln!("Effect '{id}' disabled: {error}");
        }
        result = rendered.color;
    }

    let result = result.ok_or("The chain produced no color output")?;
    let (out_width, out_height) = result.extent;
    let data: Vec<f32> = backend.read_surface(result.id)?.into_iter().flatten().collect();
    let image = image::Rgba32FImage::from_raw(out_width, out_height, data).ok_or("Failed to create image from output")?;
    image::DynamicImage::ImageRgba32F(image).to_rgba8().save(output)?;
    println!("Saved {out_width}x{out_height} result to: {}", output.display());

    chain.destroy(&mut backend);
    backend.destroy_surface(source.id);
    Ok(())
}
