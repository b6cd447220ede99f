//! clblur - Gaussian blur on an OpenCL device
//!
//! Decodes an image, uploads it as float pixel vectors, runs a separable
//! (column pass, then row pass) Gaussian kernel on the selected device and
//! writes the result next to the input.

mod backend;
mod context;
mod error;
mod host;
mod kernel_arg;
mod opencl;
mod pipeline;
mod pixel;

use crate::backend::ComputeBackend;
use crate::context::DeviceContext;
use crate::error::DeviceError;
use crate::host::HostBackend;
use crate::opencl::{DeviceSelection, DeviceSummary};
use crate::pipeline::{BlurConfig, BlurVariant, Channels, PassMode};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Where the kernels execute
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    /// OpenCL platform/device picked with --platform and --device
    Opencl,
    /// Built-in CPU reference device
    Host,
}

/// Command line arguments for clblur
#[derive(Parser, Debug)]
#[clap(
    name = "clblur",
    about = "Blur an image with a separable Gaussian kernel on an OpenCL device.",
    version
)]
struct Args {
    /// Image to blur
    #[clap(required_unless_present = "list_devices")]
    input: Option<PathBuf>,

    /// Output path. Defaults to output_<input file name> next to the input.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// OpenCL C source holding the blur kernels
    #[clap(short, long, default_value = "kernels/gaussian_blur.cl")]
    kernel: PathBuf,

    /// Kernel entry point. Defaults to the one matching --gray/--single-pass.
    #[clap(short, long)]
    entry_point: Option<String>,

    /// Standard deviation of the Gaussian, in pixels
    #[clap(short, long, default_value = "1.0")]
    sigma: f32,

    /// Blur a single luminance channel instead of ARGB
    #[clap(short, long)]
    gray: bool,

    /// Use the single-pass 2-D kernel (fixed sigma) instead of two 1-D passes
    #[clap(long)]
    single_pass: bool,

    /// Compute backend
    #[clap(long, value_enum, default_value = "opencl")]
    backend: BackendKind,

    /// OpenCL platform index
    #[clap(short, long, default_value = "0")]
    platform: usize,

    /// Device index within the platform (0 for first device)
    #[clap(short, long, default_value = "0")]
    device: usize,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// List available OpenCL platforms and devices and exit
    #[clap(long)]
    list_devices: bool,
}

impl Args {
    fn blur_config(&self) -> BlurConfig {
        let channels = if self.gray { Channels::Gray } else { Channels::Color };
        let passes = if self.single_pass {
            PassMode::Single
        } else {
            PassMode::Separable
        };
        let mut variant = BlurVariant::new(channels, passes);
        if let Some(entry_point) = &self.entry_point {
            variant.entry_point = entry_point.clone();
        }
        BlurConfig {
            kernel_source: self.kernel.clone(),
            sigma: self.sigma,
            variant,
        }
    }

    fn device_selection(&self) -> DeviceSelection {
        DeviceSelection {
            platform_index: self.platform,
            device_index: self.device,
        }
    }
}

/// `dir/photo.png` -> `dir/output_photo.png`
fn default_output_path(input: &Path) -> Result<PathBuf> {
    let name = input
        .file_name()
        .with_context(|| format!("Input path has no file name: {}", input.display()))?;
    let mut file_name = std::ffi::OsString::from("output_");
    file_name.push(name);
    Ok(input.with_file_name(file_name))
}

/// Lists available OpenCL devices.
fn list_opencl_devices() -> Result<()> {
    println!("Available OpenCL Platforms and Devices:");
    let platforms = match opencl::platforms() {
        Err(DeviceError::NoPlatform) => Vec::new(),
        other => other.context("Failed to get OpenCL platforms")?,
    };
    if platforms.is_empty() {
        println!("  No OpenCL platforms found.");
        return Ok(());
    }

    for (plat_idx, platform) in platforms.iter().enumerate() {
        let plat_name = platform
            .name()
            .unwrap_or_else(|_| "Unknown Platform".to_string());
        println!("\nPlatform {}: {}", plat_idx, plat_name);

        match opencl::platform_devices(platform) {
            Ok(devices) if devices.is_empty() => {
                println!("  No devices found on this platform.");
            }
            Ok(devices) => {
                for (dev_idx, device) in devices.iter().enumerate() {
                    println!("  Device {}: {}", dev_idx, DeviceSummary::query(device));
                }
            }
            Err(e) => {
                println!("  Error getting devices for this platform: {}", e);
            }
        }
    }
    Ok(())
}

/// Run the pipeline and always tear the context down afterwards. A pipeline
/// error wins over a teardown error.
fn blur_on<B: ComputeBackend>(
    mut ctx: DeviceContext<B>,
    config: &BlurConfig,
    image: &DynamicImage,
) -> Result<DynamicImage, DeviceError> {
    log::info!(
        "Blurring on {} (work-group limit {})",
        ctx.device_name(),
        ctx.max_work_group_size()
    );
    let blurred = pipeline::blur_image(&mut ctx, config, image);
    log::debug!(
        "Tearing down {} buffer(s) and {} kernel(s)",
        ctx.live_buffers(),
        ctx.live_kernels()
    );
    let released = ctx.teardown();
    if let Err(e) = &released {
        log::warn!("Device teardown incomplete: {}", e);
    }
    let blurred = blurred?;
    released?;
    Ok(blurred)
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        return list_opencl_devices();
    }

    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let Some(input) = args.input.as_deref() else {
        bail!("No input image given");
    };
    let output = match &args.output {
        Some(path) => path.clone(),
        None => default_output_path(input)?,
    };
    let config = args.blur_config();

    log::info!("Starting clblur on {}", input.display());
    let image = image::open(input)
        .with_context(|| format!("Failed to decode image {}", input.display()))?;
    log::info!(
        "Decoded {}x{} image ({:?})",
        image.width(),
        image.height(),
        image.color()
    );

    let outcome = match args.backend {
        BackendKind::Opencl => DeviceContext::initialize(&args.device_selection())
            .and_then(|ctx| blur_on(ctx, &config, &image)),
        BackendKind::Host => {
            log::info!("Using the host reference device");
            blur_on(DeviceContext::with_backend(HostBackend::new()), &config, &image)
        }
    };

    let blurred = match outcome {
        Ok(blurred) => blurred,
        Err(e) if e.is_fatal() => {
            log::error!("{}", e);
            std::process::exit(1);
        }
        Err(e) => {
            let context = match e.status_code() {
                Some(code) => format!("Blur pipeline failed with device status {}", code),
                None => "Blur pipeline failed".to_string(),
            };
            return Err(e).context(context);
        }
    };

    // Formats without alpha (JPEG, BMP) get RGB back.
    let blurred = if config.variant.channels == Channels::Color && !image.color().has_alpha() {
        DynamicImage::ImageRgb8(blurred.to_rgb8())
    } else {
        blurred
    };
    blurred
        .save(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    log::info!("Wrote {}", output.display());
    Ok(())
}
