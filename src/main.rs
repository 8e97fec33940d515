use anyhow::Result;
use clap::Parser;
use motioncam::config::SourceKind;
use motioncam::encoder::SyntheticEncoderFactory;
use motioncam::source::{MotionWindow, SyntheticSource};
use motioncam::{EncoderFactory, MotionCamConfig, MotionCamOrchestrator, ShutdownReason, VideoSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "motioncam")]
#[command(about = "Motion-triggered video capture with pre-roll and post-roll event clips")]
#[command(version)]
#[command(long_about = "Continuously records a live video source into a rolling pre-roll buffer, \
scores frame pairs for motion and, when motion persists, assembles an event clip from the \
buffered pre-roll spliced with freshly recorded post-roll video.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "motioncam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the pipeline")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build the pipeline but don't start it
    #[arg(long, help = "Perform dry run - build all components but don't start them")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily rolling files in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Override the configured frame source
    #[arg(long, value_name = "SOURCE", value_parser = ["synthetic", "camera"])]
    source: Option<String>,

    /// Shut down after this many seconds
    #[arg(long, value_name = "SECONDS")]
    run_for: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Keep the file writer flushing until exit
    let log_guard = init_logging(&args)?;

    info!("Starting motioncam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let mut config = match MotionCamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(source) = args.source.as_deref() {
        config.camera.source = match source {
            "camera" => SourceKind::Camera,
            _ => SourceKind::Synthetic,
        };
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let (source, encoder_factory) = build_backends(&config)?;

    let mut orchestrator = MotionCamOrchestrator::new(config, source, encoder_factory)
        .map_err(|e| {
            error!("Failed to create orchestrator: {}", e);
            e
        })?;

    // Handle dry run mode
    if args.dry_run {
        info!("Dry run mode - pipeline built but not started");
        println!("✓ Dry run completed successfully - all components built");
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start pipeline: {}", e);
        e
    })?;

    if let Some(seconds) = args.run_for {
        let handle = orchestrator.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            info!("Run time of {}s elapsed", seconds);
            handle.request(ShutdownReason::UserRequest).await;
        });
    }

    // Run the main loop with signal handling
    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("Pipeline error during execution: {}", e);
        e
    })?;

    info!("motioncam exited with code: {}", exit_code);
    drop(log_guard);

    // Exit with appropriate code for systemd
    std::process::exit(exit_code);
}

/// Frame source and encoders matching the configured source kind
fn build_backends(
    config: &MotionCamConfig,
) -> Result<(Arc<dyn VideoSource>, Arc<dyn EncoderFactory>)> {
    match config.camera.source {
        SourceKind::Synthetic => {
            info!("Using synthetic frame source");
            let source = SyntheticSource::new(
                config.camera.name.clone(),
                config.camera.resolution,
                config.camera.fps,
            )
            .with_motion(MotionWindow::Periodic {
                every: Duration::from_secs(120),
                lasting: Duration::from_secs(3),
            });
            let factory: Arc<dyn EncoderFactory> = Arc::new(SyntheticEncoderFactory::new());
            Ok((Arc::new(source) as Arc<dyn VideoSource>, factory))
        }
        SourceKind::Camera => camera_backends(config),
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn camera_backends(
    config: &MotionCamConfig,
) -> Result<(Arc<dyn VideoSource>, Arc<dyn EncoderFactory>)> {
    use motioncam::encoder::WebmEncoderFactory;
    use motioncam::source::CameraSource;

    info!("Using camera /dev/video{}", config.camera.index);
    let camera = Arc::new(CameraSource::new(config.camera.clone()));
    let factory = WebmEncoderFactory::new(config.encoder.clone(), Arc::clone(&camera));
    Ok((camera as Arc<dyn VideoSource>, Arc::new(factory) as Arc<dyn EncoderFactory>))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn camera_backends(
    _config: &MotionCamConfig,
) -> Result<(Arc<dyn VideoSource>, Arc<dyn EncoderFactory>)> {
    anyhow::bail!("camera source requested but motioncam was built without the `camera` feature")
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
    };

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("motioncam={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![fmt_layer];
    let mut guard = None;

    if let Some(dir) = args.log_dir.as_deref() {
        let appender = tracing_appender::rolling::daily(dir, "motioncam.log");
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        );
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# motioncam configuration file");
    println!("# Every value can be overridden with MOTIONCAM_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", MotionCamConfig::default().to_toml()?);
    Ok(())
}
