use anyhow::Result;
use camola_cv::capture::{NokhwaSession, SystemDevices};
use camola_cv::render::LoopbackView;
use camola_cv::vision::{create_filter, FilterKind, VisionBridge};
use camola_cv::CaptureController;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// View width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// View height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Processing applied to each frame before display
    #[arg(short, long, value_enum, default_value_t = FilterKind::Passthrough)]
    filter: FilterKind,

    /// Frames buffered between capture and processing before new ones are dropped
    #[arg(long, default_value_t = 3)]
    queue_depth: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Camola CV starting");
    tracing::info!("View: {}x{} on {}", args.width, args.height, args.output_device);
    tracing::info!("Filter: {:?}", args.filter);

    let view = LoopbackView::new(&args.output_device, args.width, args.height);
    let bridge = VisionBridge::new(create_filter(args.filter));

    let mut controller = CaptureController::initialize(
        NokhwaSession::new(),
        &SystemDevices,
        Box::new(view),
        Box::new(bridge),
        args.queue_depth,
    );

    if !controller.diagnostics().is_empty() {
        tracing::warn!(
            "Capture started with {} setup problem(s); the view may stay empty",
            controller.diagnostics().len()
        );
    }

    controller.run();

    Ok(())
}
