use std::{path::PathBuf, process::ExitCode, time::Instant};

use clap::Parser;
use ocrpoint::{
    Config, CursorPosition, ImageCapture, RequestCoordinator, ScreenPoint, ScreenReaderBuilder,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Find a word on screen and print where to click.
#[derive(Debug, Parser)]
struct Args {
    /// Anchor point as `x,y`, usually where the user is looking.
    #[arg(long)]
    anchor: ScreenPoint,

    /// Text to look for.
    #[arg(long)]
    query: String,

    /// before, middle or after the matched word.
    #[arg(long, default_value = "middle")]
    position: CursorPosition,

    /// Screenshot to search instead of the live screen.
    #[arg(long)]
    image: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run(Args::parse()) {
        Ok(Some(point)) => {
            println!("{},{}", point.x, point.y);
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("no match");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(args: Args) -> Result<Option<ScreenPoint>, Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut builder = ScreenReaderBuilder::from_config(&config);
    if let Some(path) = &args.image {
        builder = builder.capture(ImageCapture::new(image::open(path)?));
    }
    let coordinator = RequestCoordinator::new(builder.build()?)?;

    let start = Instant::now();
    let request = coordinator.begin(args.anchor);
    let results = coordinator.await_result(request)?;
    log::debug!(
        "Read {} words in {:?}",
        results.observations().len(),
        start.elapsed()
    );
    Ok(coordinator.locate_word(&results, &args.query, args.anchor, args.position))
}
