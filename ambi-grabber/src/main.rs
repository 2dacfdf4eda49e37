//! Ambient light grabber entry point.
//!
//! ```text
//! ambi-grabber                         Read raw frames from stdin
//! ambi-grabber --input frames.raw      Read raw frames from a file
//! ambi-grabber --pattern               Stream a built-in test pattern
//! ambi-grabber --config <path>         Load a custom config TOML
//! ambi-grabber --gen-config            Write default config to stdout
//! ```

use std::path::PathBuf;

use ambi_core::PixelFormat;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ambi_grabber::config::GrabberConfig;
use ambi_grabber::service::GrabberService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ambi-grabber", about = "Screen-to-LED ambient light grabber")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "ambi-grabber.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Raw frame file, or "-" for stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Frame width in pixels.
    #[arg(long)]
    width: Option<usize>,

    /// Frame height in pixels.
    #[arg(long)]
    height: Option<usize>,

    /// Pixel format of raw frames.
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Generate a letterboxed test pattern instead of reading frames.
    #[arg(long)]
    pattern: bool,

    /// Frames processed per second.
    #[arg(long)]
    fps: Option<u32>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Rgba,
    Rgb565,
}

impl From<FormatArg> for PixelFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Rgba => PixelFormat::Rgba8888,
            FormatArg::Rgb565 => PixelFormat::Rgb565,
        }
    }
}

impl Cli {
    /// Command-line flags win over the file.
    fn apply(&self, config: &mut GrabberConfig) {
        let capture = &mut config.capture;
        if let Some(input) = &self.input {
            capture.input = input.clone();
        }
        if let Some(w) = self.width {
            capture.width = w;
        }
        if let Some(h) = self.height {
            capture.height = h;
        }
        if let Some(f) = self.format {
            capture.format = f.into();
        }
        if let Some(fps) = self.fps {
            capture.fps = fps;
        }
        capture.pattern |= self.pattern;
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&GrabberConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = GrabberConfig::load(&cli.config);
    cli.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ambi-grabber v{}", env!("CARGO_PKG_VERSION"));
    info!("controller: {} {}:{}", config.connection.kind, config.connection.host, config.connection.port);
    info!("leds: {}x{}", config.leds.count_x, config.leds.count_y);
    info!("capture: {}x{} @ {} fps", config.capture.width, config.capture.height, config.capture.fps);

    let service = GrabberService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
