//! Configuration for the grabber service.

use std::path::Path;
use std::time::Duration;

use ambi_core::{
    AdalightProtocol, ClientConfig, ColorOrder, ConnectionKind, ExtractMode, LedTopology,
    ManagerConfig, PipelineConfig, PixelFormat, SmoothingConfig, WledProtocol,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabberConfig {
    /// LED controller connection.
    pub connection: ConnectionSection,
    /// LED layout and extraction.
    pub leds: LedSection,
    /// Temporal smoothing.
    pub smoothing: SmoothingSection,
    /// Frame input.
    pub capture: CaptureSection,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Which controller to drive and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// "hyperion", "wled" or "adalight".
    pub kind: ConnectionKind,
    pub host: String,
    /// 0 selects the protocol default where one exists.
    pub port: u16,
    pub priority: i32,
    /// Name shown in Hyperion's priority list.
    pub origin: String,
    pub connect_timeout_ms: u64,
    pub reconnect: bool,
    pub reconnect_delay_secs: u64,
    /// Clear our priority before shutting down.
    pub clear_on_exit: bool,
    pub wled_color_order: ColorOrder,
    /// "ddp" or "udp_raw".
    pub wled_protocol: WledProtocol,
    /// "ada", "lbapa" or "awa".
    pub adalight_protocol: AdalightProtocol,
    pub baud_rate: u32,
    /// Serial device path. Empty to auto-detect.
    pub serial_port: String,
}

/// LED layout and frame analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedSection {
    /// LEDs along the top and bottom edges.
    pub count_x: u32,
    /// LEDs along the left and right edges.
    pub count_y: u32,
    /// "perimeter" or "average".
    pub mode: ExtractMode,
    pub remove_borders: bool,
    pub black_threshold: u8,
    /// Run border detection every N frames.
    pub border_check_interval: u32,
}

/// Smoothing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingSection {
    pub enabled: bool,
    pub settling_time_ms: u64,
    /// Ticks each output is held back.
    pub output_delay: usize,
    pub update_frequency_hz: u32,
}

/// Frame input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Raw frame file, or "-" for stdin. Ignored when `pattern` is set.
    pub input: String,
    /// Generate a letterboxed test pattern instead of reading frames.
    pub pattern: bool,
    pub width: usize,
    pub height: usize,
    /// "rgba8888" or "rgb565".
    pub format: PixelFormat,
    /// Frames processed per second.
    pub fps: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            kind: ConnectionKind::Hyperion,
            host: String::new(),
            port: 19400,
            priority: 100,
            origin: "AmbiGrabber".into(),
            connect_timeout_ms: 1000,
            reconnect: true,
            reconnect_delay_secs: 5,
            clear_on_exit: true,
            wled_color_order: ColorOrder::Rgb,
            wled_protocol: WledProtocol::Ddp,
            adalight_protocol: AdalightProtocol::Ada,
            baud_rate: 115_200,
            serial_port: String::new(),
        }
    }
}

impl Default for LedSection {
    fn default() -> Self {
        Self {
            count_x: 16,
            count_y: 9,
            mode: ExtractMode::Perimeter,
            remove_borders: true,
            black_threshold: 10,
            border_check_interval: 60,
        }
    }
}

impl Default for SmoothingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            settling_time_ms: 200,
            output_delay: 2,
            update_frequency_hz: 25,
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            input: "-".into(),
            pattern: false,
            width: 160,
            height: 90,
            format: PixelFormat::Rgba8888,
            fps: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl GrabberConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn topology(&self) -> LedTopology {
        LedTopology::new(self.leds.count_x, self.leds.count_y)
    }

    pub fn to_client_config(&self) -> ClientConfig {
        let c = &self.connection;
        let serial_port = match c.serial_port.trim() {
            "" => None,
            path => Some(path.to_string()),
        };
        ClientConfig {
            kind: c.kind,
            host: c.host.clone(),
            port: c.port,
            priority: c.priority,
            origin: c.origin.clone(),
            topology: self.topology(),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms.max(1)),
            color_order: c.wled_color_order,
            wled_protocol: c.wled_protocol,
            adalight_protocol: c.adalight_protocol,
            baud_rate: c.baud_rate,
            serial_port,
        }
    }

    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            priority: self.connection.priority,
            reconnect: self.connection.reconnect,
            reconnect_delay: Duration::from_secs(self.connection.reconnect_delay_secs),
            ..ManagerConfig::default()
        }
    }

    /// Clamped into the smoother's supported ranges.
    pub fn to_smoothing_config(&self) -> SmoothingConfig {
        SmoothingConfig::new(
            self.smoothing.settling_time_ms,
            self.smoothing.output_delay,
            self.smoothing.update_frequency_hz,
        )
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            topology: self.topology(),
            mode: self.leds.mode,
            remove_borders: self.leds.remove_borders,
            black_threshold: self.leds.black_threshold,
            border_check_interval: self.leds.border_check_interval.max(1),
            ..PipelineConfig::default()
        }
    }

    /// Time between two captured frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.capture.fps.clamp(1, 120)
    }
}

// ── Tests ────────────────────────────────────────────────────────
