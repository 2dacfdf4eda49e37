//! LED controller wire protocols.
//!
//! Each sub-module implements [`ProtocolClient`] for one controller
//! family. The connection manager only ever sees `Box<dyn ProtocolClient>`
//! built by [`create_client`], so adding a transport does not touch it.

pub mod adalight;
pub mod hyperion;
pub mod wled;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AmbiError;
use crate::types::{Color, LedTopology};

pub use adalight::AdalightClient;
pub use hyperion::HyperionClient;
pub use wled::WledClient;

/// Hyperion's "no expiry" duration.
pub const INFINITE_DURATION: i32 = -1;

/// Largest strip the 16-bit LED fields of WLED and Adalight can address.
pub const MAX_LEDS: usize = u16::MAX as usize;

// ── ProtocolClient ───────────────────────────────────────────────

/// One connected LED controller.
///
/// All sends take `&mut self`: a client is driven by exactly one task.
#[async_trait]
pub trait ProtocolClient: Send {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    async fn connect(&mut self) -> Result<(), AmbiError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), AmbiError>;

    /// Release `priority`; `-1` clears every priority where supported.
    async fn clear(&mut self, priority: i32) -> Result<(), AmbiError>;

    async fn set_color(
        &mut self,
        color: Color,
        priority: i32,
        duration_ms: i32,
    ) -> Result<(), AmbiError>;

    async fn set_image(
        &mut self,
        colors: &[Color],
        priority: i32,
        duration_ms: i32,
    ) -> Result<(), AmbiError>;

    /// Send a packed RGB image for a server that does its own LED mapping.
    /// Clients that only drive strips reject it as a bad frame.
    async fn set_raw_image(
        &mut self,
        _rgb: &[u8],
        _width: usize,
        _height: usize,
        _priority: i32,
        _duration_ms: i32,
    ) -> Result<(), AmbiError> {
        Err(AmbiError::InvalidFrame("raw images need a server-side LED mapping"))
    }

    /// How often [`keep_alive`](Self::keep_alive) must run while idle.
    /// `None` for transports that hold state on their own.
    fn keep_alive_interval(&self) -> Option<Duration> {
        None
    }

    /// Refresh the controller so it does not fall back to its own effects.
    async fn keep_alive(&mut self) -> Result<(), AmbiError> {
        Ok(())
    }
}

// ── Options ──────────────────────────────────────────────────────

/// Which controller family to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    #[default]
    Hyperion,
    Wled,
    Adalight,
}

impl ConnectionKind {
    /// The controller maps whole images onto its LEDs itself, so it is
    /// fed cropped frames rather than extracted, smoothed LED colors.
    pub fn maps_images(self) -> bool {
        matches!(self, Self::Hyperion)
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hyperion => write!(f, "hyperion"),
            Self::Wled => write!(f, "wled"),
            Self::Adalight => write!(f, "adalight"),
        }
    }
}

/// Byte order of the three channels on the strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    #[default]
    Rgb,
    Grb,
    Brg,
    Rbg,
    Gbr,
    Bgr,
}

impl ColorOrder {
    /// The three output bytes for `c`, in strip order.
    #[inline]
    pub fn apply(self, c: Color) -> [u8; 3] {
        let Color { red: r, green: g, blue: b } = c;
        match self {
            Self::Rgb => [r, g, b],
            Self::Grb => [g, r, b],
            Self::Brg => [b, r, g],
            Self::Rbg => [r, b, g],
            Self::Gbr => [g, b, r],
            Self::Bgr => [b, g, r],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WledProtocol {
    #[default]
    Ddp,
    UdpRaw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdalightProtocol {
    #[default]
    Ada,
    Lbapa,
    Awa,
}

// ── Endpoint ─────────────────────────────────────────────────────

/// Host and port of a network controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── ClientConfig ─────────────────────────────────────────────────

/// Everything needed to build any of the clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub kind: ConnectionKind,
    pub host: String,
    pub port: u16,
    pub priority: i32,
    /// Hyperion origin shown in the remote's priority list.
    pub origin: String,
    pub topology: LedTopology,
    pub connect_timeout: Duration,
    pub color_order: ColorOrder,
    pub wled_protocol: WledProtocol,
    pub adalight_protocol: AdalightProtocol,
    pub baud_rate: u32,
    /// Explicit serial device; auto-detected when `None`.
    pub serial_port: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            kind: ConnectionKind::Hyperion,
            host: String::new(),
            port: hyperion::DEFAULT_PORT,
            priority: 100,
            origin: hyperion::DEFAULT_ORIGIN.to_string(),
            topology: LedTopology::new(16, 9),
            connect_timeout: Duration::from_secs(1),
            color_order: ColorOrder::Rgb,
            wled_protocol: WledProtocol::Ddp,
            adalight_protocol: AdalightProtocol::Ada,
            baud_rate: adalight::DEFAULT_BAUD_RATE,
            serial_port: None,
        }
    }
}

impl ClientConfig {
    /// Reject configurations no client could ever connect with.
    pub fn validate(&self) -> Result<(), AmbiError> {
        let name = match self.kind {
            ConnectionKind::Hyperion => "hyperion",
            ConnectionKind::Wled => "wled",
            ConnectionKind::Adalight => "adalight",
        };
        match self.kind {
            ConnectionKind::Hyperion => {
                if self.host.trim().is_empty() {
                    return Err(AmbiError::MissingHost(name));
                }
                if self.port == 0 {
                    return Err(AmbiError::MissingPort(name));
                }
            }
            ConnectionKind::Wled => {
                if self.host.trim().is_empty() {
                    return Err(AmbiError::MissingHost(name));
                }
            }
            ConnectionKind::Adalight => {
                if self.baud_rate == 0 {
                    return Err(AmbiError::InvalidConfig("baud rate must be positive".into()));
                }
            }
        }
        self.topology.validate()?;

        let leds = self.topology.total_leds();
        if self.kind != ConnectionKind::Hyperion && leds > MAX_LEDS {
            return Err(AmbiError::InvalidConfig(format!(
                "{leds} LEDs exceed the {name} limit of {MAX_LEDS}"
            )));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.trim(), self.port)
    }
}

/// Build the client selected by `config.kind`. Nothing is opened yet.
pub fn create_client(config: &ClientConfig) -> Result<Box<dyn ProtocolClient>, AmbiError> {
    config.validate()?;
    let client: Box<dyn ProtocolClient> = match config.kind {
        ConnectionKind::Hyperion => Box::new(HyperionClient::new(
            config.endpoint(),
            config.priority,
            config.origin.clone(),
            config.connect_timeout,
        )),
        ConnectionKind::Wled => Box::new(WledClient::new(
            config.host.trim(),
            config.port,
            config.wled_protocol,
            config.color_order,
            config.topology,
        )),
        ConnectionKind::Adalight => Box::new(AdalightClient::new(
            config.serial_port.clone(),
            config.baud_rate,
            config.adalight_protocol,
            config.topology,
        )),
    };
    Ok(client)
}

// ── Tests ────────────────────────────────────────────────────────
