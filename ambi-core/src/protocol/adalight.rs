//! Adalight family over a serial port.
//!
//! Every frame starts with the same 6-byte header:
//!
//! ```text
//! ┌─────────────┬───────────────────┬────────────────┐
//! │ "Ada"/"Awa" │ count-1 (u16 BE)  │ hi ^ lo ^ 0x55 │
//! └─────────────┴───────────────────┴────────────────┘
//! ```
//!
//! - ADA: RGB per LED.
//! - LBAPA: 4 zero bytes, `0xFF R G B` per LED, `ceil(count/16)` zero bytes.
//! - AWA: RGB per LED, then Fletcher-style `f1, f2, ext` (all mod 255).
//!
//! Serial I/O is blocking, so every write runs on the blocking pool.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPortType;

use super::{AdalightProtocol, ProtocolClient, MAX_LEDS};
use crate::error::AmbiError;
use crate::types::{Color, ColorSequence, LedTopology};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

const HEADER_LEN: usize = 6;
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

// ── Packet builders ──────────────────────────────────────────────

/// `count` is at most [`MAX_LEDS`].
fn write_header(out: &mut Vec<u8>, magic: &[u8; 3], count: usize) {
    let [hi, lo] = u16::try_from(count.saturating_sub(1))
        .unwrap_or(u16::MAX)
        .to_be_bytes();
    out.extend_from_slice(magic);
    out.extend_from_slice(&[hi, lo, hi ^ lo ^ 0x55]);
}

/// `f1, f2, ext` over `payload`. `ext` mixes in each byte's 1-based position.
pub fn awa_checksum(payload: &[u8]) -> [u8; 3] {
    let (mut f1, mut f2, mut ext) = (0u32, 0u32, 0u32);
    for (i, &byte) in payload.iter().enumerate() {
        let position = (i + 1) as u32;
        ext = (ext + (byte as u32 ^ position)) % 255;
        f1 = (f1 + byte as u32) % 255;
        f2 = (f2 + f1) % 255;
    }
    [f1 as u8, f2 as u8, ext as u8]
}

/// Encode one frame into `out`, replacing its contents.
pub fn encode_frame(out: &mut Vec<u8>, protocol: AdalightProtocol, colors: &[Color]) {
    out.clear();
    match protocol {
        AdalightProtocol::Ada => {
            write_header(out, b"Ada", colors.len());
            for c in colors {
                out.extend_from_slice(&[c.red, c.green, c.blue]);
            }
        }
        AdalightProtocol::Lbapa => {
            write_header(out, b"Ada", colors.len());
            out.extend_from_slice(&[0; 4]);
            for c in colors {
                out.extend_from_slice(&[0xFF, c.red, c.green, c.blue]);
            }
            out.resize(out.len() + colors.len().div_ceil(16), 0);
        }
        AdalightProtocol::Awa => {
            write_header(out, b"Awa", colors.len());
            for c in colors {
                out.extend_from_slice(&[c.red, c.green, c.blue]);
            }
            let checksum = awa_checksum(&out[HEADER_LEN..]);
            out.extend_from_slice(&checksum);
        }
    }
}

// ── Discovery ────────────────────────────────────────────────────

/// Serial devices worth trying, USB adapters first.
pub fn candidate_ports() -> Result<Vec<String>, AmbiError> {
    let mut ports = serialport::available_ports()?;
    if ports.is_empty() {
        return Err(AmbiError::NoSerialDevice);
    }
    for p in &ports {
        match &p.port_type {
            SerialPortType::UsbPort(usb) => tracing::debug!(
                port = %p.port_name,
                vid = usb.vid,
                pid = usb.pid,
                "found usb serial device"
            ),
            other => tracing::debug!(port = %p.port_name, kind = ?other, "found serial device"),
        }
    }
    ports.sort_by_key(|p| !matches!(p.port_type, SerialPortType::UsbPort(_)));
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Open the first candidate that accepts `baud`.
fn open_first(
    candidates: Vec<String>,
    baud: u32,
) -> Result<(String, Box<dyn serialport::SerialPort>), AmbiError> {
    let mut last = AmbiError::NoSerialDevice;
    for path in candidates {
        match serialport::new(&path, baud).timeout(WRITE_TIMEOUT).open() {
            Ok(port) => return Ok((path, port)),
            Err(e) => {
                tracing::debug!(port = %path, "cannot open: {}", e);
                last = e.into();
            }
        }
    }
    Err(last)
}

// ── AdalightClient ───────────────────────────────────────────────

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

struct SerialWriter(Box<dyn serialport::SerialPort>);

impl Write for SerialWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

pub struct AdalightClient {
    port_path: Option<String>,
    baud_rate: u32,
    protocol: AdalightProtocol,
    topology: LedTopology,
    writer: Option<SharedWriter>,
    device: Option<String>,
    packet: Vec<u8>,
    solid: ColorSequence,
}

impl AdalightClient {
    /// `port_path` of `None` auto-detects on connect.
    pub fn new(
        port_path: Option<String>,
        baud_rate: u32,
        protocol: AdalightProtocol,
        topology: LedTopology,
    ) -> Self {
        Self {
            port_path,
            baud_rate: if baud_rate == 0 { DEFAULT_BAUD_RATE } else { baud_rate },
            protocol,
            topology,
            writer: None,
            device: None,
            packet: Vec::new(),
            solid: Vec::new(),
        }
    }

    /// Use an already-open byte stream instead of opening a serial port.
    pub fn attach(&mut self, name: &str, writer: Box<dyn Write + Send>) {
        self.writer = Some(Arc::new(Mutex::new(writer)));
        self.device = Some(name.to_string());
    }

    /// Device currently in use.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    async fn write_frame(&mut self, colors: &[Color]) -> Result<(), AmbiError> {
        let writer = self.writer.clone().ok_or(AmbiError::NotConnected)?;
        if colors.is_empty() {
            return Ok(());
        }
        if colors.len() > MAX_LEDS {
            return Err(AmbiError::InvalidFrame("too many LEDs for the adalight header"));
        }
        encode_frame(&mut self.packet, self.protocol, colors);

        let packet = std::mem::take(&mut self.packet);
        let (packet, result) = tokio::task::spawn_blocking(move || {
            let mut w = writer.lock().unwrap_or_else(|e| e.into_inner());
            let result = w.write_all(&packet).and_then(|_| w.flush());
            (packet, result)
        })
        .await
        .map_err(|e| AmbiError::Other(format!("serial writer task failed: {}", e)))?;
        self.packet = packet;

        result.map_err(|e| {
            tracing::warn!(device = ?self.device, "serial write failed: {}", e);
            self.writer = None;
            AmbiError::from(e)
        })
    }

    async fn write_solid(&mut self, color: Color) -> Result<(), AmbiError> {
        let mut solid = std::mem::take(&mut self.solid);
        solid.clear();
        solid.resize(self.topology.total_leds(), color);
        let result = self.write_frame(&solid).await;
        self.solid = solid;
        result
    }
}

#[async_trait]
impl ProtocolClient for AdalightClient {
    fn name(&self) -> &'static str {
        "adalight"
    }

    async fn connect(&mut self) -> Result<(), AmbiError> {
        let configured = self.port_path.clone();
        let baud = self.baud_rate;

        let (path, port) = tokio::task::spawn_blocking(move || {
            let candidates = match configured {
                Some(p) => vec![p],
                None => candidate_ports()?,
            };
            open_first(candidates, baud)
        })
        .await
        .map_err(|e| AmbiError::Other(format!("serial open task failed: {}", e)))??;

        tracing::info!(device = %path, baud, protocol = ?self.protocol, "adalight port open");
        self.attach(&path, Box::new(SerialWriter(port)));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    async fn disconnect(&mut self) -> Result<(), AmbiError> {
        if self.writer.take().is_some() {
            tracing::info!(device = ?self.device, "adalight port closed");
        }
        self.device = None;
        Ok(())
    }

    async fn clear(&mut self, _priority: i32) -> Result<(), AmbiError> {
        self.write_solid(Color::BLACK).await
    }

    async fn set_color(
        &mut self,
        color: Color,
        _priority: i32,
        _duration_ms: i32,
    ) -> Result<(), AmbiError> {
        self.write_solid(color).await
    }

    async fn set_image(
        &mut self,
        colors: &[Color],
        _priority: i32,
        _duration_ms: i32,
    ) -> Result<(), AmbiError> {
        self.write_frame(colors).await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn colors(n: usize) -> Vec<Color> {
        (0..n).map(|i| Color::new(i as u8, 0x10, 0x20)).collect()
    }

    #[test]
    fn header_checksum() {
        let mut out = Vec::new();
        encode_frame(&mut out, AdalightProtocol::Ada, &colors(300));
        // 299 = 0x012B
        assert_eq!(&out[..6], &[b'A', b'd', b'a', 0x01, 0x2B, 0x01 ^ 0x2B ^ 0x55]);
        assert_eq!(out.len(), 6 + 900);
    }

    #[test]
    fn lbapa_frames() {
        let mut out = Vec::new();
        encode_frame(&mut out, AdalightProtocol::Lbapa, &colors(20));
        assert_eq!(out.len(), 6 + 4 + 20 * 4 + 2);
        assert_eq!(&out[6..10], &[0, 0, 0, 0]);
        assert_eq!(&out[10..14], &[0xFF, 0, 0x10, 0x20]);
        assert_eq!(&out[out.len() - 2..], &[0, 0]);

        encode_frame(&mut out, AdalightProtocol::Lbapa, &colors(16));
        assert_eq!(out.len(), 6 + 4 + 64 + 1);
    }

    #[test]
    fn awa_small_checksum() {
        assert_eq!(awa_checksum(&[1, 2, 3]), [6, 10, 0]);

        let mut out = Vec::new();
        encode_frame(&mut out, AdalightProtocol::Awa, &[Color::new(1, 2, 3)]);
        assert_eq!(&out[..3], b"Awa");
        assert_eq!(&out[6..], &[1, 2, 3, 6, 10, 0]);
    }

    #[tokio::test]
    async fn attached_writer_receives_frames() {
        let buf = SharedBuf::default();
        let mut client =
            AdalightClient::new(None, 0, AdalightProtocol::Ada, LedTopology::new(1, 1));
        client.attach("test", Box::new(buf.clone()));
        assert!(client.is_connected());

        client.set_color(Color::new(5, 6, 7), 0, -1).await.unwrap();
        let written = buf.0.lock().unwrap().clone();
        assert_eq!(written.len(), 6 + 4 * 3);
        assert_eq!(&written[6..9], &[5, 6, 7]);
    }

    #[tokio::test]
    async fn write_failure_disconnects() {
        let mut client =
            AdalightClient::new(None, 0, AdalightProtocol::Awa, LedTopology::new(1, 1));
        client.attach("broken", Box::new(Broken));
        let err = client.set_image(&colors(4), 0, -1).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn oversized_frame_is_refused_unsent() {
        let buf = SharedBuf::default();
        let mut client =
            AdalightClient::new(None, 0, AdalightProtocol::Ada, LedTopology::new(1, 1));
        client.attach("test", Box::new(buf.clone()));

        let err = client
            .set_image(&vec![Color::BLACK; MAX_LEDS + 1], 0, -1)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(buf.0.lock().unwrap().is_empty());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn missing_device_fails_to_connect() {
        let mut client = AdalightClient::new(
            Some("/dev/ambi-grabber-does-not-exist".into()),
            DEFAULT_BAUD_RATE,
            AdalightProtocol::Ada,
            LedTopology::new(1, 1),
        );
        let err = client.connect().await.unwrap_err();
        assert!(err.is_transport());
        assert!(!client.is_connected());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// The trailing three bytes of any AWA frame match a checksum
    /// recomputed from unreduced sums.
    #[test]
    fn prop_awa_checksum_recomputes() {
        proptest!(|(
            raw in prop::collection::vec(any::<(u8, u8, u8)>(), 1..=700),
        )| {
            let colors: Vec<Color> = raw.iter().map(|&(r, g, b)| Color::new(r, g, b)).collect();
            let mut out = Vec::new();
            encode_frame(&mut out, AdalightProtocol::Awa, &colors);

            let payload = &out[HEADER_LEN..out.len() - 3];
            prop_assert_eq!(payload.len(), colors.len() * 3);

            let (mut sum, mut prefix_sum, mut ext) = (0u64, 0u64, 0u64);
            for (i, &b) in payload.iter().enumerate() {
                sum += b as u64;
                prefix_sum += sum;
                ext += (b as u64) ^ (i as u64 + 1);
            }
            let expected = [(sum % 255) as u8, (prefix_sum % 255) as u8, (ext % 255) as u8];
            prop_assert_eq!(&out[out.len() - 3..], &expected[..]);
        });
    }
}
