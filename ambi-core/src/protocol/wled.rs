//! WLED realtime client over UDP.
//!
//! Two wire formats:
//!
//! ```text
//! DDP (port 4048), up to 480 LEDs per datagram:
//!   [flags, seq, type, id, offset: u32 BE, len: u16 BE] [RGB ...]
//!   flags = 0x40 (v1) | 0x01 on the last datagram of a frame
//!
//! WLED UDP realtime (port 19446):
//!   DRGB   [2, timeout]                  [RGB ...]   ≤ 490 LEDs
//!   DNRGB  [4, timeout, start: u16 BE]   [RGB ...]   ≤ 489 LEDs per datagram
//! ```
//!
//! WLED drops out of realtime mode when no data arrives for the timeout,
//! so the last frame is resent once per second.

use std::net::SocketAddr;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::{ColorOrder, ProtocolClient, WledProtocol, MAX_LEDS};
use crate::error::AmbiError;
use crate::types::{Color, ColorSequence, LedTopology};

pub const DEFAULT_PORT_DDP: u16 = 4048;
pub const DEFAULT_PORT_RAW: u16 = 19446;

const DDP_HEADER_LEN: usize = 10;
const DDP_MAX_LEDS: usize = 480;
const DDP_FLAGS_V1: u8 = 0x40;
const DDP_FLAG_PUSH: u8 = 0x01;
/// Customer-defined, RGB, 8 bits per channel.
const DDP_TYPE_RGB8: u8 = 0x80 | (1 << 3) | 5;
const DDP_ID_DISPLAY: u8 = 1;

const PROTOCOL_DRGB: u8 = 2;
const PROTOCOL_DNRGB: u8 = 4;
const DRGB_MAX_LEDS: usize = 490;
const DNRGB_MAX_LEDS: usize = 489;

/// Seconds WLED stays in realtime mode after the last datagram.
const REALTIME_TIMEOUT_SECS: u8 = 5;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Port to use when `configured` is unset (0) or the HTTP port (80).
pub fn resolve_port(protocol: WledProtocol, configured: u16) -> u16 {
    match (configured, protocol) {
        (0 | 80, WledProtocol::Ddp) => DEFAULT_PORT_DDP,
        (0 | 80, WledProtocol::UdpRaw) => DEFAULT_PORT_RAW,
        (port, _) => port,
    }
}

// ── Packet builders ──────────────────────────────────────────────

fn push_colors(out: &mut Vec<u8>, colors: &[Color], order: ColorOrder) {
    for &c in colors {
        out.extend_from_slice(&order.apply(c));
    }
}

/// LED index ranges of the DDP datagrams for a frame of `len` LEDs.
pub fn ddp_chunks(len: usize) -> impl Iterator<Item = Range<usize>> {
    (0..len)
        .step_by(DDP_MAX_LEDS)
        .map(move |start| start..(start + DDP_MAX_LEDS).min(len))
}

/// One DDP datagram. `offset` is in bytes from the start of the frame.
pub fn write_ddp_packet(
    out: &mut Vec<u8>,
    sequence: u8,
    offset: u32,
    push: bool,
    colors: &[Color],
    order: ColorOrder,
) {
    let data_len = (colors.len() * 3) as u16;
    out.clear();
    out.push(DDP_FLAGS_V1 | if push { DDP_FLAG_PUSH } else { 0 });
    out.push(sequence & 0x0F);
    out.push(DDP_TYPE_RGB8);
    out.push(DDP_ID_DISPLAY);
    out.extend_from_slice(&offset.to_be_bytes());
    out.extend_from_slice(&data_len.to_be_bytes());
    push_colors(out, colors, order);
}

pub fn write_drgb_packet(out: &mut Vec<u8>, colors: &[Color], order: ColorOrder) {
    out.clear();
    out.push(PROTOCOL_DRGB);
    out.push(REALTIME_TIMEOUT_SECS);
    push_colors(out, colors, order);
}

pub fn write_dnrgb_packet(out: &mut Vec<u8>, start: u16, colors: &[Color], order: ColorOrder) {
    out.clear();
    out.push(PROTOCOL_DNRGB);
    out.push(REALTIME_TIMEOUT_SECS);
    out.extend_from_slice(&start.to_be_bytes());
    push_colors(out, colors, order);
}

// ── WledClient ───────────────────────────────────────────────────

pub struct WledClient {
    host: String,
    port: u16,
    protocol: WledProtocol,
    order: ColorOrder,
    topology: LedTopology,
    socket: Option<UdpSocket>,
    target: Option<SocketAddr>,
    sequence: u8,
    packet: Vec<u8>,
    last_frame: ColorSequence,
}

impl WledClient {
    pub fn new(
        host: &str,
        port: u16,
        protocol: WledProtocol,
        order: ColorOrder,
        topology: LedTopology,
    ) -> Self {
        Self {
            host: host.to_string(),
            port: resolve_port(protocol, port),
            protocol,
            order,
            topology,
            socket: None,
            target: None,
            sequence: 0,
            packet: Vec::with_capacity(DDP_HEADER_LEN + DDP_MAX_LEDS * 3),
            last_frame: Vec::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Remember `colors` for keep-alive and put them on the wire.
    async fn show(&mut self, colors: &[Color]) -> Result<(), AmbiError> {
        self.last_frame.clear();
        self.last_frame.extend_from_slice(colors);
        self.transmit().await
    }

    async fn show_solid(&mut self, color: Color) -> Result<(), AmbiError> {
        self.last_frame.clear();
        self.last_frame.resize(self.topology.total_leds(), color);
        self.transmit().await
    }

    /// Send `last_frame` as one or more datagrams.
    async fn transmit(&mut self) -> Result<(), AmbiError> {
        let (Some(socket), Some(target)) = (self.socket.as_ref(), self.target) else {
            return Err(AmbiError::NotConnected);
        };
        let colors = &self.last_frame;
        if colors.len() > MAX_LEDS {
            return Err(AmbiError::InvalidFrame("too many LEDs for a WLED frame"));
        }

        let result = match self.protocol {
            WledProtocol::Ddp => {
                let mut result = Ok(());
                for range in ddp_chunks(colors.len()) {
                    self.sequence = self.sequence % 15 + 1;
                    let push = range.end == colors.len();
                    let offset = (range.start * 3) as u32;
                    write_ddp_packet(&mut self.packet, self.sequence, offset, push, &colors[range], self.order);
                    if let Err(e) = socket.send_to(&self.packet, target).await {
                        result = Err(e);
                        break;
                    }
                }
                result
            }
            WledProtocol::UdpRaw if colors.len() <= DRGB_MAX_LEDS => {
                write_drgb_packet(&mut self.packet, colors, self.order);
                socket.send_to(&self.packet, target).await.map(|_| ())
            }
            WledProtocol::UdpRaw => {
                let mut result = Ok(());
                for (i, chunk) in colors.chunks(DNRGB_MAX_LEDS).enumerate() {
                    let start = u16::try_from(i * DNRGB_MAX_LEDS).unwrap_or(u16::MAX);
                    write_dnrgb_packet(&mut self.packet, start, chunk, self.order);
                    if let Err(e) = socket.send_to(&self.packet, target).await {
                        result = Err(e);
                        break;
                    }
                }
                result
            }
        };

        result.map_err(|e| {
            tracing::warn!(%target, "wled send failed: {}", e);
            AmbiError::from(e)
        })
    }
}

#[async_trait]
impl ProtocolClient for WledClient {
    fn name(&self) -> &'static str {
        "wled"
    }

    async fn connect(&mut self) -> Result<(), AmbiError> {
        let target = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| AmbiError::Other(format!("cannot resolve {}", self.host)))?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;

        tracing::info!(%target, protocol = ?self.protocol, "wled socket ready");
        self.socket = Some(socket);
        self.target = Some(target);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn disconnect(&mut self) -> Result<(), AmbiError> {
        if self.socket.take().is_some() {
            tracing::info!(host = %self.host, "wled socket closed");
        }
        self.target = None;
        self.last_frame.clear();
        Ok(())
    }

    async fn clear(&mut self, _priority: i32) -> Result<(), AmbiError> {
        self.show_solid(Color::BLACK).await
    }

    async fn set_color(
        &mut self,
        color: Color,
        _priority: i32,
        _duration_ms: i32,
    ) -> Result<(), AmbiError> {
        self.show_solid(color).await
    }

    async fn set_image(
        &mut self,
        colors: &[Color],
        _priority: i32,
        _duration_ms: i32,
    ) -> Result<(), AmbiError> {
        self.show(colors).await
    }

    fn keep_alive_interval(&self) -> Option<Duration> {
        Some(KEEP_ALIVE_INTERVAL)
    }

    async fn keep_alive(&mut self) -> Result<(), AmbiError> {
        if !self.is_connected() || self.last_frame.is_empty() {
            return Ok(());
        }
        tracing::trace!("wled keep-alive");
        self.transmit().await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<Color> {
        (0..n)
            .map(|i| Color::new(i as u8, (i >> 8) as u8, 0xAA))
            .collect()
    }

    #[test]
    fn drgb_five_leds_is_17_bytes() {
        let mut out = Vec::new();
        write_drgb_packet(&mut out, &ramp(5), ColorOrder::Rgb);
        assert_eq!(out.len(), 17);
        assert_eq!(out[0], 2);
        assert_eq!(out[1], 5);
        assert_eq!(&out[2..5], &[0, 0, 0xAA]);
        assert_eq!(&out[14..17], &[4, 0, 0xAA]);
    }

    #[test]
    fn dnrgb_header_carries_start_index() {
        let mut out = Vec::new();
        write_dnrgb_packet(&mut out, 489, &ramp(2), ColorOrder::Grb);
        assert_eq!(&out[..4], &[4, 5, 0x01, 0xE9]);
        assert_eq!(&out[4..7], &[0, 0, 0xAA]);
        assert_eq!(out.len(), 4 + 6);
    }

    #[test]
    fn color_order_applied_to_ddp() {
        let mut out = Vec::new();
        write_ddp_packet(&mut out, 1, 0, true, &[Color::new(1, 2, 3)], ColorOrder::Bgr);
        assert_eq!(&out[DDP_HEADER_LEN..], &[3, 2, 1]);
    }

    #[test]
    fn ddp_splits_at_480_leds() {
        let chunks: Vec<_> = ddp_chunks(1000).collect();
        assert_eq!(chunks, vec![0..480, 480..960, 960..1000]);
        assert_eq!(ddp_chunks(0).count(), 0);

        let colors = ramp(1000);
        let mut out = Vec::new();
        write_ddp_packet(&mut out, 2, 480 * 3, false, &colors[480..960], ColorOrder::Rgb);
        assert_eq!(out[0], 0x40);
        assert_eq!(out[1], 2);
        assert_eq!(out[2], DDP_TYPE_RGB8);
        assert_eq!(out[3], 1);
        assert_eq!(u32::from_be_bytes(out[4..8].try_into().unwrap()), 1440);
        assert_eq!(u16::from_be_bytes([out[8], out[9]]), 1440);
        assert_eq!(out.len(), DDP_HEADER_LEN + 1440);
    }

    #[test]
    fn default_ports() {
        assert_eq!(resolve_port(WledProtocol::Ddp, 0), 4048);
        assert_eq!(resolve_port(WledProtocol::Ddp, 80), 4048);
        assert_eq!(resolve_port(WledProtocol::UdpRaw, 0), 19446);
        assert_eq!(resolve_port(WledProtocol::UdpRaw, 21324), 21324);
    }

    async fn receiver() -> (UdpSocket, u16) {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = sock.local_addr().unwrap().port();
        (sock, port)
    }

    async fn recv(sock: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; 2048];
        let n = tokio::time::timeout(Duration::from_secs(1), sock.recv(&mut buf))
            .await
            .expect("datagram within 1s")
            .unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn raw_frames_reach_receiver() {
        let (sock, port) = receiver().await;
        let mut client = WledClient::new(
            "127.0.0.1",
            port,
            WledProtocol::UdpRaw,
            ColorOrder::Rgb,
            LedTopology::new(2, 1),
        );
        client.connect().await.unwrap();

        client.set_image(&ramp(5), 0, -1).await.unwrap();
        let first = recv(&sock).await;
        assert_eq!(first.len(), 17);

        client.keep_alive().await.unwrap();
        assert_eq!(recv(&sock).await, first);

        client.clear(0).await.unwrap();
        let cleared = recv(&sock).await;
        assert_eq!(cleared.len(), 2 + 6 * 3);
        assert!(cleared[2..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn ddp_frame_ends_with_push() {
        let (sock, port) = receiver().await;
        let mut client = WledClient::new(
            "127.0.0.1",
            port,
            WledProtocol::Ddp,
            ColorOrder::Rgb,
            LedTopology::new(300, 200),
        );
        client.connect().await.unwrap();
        client.set_color(Color::new(9, 9, 9), 0, -1).await.unwrap();

        // 1000 LEDs: three datagrams, push only on the last.
        let a = recv(&sock).await;
        let b = recv(&sock).await;
        let c = recv(&sock).await;
        assert_eq!(a[0] & DDP_FLAG_PUSH, 0);
        assert_eq!(b[0] & DDP_FLAG_PUSH, 0);
        assert_eq!(c[0] & DDP_FLAG_PUSH, 1);
        assert_eq!(c.len(), DDP_HEADER_LEN + 40 * 3);
    }

    #[tokio::test]
    async fn keep_alive_is_quiet_before_first_frame() {
        let mut client = WledClient::new(
            "127.0.0.1",
            0,
            WledProtocol::Ddp,
            ColorOrder::Rgb,
            LedTopology::new(1, 1),
        );
        client.connect().await.unwrap();
        client.keep_alive().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(matches!(
            client.set_image(&ramp(1), 0, -1).await,
            Err(AmbiError::NotConnected)
        ));
    }
}
