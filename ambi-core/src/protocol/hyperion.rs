//! Hyperion FlatBuffers client.
//!
//! One persistent TCP connection. Every request is a `hyperionnet.Request`
//! table behind a 4-byte big-endian length prefix:
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────────────┐
//! │ len (u32 BE) │ Request { command_type: u8, command: union } │
//! └──────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! Replies are drained after each request without being parsed.
//!
//! The server maps images onto its own LEDs, so the grabber feeds it the
//! cropped capture through [`ProtocolClient::set_raw_image`]. LED
//! sequences still work and travel as a single-row image.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flatbuffers::{FlatBufferBuilder, WIPOffset};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::{Endpoint, ProtocolClient};
use crate::error::AmbiError;
use crate::types::Color;

pub const DEFAULT_PORT: u16 = 19400;
pub const DEFAULT_ORIGIN: &str = "AmbiGrabber";

/// Priority value that clears every source on the server.
pub const CLEAR_ALL: i32 = -1;

// ── Schema ───────────────────────────────────────────────────────

/// `hyperionnet.Command` union tags.
mod command {
    pub const COLOR: u8 = 1;
    pub const IMAGE: u8 = 2;
    pub const CLEAR: u8 = 3;
    pub const REGISTER: u8 = 4;
}

/// `hyperionnet.ImageType::RawImage`.
const IMAGE_TYPE_RAW: u8 = 1;

/// Vtable offset of the `n`th field.
const fn field(n: u16) -> u16 {
    4 + 2 * n
}

// ── Encoders ─────────────────────────────────────────────────────
//
// Each encoder resets `fbb` and leaves one finished Request in it.
// Strings and vectors are created before the table that refers to them.

fn finish_request<'a, T>(fbb: &mut FlatBufferBuilder<'a>, kind: u8, body: WIPOffset<T>) {
    let start = fbb.start_table();
    fbb.push_slot::<u8>(field(0), kind, 0);
    fbb.push_slot_always::<WIPOffset<_>>(field(1), body.as_union_value());
    let request = fbb.end_table(start);
    fbb.finish(request, None);
}

pub fn encode_register(fbb: &mut FlatBufferBuilder<'_>, origin: &str, priority: i32) {
    fbb.reset();
    let origin = fbb.create_string(origin);
    let start = fbb.start_table();
    fbb.push_slot_always::<WIPOffset<_>>(field(0), origin);
    fbb.push_slot::<i32>(field(1), priority, 0);
    let register = fbb.end_table(start);
    finish_request(fbb, command::REGISTER, register);
}

pub fn encode_clear(fbb: &mut FlatBufferBuilder<'_>, priority: i32) {
    fbb.reset();
    let start = fbb.start_table();
    fbb.push_slot::<i32>(field(0), priority, 0);
    let clear = fbb.end_table(start);
    finish_request(fbb, command::CLEAR, clear);
}

pub fn encode_color(fbb: &mut FlatBufferBuilder<'_>, rgb: u32, duration_ms: i32) {
    fbb.reset();
    let start = fbb.start_table();
    fbb.push_slot::<i32>(field(0), rgb as i32, -1);
    fbb.push_slot::<i32>(field(1), duration_ms, -1);
    let color = fbb.end_table(start);
    finish_request(fbb, command::COLOR, color);
}

/// `rgb` holds `width * height` packed RGB triplets.
pub fn encode_image(
    fbb: &mut FlatBufferBuilder<'_>,
    rgb: &[u8],
    width: i32,
    height: i32,
    duration_ms: i32,
) {
    fbb.reset();
    let data = fbb.create_vector(rgb);

    let start = fbb.start_table();
    fbb.push_slot_always::<WIPOffset<_>>(field(0), data);
    fbb.push_slot::<i32>(field(1), width, -1);
    fbb.push_slot::<i32>(field(2), height, -1);
    let raw = fbb.end_table(start);

    let start = fbb.start_table();
    fbb.push_slot::<u8>(field(0), IMAGE_TYPE_RAW, 0);
    fbb.push_slot_always::<WIPOffset<_>>(field(1), raw.as_union_value());
    fbb.push_slot::<i32>(field(2), duration_ms, -1);
    let image = fbb.end_table(start);

    finish_request(fbb, command::IMAGE, image);
}

// ── HyperionClient ───────────────────────────────────────────────

pub struct HyperionClient {
    endpoint: Endpoint,
    priority: i32,
    origin: String,
    connect_timeout: Duration,
    framed: Option<Framed<TcpStream, LengthDelimitedCodec>>,
    builder: FlatBufferBuilder<'static>,
    rgb: Vec<u8>,
}

impl HyperionClient {
    pub fn new(endpoint: Endpoint, priority: i32, origin: String, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            priority,
            origin,
            connect_timeout,
            framed: None,
            builder: FlatBufferBuilder::with_capacity(1024),
            rgb: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Write the request sitting in `builder`, then discard pending replies.
    async fn send_request(&mut self) -> Result<(), AmbiError> {
        let framed = self.framed.as_mut().ok_or(AmbiError::NotConnected)?;
        let payload = Bytes::copy_from_slice(self.builder.finished_data());

        let result = match framed.send(payload).await {
            Ok(()) => drain_replies(framed),
            Err(e) => Err(AmbiError::from(e)),
        };

        if let Err(e) = &result {
            tracing::warn!(endpoint = %self.endpoint, "hyperion request failed: {}", e);
            self.framed = None;
        }
        result
    }
}

/// Consume every reply that has already arrived. Never waits.
fn drain_replies(framed: &mut Framed<TcpStream, LengthDelimitedCodec>) -> Result<(), AmbiError> {
    loop {
        match framed.next().now_or_never() {
            Some(Some(Ok(reply))) => {
                tracing::trace!(len = reply.len(), "hyperion reply discarded");
            }
            Some(Some(Err(e))) => return Err(e.into()),
            Some(None) => return Err(AmbiError::ConnectionClosed),
            None => return Ok(()),
        }
    }
}

#[async_trait]
impl ProtocolClient for HyperionClient {
    fn name(&self) -> &'static str {
        "hyperion"
    }

    async fn connect(&mut self) -> Result<(), AmbiError> {
        let addr = self.endpoint.to_string();
        tracing::info!(%addr, "connecting to hyperion");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| AmbiError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        self.framed = Some(Framed::new(stream, LengthDelimitedCodec::new()));

        encode_register(&mut self.builder, &self.origin, self.priority);
        self.send_request().await?;
        tracing::info!(%addr, priority = self.priority, origin = %self.origin, "registered with hyperion");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    async fn disconnect(&mut self) -> Result<(), AmbiError> {
        if let Some(mut framed) = self.framed.take() {
            if let Err(e) = SinkExt::<Bytes>::close(&mut framed).await {
                tracing::debug!("hyperion close: {}", e);
            }
            tracing::info!(endpoint = %self.endpoint, "disconnected from hyperion");
        }
        Ok(())
    }

    async fn clear(&mut self, priority: i32) -> Result<(), AmbiError> {
        encode_clear(&mut self.builder, priority);
        self.send_request().await
    }

    async fn set_color(
        &mut self,
        color: Color,
        _priority: i32,
        duration_ms: i32,
    ) -> Result<(), AmbiError> {
        // The Color command carries no priority; the registered one applies.
        encode_color(&mut self.builder, color.to_rgb24(), duration_ms);
        self.send_request().await
    }

    async fn set_image(
        &mut self,
        colors: &[Color],
        _priority: i32,
        duration_ms: i32,
    ) -> Result<(), AmbiError> {
        self.rgb.clear();
        self.rgb.reserve(colors.len() * 3);
        for c in colors {
            self.rgb.extend_from_slice(&[c.red, c.green, c.blue]);
        }
        // The sequence travels as a single-row image.
        let width = image_dim(colors.len())?;
        encode_image(&mut self.builder, &self.rgb, width, 1, duration_ms);
        self.send_request().await
    }

    async fn set_raw_image(
        &mut self,
        rgb: &[u8],
        width: usize,
        height: usize,
        _priority: i32,
        duration_ms: i32,
    ) -> Result<(), AmbiError> {
        if width == 0 || height == 0 {
            return Err(AmbiError::InvalidFrame("empty image"));
        }
        let expected = width * height * 3;
        if rgb.len() != expected {
            return Err(AmbiError::FrameTooShort {
                expected,
                actual: rgb.len(),
            });
        }
        encode_image(
            &mut self.builder,
            rgb,
            image_dim(width)?,
            image_dim(height)?,
            duration_ms,
        );
        self.send_request().await
    }
}

fn image_dim(n: usize) -> Result<i32, AmbiError> {
    i32::try_from(n).map_err(|_| AmbiError::InvalidFrame("image dimension out of range"))
}

impl Default for HyperionClient {
    fn default() -> Self {
        Self::new(
            Endpoint::new("127.0.0.1", DEFAULT_PORT),
            100,
            DEFAULT_ORIGIN.to_string(),
            Duration::from_secs(1),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
