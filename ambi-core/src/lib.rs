//! # ambi-core
//!
//! Screen-to-LED ambient lighting pipeline.
//!
//! This crate contains:
//! - **Frame model**: `Frame`, `Color`, `PixelFormat`, `LedTopology`, `CropRect`
//! - **Border detection**: `BorderProcessor` with debounced letterbox estimates
//! - **Extraction**: `LedDataExtractor` sampling the frame perimeter or average
//! - **Pipeline**: `FramePipeline` tying detection and extraction together
//! - **Smoothing**: `ColorSmoothing` and its timer task `SmoothingRunner`
//! - **Protocols**: Hyperion (FlatBuffers/TCP), WLED (DDP, DRGB/DNRGB over UDP)
//!   and Adalight (serial) clients behind `ProtocolClient`
//! - **Manager**: `ConnectionManager` with single-flight delivery and reconnect
//! - **Error**: `AmbiError`, a `thiserror`-based error hierarchy

pub mod border;
pub mod error;
pub mod extract;
pub mod manager;
pub mod pipeline;
pub mod protocol;
pub mod smoothing;
pub mod state;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use border::{BorderEstimate, BorderProcessor, BorderThresholds};
pub use error::AmbiError;
pub use extract::{ExtractMode, LedDataExtractor};
pub use manager::{ClientFactory, ConnectionListener, ConnectionManager, FrameSlot, ManagerConfig};
pub use pipeline::{FramePipeline, PipelineConfig, RgbImage};
pub use protocol::{
    create_client, AdalightClient, AdalightProtocol, ClientConfig, ColorOrder, ConnectionKind,
    Endpoint, HyperionClient, ProtocolClient, WledClient, WledProtocol,
};
pub use smoothing::{ColorSmoothing, LedSink, SmoothingConfig, SmoothingRunner};
pub use state::ConnectionState;
pub use types::{Color, ColorSequence, CropRect, Frame, LedTopology, PixelFormat};
