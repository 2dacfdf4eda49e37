//! Grabber service core logic.
//!
//! ```text
//!   FrameSource ──► FramePipeline ──► ColorSmoothing ──► SmoothingRunner ─┐
//!                        │         └───────── (smoothing off) ────────────┤
//!                        └──── cropped RGB image (hyperion) ──────────────┤
//!                                                                         ▼
//!                                                               ConnectionManager
//! ```

use std::sync::{Arc, Mutex};

use ambi_core::{
    AmbiError, ColorSmoothing, ConnectionListener, ConnectionManager, ConnectionState,
    FramePipeline, LedSink, SmoothingRunner,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GrabberConfig;
use crate::source::FrameSource;

// ── LogListener ──────────────────────────────────────────────────

/// Reports connection events through `tracing`.
struct LogListener;

impl ConnectionListener for LogListener {
    fn on_connected(&self) {
        info!("LED controller connected");
    }

    fn on_connection_error(&self, message: &str) {
        error!("LED controller error: {message}");
    }

    fn on_status(&self, state: &ConnectionState) {
        debug!("connection {state}");
    }
}

// ── GrabberService ───────────────────────────────────────────────

/// Drives frames from a source to the LED controller until stopped or
/// the input ends.
pub struct GrabberService {
    config: GrabberConfig,
    cancel: CancellationToken,
}

impl GrabberService {
    pub fn new(config: GrabberConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run until stopped.
    ///
    /// 1. Validates the pipeline and opens the frame source.
    /// 2. Connects to the controller; failure here is final.
    /// 3. Starts the smoothing timer, if enabled and the controller
    ///    takes LED colors rather than images.
    /// 4. Feeds one frame per capture interval, skipping bad frames.
    ///    Stops with the manager's error once the connection is lost for good.
    /// 5. Clears our priority and disconnects on the way out.
    pub async fn run(&self) -> Result<(), AmbiError> {
        let mut pipeline = FramePipeline::new(self.config.to_pipeline_config())?;
        let mut source = FrameSource::open(&self.config.capture).await?;
        let format = source.format(self.config.capture.format);
        let (width, height) = (self.config.capture.width, self.config.capture.height);
        let bpp = format.bytes_per_pixel();

        let manager = ConnectionManager::from_config(
            self.config.to_client_config(),
            self.config.to_manager_config(),
            Arc::new(LogListener),
        )
        .await?;

        let images = self.config.connection.kind.maps_images();
        let smoothing = (self.config.smoothing.enabled && !images).then(|| {
            let smoothing = Arc::new(Mutex::new(ColorSmoothing::new(
                self.config.to_smoothing_config(),
            )));
            let sink: Arc<dyn LedSink> = manager.frame_sink();
            let runner = SmoothingRunner::spawn(smoothing.clone(), sink);
            (smoothing, runner)
        });

        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(width, height, ?format, images, "capture started");

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                e = manager.terminated() => break Err(e),
                _ = ticker.tick() => {}
            }

            let data = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                e = manager.terminated() => break Err(e),
                r = source.next_frame() => match r {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        info!("end of input");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                },
            };

            let fed = if images {
                pipeline
                    .process_image_buffer(data, width, height, width * bpp, bpp, format)
                    .map(|img| manager.submit_image(img.data, img.width, img.height))
            } else {
                pipeline
                    .process_buffer(data, width, height, width * bpp, bpp, format)
                    .map(|colors| match &smoothing {
                        Some((s, _)) => {
                            s.lock().unwrap_or_else(|e| e.into_inner()).set_target(colors);
                        }
                        None => manager.submit_frame(colors),
                    })
            };
            match fed {
                Ok(()) => {}
                Err(e) if e.is_transient() => debug!("skipping frame: {e}"),
                Err(e) => break Err(e),
            }
        };

        if let Some((s, runner)) = smoothing {
            runner.stop().await;
            s.lock().unwrap_or_else(|e| e.into_inner()).stop();
        }
        if self.config.connection.clear_on_exit && manager.is_connected() {
            if let Err(e) = manager.clear().await {
                warn!("clear on exit failed: {e}");
            }
        }
        manager.disconnect().await;

        info!("grabber stopped");
        result
    }
}

// ── Tests ────────────────────────────────────────────────────────
