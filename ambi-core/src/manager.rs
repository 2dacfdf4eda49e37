//! Owns the active protocol client and a single sender task.
//!
//! ```text
//!  capture / smoothing ──put──► FrameSlot (latest only) ──┐
//!  clear / set_color ───────► mpsc ───────────────────────┤
//!                                                         ▼
//!                                             worker: select! loop
//!                                               │ send via client
//!                                               │ keep-alive while idle
//!                                               └ reconnect on failure
//! ```
//!
//! Frames are never queued: a frame submitted while another is in flight
//! overwrites whatever was still pending.
//!
//! When the worker gives up (a send fails and reconnecting is off or
//! impossible) the slot closes and [`ConnectionManager::terminated`]
//! resolves with the error that ended the session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AmbiError;
use crate::protocol::{create_client, ClientConfig, ProtocolClient, INFINITE_DURATION};
use crate::smoothing::LedSink;
use crate::state::ConnectionState;
use crate::types::{Color, ColorSequence};

/// Builds a fresh, unconnected client for every (re)connect attempt.
pub type ClientFactory =
    Arc<dyn Fn() -> Result<Box<dyn ProtocolClient>, AmbiError> + Send + Sync>;

/// Keep-alive period used when the client needs none; the ticker is
/// disabled in that case and only needs a valid period.
const IDLE_PERIOD: Duration = Duration::from_secs(3600);

// ── ConnectionListener ───────────────────────────────────────────

/// Status callbacks, invoked synchronously from the manager's tasks.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self) {}

    fn on_connection_error(&self, _message: &str) {}

    fn on_status(&self, _state: &ConnectionState) {}
}

// ── ManagerConfig ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub priority: i32,
    /// Duration passed with every frame; `-1` never expires.
    pub frame_duration_ms: i32,
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    /// Upper bound on waiting for the worker during `disconnect`.
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            priority: 100,
            frame_duration_ms: INFINITE_DURATION,
            reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_millis(100),
        }
    }
}

// ── FrameSlot ────────────────────────────────────────────────────

/// What the next send carries.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Payload {
    Leds(ColorSequence),
    Image {
        rgb: Vec<u8>,
        width: usize,
        height: usize,
    },
}

impl Default for Payload {
    fn default() -> Self {
        Self::Leds(Vec::new())
    }
}

#[derive(Debug, Default)]
struct SlotState {
    frame: Payload,
    pending: bool,
    in_flight: bool,
    closed: bool,
}

/// Single-entry hand-off between the frame producer and the worker.
#[derive(Debug, Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    notify: Notify,
}

impl FrameSlot {
    /// Store `colors` as the next frame, replacing any pending one.
    pub fn put(&self, colors: &[Color]) {
        self.store(|frame| match frame {
            Payload::Leds(buf) => {
                buf.clear();
                buf.extend_from_slice(colors);
            }
            other => *other = Payload::Leds(colors.to_vec()),
        });
    }

    /// Store a packed RGB image as the next frame.
    pub fn put_image(&self, rgb: &[u8], width: usize, height: usize) {
        self.store(|frame| match frame {
            Payload::Image { rgb: buf, width: w, height: h } => {
                buf.clear();
                buf.extend_from_slice(rgb);
                *w = width;
                *h = height;
            }
            other => {
                *other = Payload::Image {
                    rgb: rgb.to_vec(),
                    width,
                    height,
                }
            }
        });
    }

    /// Closed once the session is over; later frames are dropped.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn store(&self, fill: impl FnOnce(&mut Payload)) {
        {
            let mut s = self.lock();
            if s.closed {
                return;
            }
            fill(&mut s.frame);
            s.pending = true;
        }
        self.notify.notify_one();
    }

    /// A frame is waiting or being sent.
    pub fn is_busy(&self) -> bool {
        let s = self.lock();
        s.pending || s.in_flight
    }

    /// Swap the pending frame into `buf`. Returns `false` if none.
    fn take(&self, buf: &mut Payload) -> bool {
        let mut s = self.lock();
        if !s.pending {
            return false;
        }
        std::mem::swap(&mut s.frame, buf);
        s.pending = false;
        s.in_flight = true;
        true
    }

    fn finish(&self) {
        self.lock().in_flight = false;
    }

    fn close(&self) {
        let mut s = self.lock();
        s.closed = true;
        s.pending = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedSink for FrameSlot {
    fn submit(&self, colors: &[Color]) {
        self.put(colors);
    }
}

// ── Shared status ────────────────────────────────────────────────

/// State plus listener, shared by the manager handle and the worker.
struct Status {
    state: Mutex<ConnectionState>,
    listener: Arc<dyn ConnectionListener>,
    /// Cancelled when the worker gives up on its own.
    terminated: CancellationToken,
    failure: Mutex<Option<AmbiError>>,
}

impl Status {
    fn new(listener: Arc<dyn ConnectionListener>) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            listener,
            terminated: CancellationToken::new(),
            failure: Mutex::new(None),
        }
    }

    fn terminate(&self, err: AmbiError) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
        self.terminated.cancel();
    }

    fn take_failure(&self) -> Option<AmbiError> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn get(&self) -> ConnectionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply `f` and report the resulting state. Rejected transitions
    /// are logged and leave the state untouched.
    fn transition(&self, f: impl FnOnce(&mut ConnectionState) -> Result<(), AmbiError>) {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = f(&mut state) {
                tracing::warn!(state = %*state, "{}", e);
                return;
            }
            state.clone()
        };
        tracing::debug!(state = %snapshot, "connection state");
        self.listener.on_status(&snapshot);
    }

    fn force_disconnect(&self) {
        self.transition(|s| {
            s.force_disconnect();
            Ok(())
        });
    }

    fn error(&self, err: &AmbiError) {
        self.listener.on_connection_error(&err.to_string());
    }
}

// ── ConnectionManager ────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Command {
    Clear,
    SetColor(Color),
}

pub struct ConnectionManager {
    slot: Arc<FrameSlot>,
    commands: mpsc::Sender<Command>,
    status: Arc<Status>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
    worker: Option<JoinHandle<Option<Box<dyn ProtocolClient>>>>,
}

impl ConnectionManager {
    /// Connect with the client described by `client_config`.
    pub async fn from_config(
        client_config: ClientConfig,
        config: ManagerConfig,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Self, AmbiError> {
        let factory: ClientFactory = Arc::new(move || create_client(&client_config));
        Self::connect(factory, config, listener).await
    }

    /// Build a client, connect it and start the sender task.
    ///
    /// A failure here is final: reconnects only follow a connection
    /// that succeeded at least once.
    pub async fn connect(
        factory: ClientFactory,
        config: ManagerConfig,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Self, AmbiError> {
        let status = Arc::new(Status::new(listener));

        let mut client = match factory() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("cannot create client: {}", e);
                status.error(&e);
                return Err(e);
            }
        };

        status.transition(ConnectionState::begin_connect);
        if let Err(e) = client.connect().await {
            tracing::error!(client = client.name(), "connection failed: {}", e);
            status.error(&e);
            status.force_disconnect();
            return Err(e);
        }
        status.transition(ConnectionState::complete_connect);
        status.listener.on_connected();
        tracing::info!(client = client.name(), "connected");

        let slot = Arc::new(FrameSlot::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let shutdown_timeout = config.shutdown_timeout;

        let worker = Worker {
            client,
            factory,
            config,
            status: status.clone(),
            slot: slot.clone(),
            commands: cmd_rx,
            cancel: cancel.clone(),
            frame: Payload::default(),
        };
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            slot,
            commands: cmd_tx,
            status,
            cancel,
            shutdown_timeout,
            worker: Some(handle),
        })
    }

    /// Hand a frame to the worker. Never blocks; replaces any frame
    /// that has not been picked up yet.
    pub fn submit_frame(&self, colors: &[Color]) {
        self.slot.put(colors);
    }

    /// Hand a packed RGB image to the worker, for clients that map
    /// images onto their LEDs themselves.
    pub fn submit_image(&self, rgb: &[u8], width: usize, height: usize) {
        self.slot.put_image(rgb, width, height);
    }

    /// Sink for a smoothing runner feeding this manager.
    pub fn frame_sink(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The worker gave up and the session is over.
    pub fn is_terminated(&self) -> bool {
        self.status.terminated.is_cancelled()
    }

    /// Resolves once the worker gives up, with the error that ended the
    /// session. Never resolves while the connection is alive or after a
    /// requested [`disconnect`](Self::disconnect).
    pub async fn terminated(&self) -> AmbiError {
        self.status.terminated.cancelled().await;
        self.status.take_failure().unwrap_or(AmbiError::ConnectionClosed)
    }

    pub async fn clear(&self) -> Result<(), AmbiError> {
        self.commands.send(Command::Clear).await?;
        Ok(())
    }

    pub async fn set_color(&self, color: Color) -> Result<(), AmbiError> {
        self.commands.send(Command::SetColor(color)).await?;
        Ok(())
    }

    /// Stop the worker, then close the transport.
    pub async fn disconnect(mut self) {
        self.cancel.cancel();
        self.slot.close();

        if let Some(mut handle) = self.worker.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(Some(mut client))) => {
                    if let Err(e) = client.disconnect().await {
                        tracing::warn!(client = client.name(), "disconnect failed: {}", e);
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::warn!("connection worker ended abnormally: {}", e),
                Err(_) => {
                    tracing::warn!(timeout = ?self.shutdown_timeout, "connection worker did not stop, aborting");
                    handle.abort();
                }
            }
        }

        if !self.status.get().is_disconnected() {
            self.status.force_disconnect();
        }
        tracing::info!("connection manager stopped");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Worker ───────────────────────────────────────────────────────

struct Worker {
    client: Box<dyn ProtocolClient>,
    factory: ClientFactory,
    config: ManagerConfig,
    status: Arc<Status>,
    slot: Arc<FrameSlot>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    frame: Payload,
}

/// How a failed send was resolved.
enum Recovery {
    Reconnected,
    Cancelled,
    Failed(AmbiError),
}

impl Worker {
    /// Returns the client so the caller can close it, or `None` when the
    /// connection is already gone.
    async fn run(mut self) -> Option<Box<dyn ProtocolClient>> {
        let mut keep_alive = self.keep_alive_ticker();

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Some(self.client),
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.execute(cmd).await,
                    None => return Some(self.client),
                },
                _ = self.slot.notify.notified() => {
                    let r = self.send_pending().await;
                    keep_alive.0.reset();
                    r
                }
                _ = keep_alive.0.tick(), if keep_alive.1 => self.client.keep_alive().await,
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(client = self.client.name(), "frame skipped: {}", e);
                }
                Err(e) => match self.recover(e).await {
                    Recovery::Reconnected => keep_alive = self.keep_alive_ticker(),
                    Recovery::Cancelled => return Some(self.client),
                    Recovery::Failed(e) => {
                        self.client.disconnect().await.ok();
                        self.slot.close();
                        tracing::error!("connection worker stopped: {}", e);
                        self.status.terminate(e);
                        return None;
                    }
                },
            }
        }
    }

    fn keep_alive_ticker(&self) -> (tokio::time::Interval, bool) {
        let period = self.client.keep_alive_interval();
        let every = period.unwrap_or(IDLE_PERIOD);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        (ticker, period.is_some())
    }

    async fn execute(&mut self, cmd: Command) -> Result<(), AmbiError> {
        let priority = self.config.priority;
        match cmd {
            Command::Clear => self.client.clear(priority).await,
            Command::SetColor(color) => {
                self.client
                    .set_color(color, priority, self.config.frame_duration_ms)
                    .await
            }
        }
    }

    async fn send_pending(&mut self) -> Result<(), AmbiError> {
        if !self.slot.take(&mut self.frame) {
            return Ok(());
        }
        let (priority, duration) = (self.config.priority, self.config.frame_duration_ms);
        let result = match &self.frame {
            Payload::Leds(colors) => self.client.set_image(colors, priority, duration).await,
            Payload::Image { rgb, width, height } => {
                self.client
                    .set_raw_image(rgb, *width, *height, priority, duration)
                    .await
            }
        };
        self.slot.finish();
        result
    }

    /// Report `err` and, if allowed, reconnect until it works.
    async fn recover(&mut self, err: AmbiError) -> Recovery {
        tracing::warn!(client = self.client.name(), "send failed: {}", err);
        self.status.error(&err);

        if !self.config.reconnect {
            self.status.force_disconnect();
            return Recovery::Failed(err);
        }

        self.client.disconnect().await.ok();
        let mut attempts = 0;
        loop {
            self.status.transition(|s| s.begin_reconnect(attempts));
            attempts += 1;

            tokio::select! {
                _ = self.cancel.cancelled() => return Recovery::Cancelled,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }

            self.status.transition(ConnectionState::begin_connect);
            let mut client = match (self.factory)() {
                Ok(c) => c,
                Err(e) if e.is_config() => {
                    tracing::error!("cannot recreate client: {}", e);
                    self.status.error(&e);
                    self.status.force_disconnect();
                    return Recovery::Failed(e);
                }
                Err(e) => {
                    self.status.error(&e);
                    continue;
                }
            };

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return Recovery::Cancelled,
                r = client.connect() => r,
            };
            match connected {
                Ok(()) => {
                    tracing::info!(client = client.name(), attempts, "reconnected");
                    self.client = client;
                    self.status.transition(ConnectionState::complete_connect);
                    self.status.listener.on_connected();
                    return Recovery::Reconnected;
                }
                Err(e) => {
                    tracing::warn!(attempts, "reconnect failed: {}", e);
                    self.status.error(&e);
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_keeps_only_latest() {
        let slot = FrameSlot::default();
        assert!(!slot.is_busy());

        slot.put(&[Color::new(1, 1, 1)]);
        slot.put(&[Color::new(2, 2, 2), Color::new(3, 3, 3)]);
        assert!(slot.is_busy());

        let mut buf = Payload::default();
        assert!(slot.take(&mut buf));
        assert_eq!(buf, Payload::Leds(vec![Color::new(2, 2, 2), Color::new(3, 3, 3)]));
        assert!(slot.is_busy());
        assert!(!slot.take(&mut buf));

        slot.finish();
        assert!(!slot.is_busy());
    }

    #[test]
    fn closed_slot_drops_frames() {
        let slot = FrameSlot::default();
        slot.put(&[Color::BLACK]);
        slot.close();
        assert!(!slot.is_busy());
        slot.put(&[Color::BLACK]);
        assert!(!slot.is_busy());
    }

    #[test]
    fn image_replaces_pending_leds() {
        let slot = FrameSlot::default();
        slot.put(&[Color::BLACK]);
        slot.put_image(&[1, 2, 3, 4, 5, 6], 2, 1);

        let mut buf = Payload::default();
        assert!(slot.take(&mut buf));
        assert_eq!(
            buf,
            Payload::Image {
                rgb: vec![1, 2, 3, 4, 5, 6],
                width: 2,
                height: 1
            }
        );

        slot.finish();
        slot.put_image(&[7, 8, 9], 1, 1);
        assert!(slot.take(&mut buf));
        assert_eq!(
            buf,
            Payload::Image {
                rgb: vec![7, 8, 9],
                width: 1,
                height: 1
            }
        );
    }

    #[test]
    fn manager_defaults() {
        let c = ManagerConfig::default();
        assert_eq!(c.priority, 100);
        assert_eq!(c.frame_duration_ms, -1);
        assert!(c.reconnect);
        assert_eq!(c.reconnect_delay, Duration::from_secs(5));
        assert_eq!(c.shutdown_timeout, Duration::from_millis(100));
    }
}
