use crate::error::{Result, WppError};
use crate::types::{LinkStatus, PhoneNumber};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Remote source of link status and pairing QR codes.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    async fn number_status(&self, number: &PhoneNumber) -> Result<LinkStatus>;
    async fn connect_qr(&self, number: &PhoneNumber) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerState {
    pub number: PhoneNumber,
    pub connected: bool,
    pub status: Option<LinkStatus>,
    pub qr_code: Option<String>,
    /// Failure of the last status check.
    pub status_error: Option<String>,
    /// Failure of the last QR fetch that was not masked by a displayed code.
    pub qr_error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl PollerState {
    fn new(number: PhoneNumber) -> Self {
        Self {
            number,
            connected: false,
            status: None,
            qr_code: None,
            status_error: None,
            qr_error: None,
            last_update: None,
        }
    }

    /// The status failure when there is one, else the QR failure.
    pub fn error(&self) -> Option<&str> {
        self.status_error.as_deref().or(self.qr_error.as_deref())
    }
}

/// Link status and QR code of one selected number.
pub struct ConnectionPoller {
    source: Arc<dyn ConnectionSource>,
    state: PollerState,
}

impl ConnectionPoller {
    pub fn new(source: Arc<dyn ConnectionSource>, number: PhoneNumber) -> Self {
        Self {
            source,
            state: PollerState::new(number),
        }
    }

    pub fn state(&self) -> &PollerState {
        &self.state
    }

    /// Switches to another number, dropping everything known about the old one.
    pub fn select(&mut self, number: PhoneNumber) {
        if number != self.state.number {
            debug!("poller switching {} -> {}", self.state.number, number);
        }
        self.state = PollerState::new(number);
    }

    /// Only `Unauthorized` is returned; other failures land in `state.status_error`.
    pub async fn refresh_status(&mut self) -> Result<()> {
        match self.source.number_status(&self.state.number).await {
            Ok(status) => {
                self.state.connected = status.is_connected();
                if self.state.connected {
                    self.state.qr_code = None;
                    self.state.qr_error = None;
                }
                self.state.status = Some(status);
                self.state.status_error = None;
            }
            Err(WppError::Unauthorized) => return Err(WppError::Unauthorized),
            Err(err) => {
                warn!("status check for {} failed: {}", self.state.number, err.user_message());
                self.state.status_error = Some(err.user_message());
            }
        }
        self.state.last_update = Some(Utc::now());
        Ok(())
    }

    /// A blank QR means the device is linked. On failure a QR already on
    /// display is kept unless `force` is set.
    pub async fn refresh_qr(&mut self, force: bool) -> Result<()> {
        match self.source.connect_qr(&self.state.number).await {
            Ok(Some(qr)) => {
                self.state.connected = false;
                self.state.qr_code = Some(qr);
                self.state.qr_error = None;
            }
            Ok(None) => {
                self.state.connected = true;
                self.state.qr_code = None;
                self.state.qr_error = None;
            }
            Err(WppError::Unauthorized) => return Err(WppError::Unauthorized),
            Err(err) => {
                if force || self.state.qr_code.is_none() {
                    self.state.qr_code = None;
                    self.state.qr_error = Some(err.user_message());
                } else {
                    debug!(
                        "qr fetch for {} failed, keeping displayed code: {}",
                        self.state.number,
                        err.user_message()
                    );
                }
            }
        }
        self.state.last_update = Some(Utc::now());
        Ok(())
    }

    pub async fn tick(&mut self, force: bool) -> Result<()> {
        self.refresh_status().await?;
        if !self.state.connected || force {
            self.refresh_qr(force).await?;
        }
        Ok(())
    }
}

enum PollCommand {
    Refresh,
    Select(PhoneNumber),
}

/// Owner side of a spawned poller. Dropping it stops the task.
pub struct PollerHandle {
    state: watch::Receiver<PollerState>,
    commands: mpsc::Sender<PollCommand>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn state(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    pub fn current(&self) -> PollerState {
        self.state.borrow().clone()
    }

    /// Forced refresh: a failed QR fetch clears the displayed code.
    pub async fn refresh(&self) {
        let _ = self.commands.send(PollCommand::Refresh).await;
    }

    pub async fn select(&self, number: PhoneNumber) {
        let _ = self.commands.send(PollCommand::Select(number)).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Fetches immediately, then every `every` until the handle goes away.
pub fn spawn_poller(
    source: Arc<dyn ConnectionSource>,
    number: PhoneNumber,
    every: Duration,
) -> PollerHandle {
    let mut poller = ConnectionPoller::new(source, number.clone());
    let (state_tx, state_rx) = watch::channel(PollerState::new(number));
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PollCommand>(8);

    let task = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("poller started for {}", poller.state().number);

        loop {
            let outcome = tokio::select! {
                _ = ticker.tick() => poller.tick(false).await,
                cmd = cmd_rx.recv() => match cmd {
                    Some(PollCommand::Refresh) => poller.tick(true).await,
                    Some(PollCommand::Select(number)) => {
                        poller.select(number);
                        ticker.reset();
                        poller.tick(true).await
                    }
                    None => break,
                },
            };

            if let Err(err) = outcome {
                warn!("poller stopping: {}", err.user_message());
                let mut state = poller.state().clone();
                state.status_error = Some(err.user_message());
                state_tx.send_replace(state);
                break;
            }
            state_tx.send_replace(poller.state().clone());
        }
        debug!("poller for {} exited", poller.state().number);
    });

    PollerHandle {
        state: state_rx,
        commands: cmd_tx,
        task,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumberHealth {
    pub number: PhoneNumber,
    pub status: HealthStatus,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FleetStats {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub errors: usize,
    pub connected_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetReport {
    pub entries: Vec<NumberHealth>,
    pub stats: FleetStats,
}

impl FleetStats {
    fn from_entries(entries: &[NumberHealth]) -> Self {
        let count = |s: HealthStatus| entries.iter().filter(|e| e.status == s).count();
        let total = entries.len();
        let connected = count(HealthStatus::Connected);
        Self {
            total,
            connected,
            disconnected: count(HealthStatus::Disconnected),
            errors: count(HealthStatus::Error),
            connected_percent: if total == 0 {
                0.0
            } else {
                connected as f64 * 100.0 / total as f64
            },
        }
    }
}

/// Checks every number concurrently. Per-number failures are reported as
/// `HealthStatus::Error` entries, except `Unauthorized` which aborts the sweep.
pub async fn fleet_status(
    source: &dyn ConnectionSource,
    numbers: &[PhoneNumber],
) -> Result<FleetReport> {
    let checks = numbers.iter().map(|number| async move {
        (number.clone(), source.number_status(number).await)
    });

    let mut entries = Vec::with_capacity(numbers.len());
    for (number, result) in join_all(checks).await {
        let (status, detail) = match result {
            Ok(LinkStatus::Connected) => (HealthStatus::Connected, None),
            Ok(LinkStatus::Disconnected) => (HealthStatus::Disconnected, None),
            Ok(LinkStatus::Unknown(raw)) => (HealthStatus::Disconnected, Some(raw)),
            Err(WppError::Unauthorized) => return Err(WppError::Unauthorized),
            Err(err) => (HealthStatus::Error, Some(err.user_message())),
        };
        entries.push(NumberHealth {
            number,
            status,
            detail,
            checked_at: Utc::now(),
        });
    }

    let stats = FleetStats::from_entries(&entries);
    info!(
        "fleet check: {}/{} connected, {} errors",
        stats.connected, stats.total, stats.errors
    );
    Ok(FleetReport { entries, stats })
}

/// Decodes a QR payload into image bytes, accepting bare base64 or a data URL.
pub fn decode_qr(qr_base64: &str) -> Result<Vec<u8>> {
    let trimmed = qr_base64.trim();
    let payload = match trimmed.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => trimmed,
    };
    STANDARD
        .decode(payload)
        .map_err(|err| WppError::validation(format!("QR code is not valid base64: {err}")))
}
