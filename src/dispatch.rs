//! Single and bulk message dispatch.
//!
//! A bulk batch is a [`BulkDispatch`]: an explicit cursor over the recipient
//! list that performs one send per [`BulkDispatch::step`]. [`BulkDispatch::run`]
//! drives it to completion with the configured delay between sends. Sends are
//! strictly sequential and a failed recipient never aborts the batch.

use crate::error::{Result, WppError};
use crate::types::{BulkRecipient, MessageKind, PhoneNumber};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

/// Attached file for image, video and document messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
}

impl MediaPayload {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_from_file_name(&file_name).map(str::to_string);
        Self {
            file_name,
            mime_type,
            data: data.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(file_name, data))
    }

    /// Whether the file is acceptable for the given message type.
    pub fn matches_kind(&self, kind: MessageKind) -> bool {
        let mime = self.mime_type.as_deref().unwrap_or_default();
        let name = self.file_name.to_lowercase();
        match kind {
            MessageKind::Text => false,
            MessageKind::Image => mime.starts_with("image/"),
            MessageKind::Video => mime.starts_with("video/"),
            MessageKind::Document => {
                mime == "application/pdf"
                    || mime.contains("spreadsheet")
                    || mime.contains("document")
                    || [".pdf", ".doc", ".docx", ".xls", ".xlsx"]
                        .iter()
                        .any(|ext| name.ends_with(ext))
            }
        }
    }
}

pub fn mime_from_file_name(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(mime)
}

/// One outbound message. `content` is the body for text messages and the
/// optional caption for media.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub from_number: PhoneNumber,
    pub to_number: PhoneNumber,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media: Option<MediaPayload>,
}

impl SendRequest {
    pub fn text(from: PhoneNumber, to: PhoneNumber, content: impl Into<String>) -> Self {
        Self {
            from_number: from,
            to_number: to,
            kind: MessageKind::Text,
            content: Some(content.into()),
            media: None,
        }
    }

    pub fn media(
        from: PhoneNumber,
        to: PhoneNumber,
        kind: MessageKind,
        media: MediaPayload,
        caption: Option<String>,
    ) -> Self {
        Self {
            from_number: from,
            to_number: to,
            kind,
            content: caption,
            media: Some(media),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind == MessageKind::Text {
            if self.content.as_deref().map_or(true, |c| c.trim().is_empty()) {
                return Err(WppError::validation("type a message to send"));
            }
            return Ok(());
        }
        match self.media.as_ref() {
            None => Err(WppError::validation(format!(
                "select a file to send as {}",
                self.kind.as_wire()
            ))),
            Some(media) if !media.matches_kind(self.kind) => Err(WppError::validation(format!(
                "file '{}' is not valid for a {} message",
                media.file_name,
                self.kind.as_wire()
            ))),
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<()>;
}

/// Validates and sends one message. No retry.
pub async fn send_one(sender: &dyn MessageSender, request: &SendRequest) -> Result<()> {
    request.validate()?;
    sender.send(request).await?;
    info!(
        "sent {} message {} -> {}",
        request.kind.as_wire(),
        request.from_number,
        request.to_number
    );
    Ok(())
}

/// Input of a bulk batch.
#[derive(Debug, Clone)]
pub struct BulkPlan {
    pub from_number: PhoneNumber,
    pub recipients: Vec<BulkRecipient>,
    pub fallback: Option<String>,
    pub kind: MessageKind,
    pub media: Option<MediaPayload>,
    pub delay: Duration,
}

impl BulkPlan {
    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(WppError::validation(
                "no recipient numbers loaded for bulk send",
            ));
        }
        if self.kind == MessageKind::Text {
            let has_fallback = self
                .fallback
                .as_deref()
                .is_some_and(|m| !m.trim().is_empty());
            let has_personalized = self.recipients.iter().any(BulkRecipient::is_personalized);
            if !has_fallback && !has_personalized {
                return Err(WppError::validation(
                    "type a default message or load a file with personalized messages",
                ));
            }
        } else {
            match self.media.as_ref() {
                None => {
                    return Err(WppError::validation(format!(
                        "select a file to send as {}",
                        self.kind.as_wire()
                    )))
                }
                Some(media) if !media.matches_kind(self.kind) => {
                    return Err(WppError::validation(format!(
                        "file '{}' is not valid for a {} message",
                        media.file_name,
                        self.kind.as_wire()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn request_for(&self, recipient: &BulkRecipient) -> SendRequest {
        let text = recipient
            .message_or(self.fallback.as_deref())
            .map(str::to_string);
        SendRequest {
            from_number: self.from_number.clone(),
            to_number: recipient.number.clone(),
            kind: self.kind,
            content: text,
            media: self.media.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Pending,
    Sending,
    Cancelled,
    /// The API rejected the token; nothing after this point can be sent.
    SessionExpired,
    Done,
}

impl DispatchState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            DispatchState::Cancelled | DispatchState::SessionExpired | DispatchState::Done
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub attempted: usize,
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.attempted as f64 / self.total as f64) * 100.0).round() as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub index: usize,
    pub number: PhoneNumber,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub attempted: usize,
    pub successes: usize,
    pub failures: usize,
    pub cancelled: bool,
    pub session_expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Attempted { outcome: SendOutcome, progress: Progress },
    Finished { summary: DispatchSummary },
}

/// Cooperative cancellation flag shared with the operator.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub struct BulkDispatch {
    id: Uuid,
    plan: BulkPlan,
    cursor: usize,
    successes: usize,
    failures: usize,
    state: DispatchState,
    cancel: CancelHandle,
    events: broadcast::Sender<DispatchEvent>,
}

impl BulkDispatch {
    /// Refuses to build a batch that could not send anything.
    pub fn new(plan: BulkPlan) -> Result<Self> {
        plan.validate()?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            id: Uuid::new_v4(),
            plan,
            cursor: 0,
            successes: 0,
            failures: 0,
            state: DispatchState::Pending,
            cancel: CancelHandle::new(),
            events,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            attempted: self.cursor,
            total: self.plan.recipients.len(),
            successes: self.successes,
            failures: self.failures,
        }
    }

    pub fn summary(&self) -> DispatchSummary {
        DispatchSummary {
            total: self.plan.recipients.len(),
            attempted: self.cursor,
            successes: self.successes,
            failures: self.failures,
            cancelled: self.state == DispatchState::Cancelled,
            session_expired: self.state == DispatchState::SessionExpired,
        }
    }

    /// Performs the next send, or returns `None` once the batch has stopped.
    pub async fn step(&mut self, sender: &dyn MessageSender) -> Option<SendOutcome> {
        if self.state.is_finished() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.state = DispatchState::Cancelled;
            info!(
                "bulk {} cancelled: {} of {} sent",
                self.id,
                self.cursor,
                self.plan.recipients.len()
            );
            return None;
        }
        let Some(recipient) = self.plan.recipients.get(self.cursor).cloned() else {
            self.state = DispatchState::Done;
            return None;
        };

        self.state = DispatchState::Sending;
        let request = self.plan.request_for(&recipient);
        let mut expired = false;
        let error = match sender.send(&request).await {
            Ok(()) => {
                self.successes += 1;
                None
            }
            Err(WppError::Unauthorized) => {
                warn!(
                    "bulk {} stopped at {}: session expired",
                    self.id, recipient.number
                );
                self.failures += 1;
                expired = true;
                Some(WppError::Unauthorized.user_message())
            }
            Err(err) => {
                warn!(
                    "bulk {} send to {} failed: {}",
                    self.id,
                    recipient.number,
                    err.user_message()
                );
                self.failures += 1;
                Some(err.user_message())
            }
        };

        let outcome = SendOutcome {
            index: self.cursor,
            number: recipient.number,
            error,
        };
        self.cursor += 1;
        if expired {
            self.state = DispatchState::SessionExpired;
        } else if self.cursor >= self.plan.recipients.len() {
            self.state = DispatchState::Done;
        }

        let _ = self.events.send(DispatchEvent::Attempted {
            outcome: outcome.clone(),
            progress: self.progress(),
        });
        Some(outcome)
    }

    /// Sends to every recipient in order, waiting `delay` between sends.
    pub async fn run(&mut self, sender: &dyn MessageSender) -> DispatchSummary {
        let total = self.plan.recipients.len();
        if self.plan.delay.is_zero() && total > 1 {
            warn!("bulk {} runs with zero delay between {total} sends", self.id);
        }
        info!(
            "bulk {} starting: {total} recipients from {}, delay {:?}",
            self.id, self.plan.from_number, self.plan.delay
        );

        while self.step(sender).await.is_some() {
            if self.state.is_finished() || self.plan.delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = sleep(self.plan.delay) => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        let summary = self.summary();
        info!(
            "bulk {} finished: {} ok, {} failed, {}/{} attempted",
            self.id, summary.successes, summary.failures, summary.attempted, summary.total
        );
        let _ = self.events.send(DispatchEvent::Finished { summary });
        summary
    }
}
