use crate::config::ApiConfig;
use crate::dispatch::{MediaPayload, MessageSender, SendRequest};
use crate::error::{Result, WppError};
use crate::poller::ConnectionSource;
use crate::reports::ReportQuery;
use crate::session::SessionManager;
use crate::types::{LinkStatus, MessageKind, NumberRole, NumbersSnapshot, PhoneNumber, ReportEntry};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const PATH_OTP_REQUEST: &str = "/api/v2/auth/otp/request";
pub const PATH_OTP_VALIDATE: &str = "/api/v2/auth/otp/validate";
pub const PATH_NUMBERS: &str = "/api/v2/numbers";
pub const PATH_NUMBERS_ADD: &str = "/api/v2/numbers/add";
pub const PATH_NUMBER_STATUS: &str = "/api/v2/numbers/status";
pub const PATH_NUMBER_CONNECT: &str = "/api/v2/numbers/connect";
pub const PATH_SENDS: &str = "/api/v2/sends";
pub const PATH_UPLOAD_SENDS: &str = "/api/v2/upload/sends";
pub const PATH_REPORT_SENDS: &str = "/api/v2/reports/sends";

const PUBLIC_ROUTES: [&str; 2] = [PATH_OTP_REQUEST, PATH_OTP_VALIDATE];
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Standard `{ success, description }` wrapper used by the WPP API.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    success: Option<bool>,
    description: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StatusDescription {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct QrDescription {
    #[serde(default)]
    qr_base64: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpPurpose {
    Login,
    Register,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpChannel {
    Email,
    Number,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpRequest {
    pub otp_type: OtpPurpose,
    pub otp_for: OtpChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpValidation {
    pub otp_type: OtpPurpose,
    pub otp_for: OtpChannel,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    pub email_otp_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_otp_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OtpAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub description: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OtpValidationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub description: Option<Value>,
}

#[derive(Debug, Serialize)]
struct NumberPayload<'a> {
    number: &'a str,
    role: NumberRole,
}

#[derive(Debug, Serialize)]
struct TextSendPayload<'a> {
    from_number: &'a str,
    to_number: &'a str,
    media_type: &'a str,
    content: &'a str,
}

/// Pulls a human-readable message out of an error body.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["description", "message", "detail", "error"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// HTTP wrapper around the WPP API with bearer injection and 401 teardown.
#[derive(Debug, Clone)]
pub struct WppClient {
    http: Client,
    base_url: String,
    session: Arc<SessionManager>,
}

impl WppClient {
    pub fn new(cfg: &ApiConfig, session: Arc<SessionManager>) -> Self {
        Self::build(&cfg.endpoint, cfg.timeout(), session)
    }

    pub fn with_base_url(base_url: &str, session: Arc<SessionManager>) -> Self {
        Self::build(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS), session)
    }

    fn build(base_url: &str, timeout: Duration, session: Arc<SessionManager>) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorize(&self, path: &str, req: RequestBuilder) -> Result<RequestBuilder> {
        if PUBLIC_ROUTES.contains(&path) {
            return Ok(req);
        }
        match self.session.bearer_token().await? {
            Some(token) => Ok(req.bearer_auth(token)),
            None => {
                // Let the server answer 401 so the caller sees a uniform auth failure.
                warn!("no valid token for protected route {path}");
                self.session.clear().await?;
                Ok(req)
            }
        }
    }

    async fn execute(&self, method: &str, path: &str, req: RequestBuilder) -> Result<Response> {
        let req = self.authorize(path, req).await?;
        debug!("api request: {method} {path}");

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => {
                error!("connection error on {method} {path}: {err}");
                return Err(WppError::Http(err));
            }
        };

        let status = resp.status();
        debug!("api response: {method} {path} -> {}", status.as_u16());
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = extract_error_message(&body)
            .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));

        match status.as_u16() {
            401 => {
                warn!("token rejected on {method} {path}, clearing session");
                self.session.clear().await?;
                return Err(WppError::Unauthorized);
            }
            403 => warn!("access denied for {method} {path}"),
            code if code >= 500 => error!("server error on {method} {path}: {message}"),
            _ => warn!("{method} {path} failed: {message}"),
        }

        Err(WppError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_description<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let req = self.http.get(self.url(path)).query(query);
        let resp = self.execute("GET", path, req).await?;
        let envelope: Envelope<T> = resp.json().await?;
        Ok(envelope.description)
    }

    pub async fn request_otp(&self, request: &OtpRequest) -> Result<OtpAck> {
        let req = self.http.post(self.url(PATH_OTP_REQUEST)).json(request);
        let resp = self.execute("POST", PATH_OTP_REQUEST, req).await?;
        Ok(resp.json().await?)
    }

    pub async fn validate_otp(&self, validation: &OtpValidation) -> Result<OtpValidationResponse> {
        let req = self.http.post(self.url(PATH_OTP_VALIDATE)).json(validation);
        let resp = self.execute("POST", PATH_OTP_VALIDATE, req).await?;
        Ok(resp.json().await?)
    }

    pub async fn list_numbers(&self) -> Result<NumbersSnapshot> {
        let snapshot = self
            .get_description::<NumbersSnapshot>(PATH_NUMBERS, &[])
            .await?;
        if snapshot.is_none() {
            warn!("numbers response carried no description");
        }
        Ok(snapshot.unwrap_or_default())
    }

    pub async fn add_number(&self, number: &PhoneNumber, role: NumberRole) -> Result<()> {
        let payload = NumberPayload {
            number: number.as_str(),
            role,
        };
        let req = self.http.post(self.url(PATH_NUMBERS_ADD)).json(&payload);
        self.execute("POST", PATH_NUMBERS_ADD, req).await?;
        Ok(())
    }

    pub async fn remove_number(&self, number: &str, role: NumberRole) -> Result<()> {
        let payload = NumberPayload { number, role };
        let req = self.http.delete(self.url(PATH_NUMBERS)).json(&payload);
        self.execute("DELETE", PATH_NUMBERS, req).await?;
        Ok(())
    }

    pub async fn number_status(&self, number: &PhoneNumber) -> Result<LinkStatus> {
        let status = self
            .get_description::<StatusDescription>(PATH_NUMBER_STATUS, &[("number", number.as_str())])
            .await?
            .map(|d| d.status)
            .unwrap_or_default();
        Ok(LinkStatus::parse(&status))
    }

    /// QR code for linking the device; `None` when the number is already linked.
    pub async fn connect_qr(&self, number: &PhoneNumber) -> Result<Option<String>> {
        let qr = self
            .get_description::<QrDescription>(PATH_NUMBER_CONNECT, &[("number", number.as_str())])
            .await?
            .and_then(|d| d.qr_base64)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(qr)
    }

    pub async fn send_text(&self, from: &PhoneNumber, to: &PhoneNumber, content: &str) -> Result<()> {
        let payload = TextSendPayload {
            from_number: from.as_str(),
            to_number: to.as_str(),
            media_type: MessageKind::Text.as_wire(),
            content,
        };
        let req = self.http.post(self.url(PATH_SENDS)).json(&payload);
        self.execute("POST", PATH_SENDS, req).await?;
        Ok(())
    }

    pub async fn send_media(
        &self,
        from: &PhoneNumber,
        to: &PhoneNumber,
        kind: MessageKind,
        media: &MediaPayload,
        caption: Option<&str>,
    ) -> Result<()> {
        let mut part = reqwest::multipart::Part::bytes(media.data.to_vec())
            .file_name(media.file_name.clone());
        if let Some(mime) = media.mime_type.as_deref() {
            part = part.mime_str(mime)?;
        }
        let mut form = reqwest::multipart::Form::new()
            .text("from_number", from.to_string())
            .text("to_number", to.to_string())
            .text("media_type", kind.as_wire())
            .part("file", part);
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            form = form.text("caption", caption.to_string());
        }
        let req = self.http.post(self.url(PATH_UPLOAD_SENDS)).multipart(form);
        self.execute("POST", PATH_UPLOAD_SENDS, req).await?;
        Ok(())
    }

    pub async fn sends_report(&self, query: &ReportQuery) -> Result<Vec<ReportEntry>> {
        let params = query.to_params();
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let entries = self
            .get_description::<Vec<ReportEntry>>(PATH_REPORT_SENDS, &pairs)
            .await?;
        Ok(entries.unwrap_or_default())
    }
}

#[async_trait]
impl MessageSender for WppClient {
    async fn send(&self, request: &SendRequest) -> Result<()> {
        match (request.kind, request.media.as_ref()) {
            (MessageKind::Text, _) => {
                let content = request.content.as_deref().unwrap_or_default();
                self.send_text(&request.from_number, &request.to_number, content)
                    .await
            }
            (kind, Some(media)) => {
                self.send_media(
                    &request.from_number,
                    &request.to_number,
                    kind,
                    media,
                    request.content.as_deref(),
                )
                .await
            }
            (kind, None) => Err(WppError::validation(format!(
                "a file is required for {} messages",
                kind.as_wire()
            ))),
        }
    }
}

#[async_trait]
impl ConnectionSource for WppClient {
    async fn number_status(&self, number: &PhoneNumber) -> Result<LinkStatus> {
        WppClient::number_status(self, number).await
    }

    async fn connect_qr(&self, number: &PhoneNumber) -> Result<Option<String>> {
        WppClient::connect_qr(self, number).await
    }
}
