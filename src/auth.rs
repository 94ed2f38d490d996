use crate::api::{OtpChannel, OtpPurpose, OtpRequest, OtpValidation, WppClient};
use crate::error::{Result, WppError};
use crate::session::{now_ms, PendingOtp, Session, SessionManager};
use crate::types::PhoneNumber;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

pub fn validate_email(raw: &str) -> Result<String> {
    let email = raw.trim();
    if EMAIL_RE.is_match(email) {
        Ok(email.to_string())
    } else {
        Err(WppError::validation(format!("invalid e-mail address '{email}'")))
    }
}

fn description_text(description: Option<&Value>) -> Option<String> {
    description
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_code(raw: Option<&str>, what: &str) -> Result<String> {
    raw.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| WppError::validation(format!("enter the {what} verification code")))
}

/// OTP login and registration on top of the session store.
pub struct AuthFlow {
    client: Arc<WppClient>,
    session: Arc<SessionManager>,
}

impl AuthFlow {
    pub fn new(client: Arc<WppClient>, session: Arc<SessionManager>) -> Self {
        Self { client, session }
    }

    async fn send_otp(&self, request: OtpRequest) -> Result<()> {
        let ack = self.client.request_otp(&request).await?;
        if !ack.success {
            let message = description_text(ack.description.as_ref())
                .unwrap_or_else(|| "could not send verification code".to_string());
            return Err(WppError::Auth(message));
        }
        Ok(())
    }

    pub async fn request_login(&self, email: &str) -> Result<()> {
        let email = validate_email(email)?;
        self.send_otp(OtpRequest {
            otp_type: OtpPurpose::Login,
            otp_for: OtpChannel::Email,
            email: Some(email.clone()),
            number: None,
        })
        .await?;
        self.session.set_pending(&email, None).await?;
        info!("login code sent to {email}");
        Ok(())
    }

    /// E-mail code first, then WhatsApp code; both must be accepted.
    pub async fn request_registration(&self, email: &str, number: &str) -> Result<()> {
        let email = validate_email(email)?;
        let number = PhoneNumber::parse(number)?;
        for channel in [OtpChannel::Email, OtpChannel::Number] {
            self.send_otp(OtpRequest {
                otp_type: OtpPurpose::Register,
                otp_for: channel,
                email: Some(email.clone()),
                number: Some(number.to_string()),
            })
            .await?;
        }
        self.session
            .set_pending(&email, Some(number.as_str()))
            .await?;
        info!("registration codes sent to {email} and {number}");
        Ok(())
    }

    pub async fn pending(&self) -> Result<PendingOtp> {
        self.session.pending().await
    }

    pub async fn resend(&self) -> Result<()> {
        let pending = self.session.pending().await?;
        match (pending.email, pending.phone) {
            (Some(email), Some(phone)) => self.request_registration(&email, &phone).await,
            (Some(email), None) => self.request_login(&email).await,
            _ => Err(WppError::validation(
                "no pending verification, start with login or register",
            )),
        }
    }

    /// Validates the codes for the pending login or registration and opens a session.
    pub async fn verify(&self, email_code: &str, number_code: Option<&str>) -> Result<Session> {
        let pending = self.session.pending().await?;
        let email = pending.email.ok_or_else(|| {
            WppError::validation("no pending verification, start with login or register")
        })?;
        let email_code = required_code(Some(email_code), "e-mail")?;

        let validation = match pending.phone {
            Some(phone) => OtpValidation {
                otp_type: OtpPurpose::Register,
                otp_for: OtpChannel::Email,
                email: email.clone(),
                number: Some(phone),
                email_otp_code: email_code,
                number_otp_code: Some(required_code(number_code, "WhatsApp")?),
            },
            None => OtpValidation {
                otp_type: OtpPurpose::Login,
                otp_for: OtpChannel::Email,
                email: email.clone(),
                number: None,
                email_otp_code: email_code,
                number_otp_code: None,
            },
        };

        let resp = self.client.validate_otp(&validation).await?;
        let (token, expires_in) = match (resp.success, resp.token, resp.expires_in) {
            (true, Some(token), Some(expires_in)) => (token, expires_in),
            _ => {
                let message = description_text(resp.description.as_ref())
                    .unwrap_or_else(|| "invalid or expired verification code".to_string());
                return Err(WppError::Auth(message));
            }
        };

        self.session.establish(&token, expires_in, now_ms()).await?;
        self.session.set_user_email(&email).await?;
        self.session.clear_pending().await?;
        info!("logged in as {email}");
        self.session
            .current()
            .await
            .ok_or_else(|| WppError::Auth("session was not stored".into()))
    }

    pub async fn logout(&self) -> Result<()> {
        self.session.clear().await
    }
}
