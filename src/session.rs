use crate::db::Store;
use crate::error::{Result, WppError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const KEY_BEARER_TOKEN: &str = "wpp_bearer_token";
pub const KEY_TOKEN_EXPIRES_AT: &str = "wpp_token_expires_at";
pub const KEY_USER_EMAIL: &str = "wpp_user_email";
pub const KEY_PENDING_EMAIL: &str = "pending_email";
pub const KEY_PENDING_PHONE: &str = "pending_phone";

const NEAR_EXPIRY_MS: i64 = 5 * 60 * 1000;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub bearer_token: String,
    pub expires_at_ms: i64,
    pub user_email: Option<String>,
}

impl Session {
    pub fn from_expires_in(token: &str, expires_in_secs: i64, now_ms: i64) -> Self {
        Self {
            bearer_token: token.to_string(),
            expires_at_ms: now_ms.saturating_add(expires_in_secs.saturating_mul(1000)),
            user_email: None,
        }
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }

    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.expires_at_ms.saturating_sub(now_ms).max(0)
    }

    pub fn is_near_expiry(&self, now_ms: i64) -> bool {
        self.expires_at_ms.saturating_sub(now_ms) < NEAR_EXPIRY_MS
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at_ms).single()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_email: Option<String>,
    pub expires_at_ms: i64,
    pub remaining_ms: i64,
    pub valid: bool,
    pub near_expiry: bool,
}

/// Contact details awaiting OTP verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingOtp {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Single owner of the bearer token: created on OTP validation, destroyed on
/// logout or when a 401/expiry is detected.
#[derive(Debug)]
pub struct SessionManager {
    store: Store,
    current: RwLock<Option<Session>>,
}

impl SessionManager {
    pub async fn load(store: Store) -> Result<Self> {
        let token = store.kv_get(KEY_BEARER_TOKEN).await?;
        let expires = store.kv_get(KEY_TOKEN_EXPIRES_AT).await?;
        let email = store.kv_get(KEY_USER_EMAIL).await?;

        let current = match (token, expires.and_then(|v| v.parse::<i64>().ok())) {
            (Some(token), Some(expires_at_ms)) if !token.is_empty() => Some(Session {
                bearer_token: token,
                expires_at_ms,
                user_email: email,
            }),
            _ => None,
        };
        debug!("session loaded: present={}", current.is_some());

        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Replaces any previous session with a token valid for `expires_in_secs`.
    pub async fn establish(&self, token: &str, expires_in_secs: i64, now_ms: i64) -> Result<Session> {
        if token.trim().is_empty() || expires_in_secs <= 0 {
            return Err(WppError::Auth(
                "token or expiry missing from validation response".into(),
            ));
        }

        let mut session = Session::from_expires_in(token, expires_in_secs, now_ms);
        self.store
            .kv_delete_many(&[KEY_BEARER_TOKEN, KEY_TOKEN_EXPIRES_AT])
            .await?;
        self.store.kv_set(KEY_BEARER_TOKEN, &session.bearer_token).await?;
        self.store
            .kv_set(KEY_TOKEN_EXPIRES_AT, &session.expires_at_ms.to_string())
            .await?;

        let mut guard = self.current.write().await;
        session.user_email = guard.as_ref().and_then(|s| s.user_email.clone());
        if session.user_email.is_none() {
            session.user_email = self.store.kv_get(KEY_USER_EMAIL).await?;
        }
        *guard = Some(session.clone());
        info!(
            "session established, expires at {}",
            session
                .expires_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        );
        Ok(session)
    }

    pub async fn set_user_email(&self, email: &str) -> Result<()> {
        if email.trim().is_empty() {
            return Ok(());
        }
        self.store.kv_set(KEY_USER_EMAIL, email).await?;
        if let Some(session) = self.current.write().await.as_mut() {
            session.user_email = Some(email.to_string());
        }
        Ok(())
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    pub async fn is_valid_at(&self, now_ms: i64) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.is_valid_at(now_ms))
    }

    pub async fn is_authenticated(&self) -> bool {
        self.is_valid_at(now_ms()).await
    }

    /// The token while it is valid. An expired session is torn down.
    pub async fn bearer_token_at(&self, now_ms: i64) -> Result<Option<String>> {
        let session = self.current.read().await.clone();
        match session {
            Some(s) if s.is_valid_at(now_ms) => Ok(Some(s.bearer_token)),
            Some(_) => {
                warn!("bearer token expired, clearing session");
                self.clear().await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn bearer_token(&self) -> Result<Option<String>> {
        self.bearer_token_at(now_ms()).await
    }

    pub async fn info_at(&self, now_ms: i64) -> Option<SessionInfo> {
        self.current.read().await.as_ref().map(|s| SessionInfo {
            user_email: s.user_email.clone(),
            expires_at_ms: s.expires_at_ms,
            remaining_ms: s.remaining_ms(now_ms),
            valid: s.is_valid_at(now_ms),
            near_expiry: s.is_near_expiry(now_ms),
        })
    }

    /// Removes token, expiry, user e-mail and any pending OTP contact.
    pub async fn clear(&self) -> Result<()> {
        *self.current.write().await = None;
        self.store
            .kv_delete_many(&[
                KEY_BEARER_TOKEN,
                KEY_TOKEN_EXPIRES_AT,
                KEY_USER_EMAIL,
                KEY_PENDING_EMAIL,
                KEY_PENDING_PHONE,
            ])
            .await?;
        info!("session cleared");
        Ok(())
    }

    pub async fn set_pending(&self, email: &str, phone: Option<&str>) -> Result<()> {
        self.store.kv_set(KEY_PENDING_EMAIL, email).await?;
        match phone {
            Some(phone) => self.store.kv_set(KEY_PENDING_PHONE, phone).await?,
            None => self.store.kv_delete(KEY_PENDING_PHONE).await?,
        }
        Ok(())
    }

    pub async fn pending(&self) -> Result<PendingOtp> {
        Ok(PendingOtp {
            email: self.store.kv_get(KEY_PENDING_EMAIL).await?,
            phone: self.store.kv_get(KEY_PENDING_PHONE).await?,
        })
    }

    pub async fn clear_pending(&self) -> Result<()> {
        self.store
            .kv_delete_many(&[KEY_PENDING_EMAIL, KEY_PENDING_PHONE])
            .await
    }
}
