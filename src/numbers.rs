use crate::api::WppClient;
use crate::error::Result;
use crate::types::{NumberRole, NumbersSnapshot, PhoneNumber};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Cached view of the worker and admin numbers registered with the API.
pub struct NumbersRegistry {
    client: Arc<WppClient>,
    snapshot: RwLock<NumbersSnapshot>,
    last_error: RwLock<Option<String>>,
}

impl NumbersRegistry {
    pub fn new(client: Arc<WppClient>) -> Self {
        Self {
            client,
            snapshot: RwLock::new(NumbersSnapshot::default()),
            last_error: RwLock::new(None),
        }
    }

    /// On failure the cached snapshot is emptied and the error recorded.
    pub async fn refresh(&self) -> Result<NumbersSnapshot> {
        match self.client.list_numbers().await {
            Ok(snapshot) => {
                *self.snapshot.write().await = snapshot.clone();
                *self.last_error.write().await = None;
                info!(
                    "numbers: {} workers, {} admins",
                    snapshot.workers.len(),
                    snapshot.admins.len()
                );
                Ok(snapshot)
            }
            Err(err) => {
                warn!("failed to load numbers: {}", err.user_message());
                *self.snapshot.write().await = NumbersSnapshot::default();
                *self.last_error.write().await = Some(err.user_message());
                Err(err)
            }
        }
    }

    pub async fn snapshot(&self) -> NumbersSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn workers(&self) -> Vec<String> {
        self.snapshot.read().await.workers.clone()
    }

    pub async fn admins(&self) -> Vec<String> {
        self.snapshot.read().await.admins.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Validates `raw` locally before calling the API.
    pub async fn add(&self, raw: &str, role: NumberRole) -> Result<NumbersSnapshot> {
        let number = PhoneNumber::parse(raw)?;
        self.client.add_number(&number, role).await?;
        info!("added {number} as {}", role.as_wire());
        self.refresh().await
    }

    pub async fn remove(&self, number: &str, role: NumberRole) -> Result<NumbersSnapshot> {
        self.client.remove_number(number.trim(), role).await?;
        info!("removed {} from {}", number.trim(), role.as_wire());
        self.refresh().await
    }
}
