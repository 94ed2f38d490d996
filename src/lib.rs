pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod numbers;
pub mod poller;
pub mod recipients;
pub mod reports;
pub mod session;
pub mod spreadsheet;
pub mod types;

pub use api::WppClient;
pub use config::Config;
pub use error::{Result, WppError};

use self::auth::AuthFlow;
use self::config::resolve_database_url;
use self::db::Store;
use self::numbers::NumbersRegistry;
use self::session::SessionManager;
use std::sync::Arc;
use tracing::info;

/// Wired-up client state: configuration, persisted session and API client.
#[derive(Clone)]
pub struct App {
    pub config: Config,
    pub store: Store,
    pub session: Arc<SessionManager>,
    pub client: Arc<WppClient>,
}

impl App {
    pub async fn connect(config: Config) -> Result<Self> {
        let db_url = resolve_database_url(&config);
        let store = Store::connect(&db_url).await?;
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: Config, store: Store) -> Result<Self> {
        let session = Arc::new(SessionManager::load(store.clone()).await?);
        let client = Arc::new(WppClient::new(&config.api, session.clone()));
        info!("api endpoint {}", client.base_url());
        Ok(Self {
            config,
            store,
            session,
            client,
        })
    }

    pub fn auth(&self) -> AuthFlow {
        AuthFlow::new(self.client.clone(), self.session.clone())
    }

    pub fn numbers(&self) -> NumbersRegistry {
        NumbersRegistry::new(self.client.clone())
    }
}
