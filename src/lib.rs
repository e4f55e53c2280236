pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod notifications;
pub mod oauth;
pub mod storage;
pub mod utils;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::notifications::SystemEmailService;
use crate::oauth::{GoogleIdentityVerifier, TokenInfoVerifier};
use crate::storage::MediaStorage;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: SystemEmailService,
    pub storage: MediaStorage,
    pub google: Arc<dyn GoogleIdentityVerifier>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let mailer = SystemEmailService::new(config.email.clone());
        let storage = MediaStorage::new(&config.uploads);
        let google = Arc::new(TokenInfoVerifier::new(config.auth.google_client_id.clone()));

        Self {
            config,
            db,
            rate_limiter,
            mailer,
            storage,
            google,
        }
    }

    /// Replace the Google ID token verifier
    pub fn with_google_verifier(mut self, verifier: Arc<dyn GoogleIdentityVerifier>) -> Self {
        self.google = verifier;
        self
    }
}
