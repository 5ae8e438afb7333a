use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::config::Config;
use crate::db::Store;
use crate::mail::{LogMailer, Mailer, SmtpMailer};
use crate::services::{AccountService, SeaOrmAccountService};

pub mod accounts;
mod error;
mod types;

pub use error::ApiError;
pub use types::ApiResponse;

use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub account_service: Arc<dyn AccountService>,
}

impl AppState {
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountService {
        self.account_service.as_ref()
    }
}

pub async fn create_app_state_from_config(config: Config) -> anyhow::Result<Arc<AppState>> {
    let store = Store::with_pool_options(
        &config.general.database_path,
        config.general.max_db_connections,
        config.general.min_db_connections,
    )
    .await?;

    let mailer: Arc<dyn Mailer> = if config.smtp.enabled {
        Arc::new(SmtpMailer::new(&config.smtp)?)
    } else {
        Arc::new(LogMailer)
    };

    let account_service = Arc::new(SeaOrmAccountService::new(
        mailer,
        config.server.app_url.clone(),
        config.admin.clone(),
    ));

    Ok(Arc::new(AppState {
        config: Arc::new(RwLock::new(config)),
        store,
        account_service,
    }))
}

pub async fn router(state: Arc<AppState>) -> Router {
    let (cors_origins, secure_cookies) = {
        let config = state.config.read().await;
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
        )
    };

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(60)));

    let api_router = Router::new()
        .route("/accounts", post(accounts::signup))
        .route("/accounts/verify", post(accounts::verify))
        .route(
            "/accounts/{id}/resend-verification",
            post(accounts::resend_verification),
        )
        .route(
            "/accounts/{id}",
            get(accounts::fetch).put(accounts::update),
        )
        .route("/forgot-password", post(accounts::forgot_password))
        .route("/reset-password", post(accounts::reset_password))
        .route("/auth/login", post(accounts::login))
        .route("/auth/logout", post(accounts::logout))
        .layer(session_layer)
        .with_state(state.clone());

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}
