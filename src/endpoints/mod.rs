use std::{path::PathBuf, sync::Arc};

use axum::{routing::get, Router};
use tower_http::services::ServeDir;
use tower_sessions::{
    cookie::{time::Duration, SameSite},
    Expiry, SessionManagerLayer, SessionStore,
};

use crate::{config::Config, strategy::Strategy};

mod auth;
mod error;
mod me;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone)]
pub struct Settings {
    pub login_page: String,
    pub pending_state_ttl: u64,
    pub session_ttl: i64,
    pub honor_return_path: bool,
    pub public_dir: PathBuf,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            login_page: config.login_page.clone(),
            pending_state_ttl: config.pending_state_ttl,
            session_ttl: config.session_ttl,
            honor_return_path: config.honor_return_path,
            public_dir: config.public_dir.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    strategy: Arc<dyn Strategy>,
    settings: Arc<Settings>,
}

pub fn router<S>(strategy: Arc<dyn Strategy>, settings: Settings, store: S) -> Router
where
    S: SessionStore + Clone,
{
    let sessions = SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE)
        .with_http_only(true)
        .with_secure(true)
        .with_same_site(SameSite::None)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(settings.session_ttl)));
    let public = ServeDir::new(&settings.public_dir);

    Router::new()
        .route("/", get(auth::root))
        .route("/auth", get(auth::auth))
        .route("/auth/cb", get(auth::callback))
        .route("/me", get(me::me))
        .fallback_service(public)
        .layer(sessions)
        .with_state(AppState {
            strategy,
            settings: Arc::new(settings),
        })
}
