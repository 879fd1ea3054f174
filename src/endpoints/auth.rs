use axum::{
    extract::{Query, State},
    http::HeaderValue,
    response::Redirect,
};
use eyre::{bail, eyre, Context, Result};
use log::debug;
use serde::Deserialize;
use tower_sessions::Session;

use super::{
    error::{ServerResult, WithRedirect},
    AppState,
};
use crate::{
    clock::now_secs,
    oidc::random_token,
    session::{self, PendingAuth, PendingLogins},
    strategy::Authorization,
};

const STATE_LENGTH: usize = 64;

#[derive(Deserialize, Debug)]
pub struct AuthQuery {
    #[serde(rename = "returnPath")]
    return_path: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub async fn root() -> Redirect {
    Redirect::to("/auth")
}

pub async fn auth(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<AuthQuery>,
) -> ServerResult<Redirect> {
    let oauth_state = random_token(STATE_LENGTH);
    let Authorization { url, attempt } = state.strategy.initiate(&oauth_state)?;
    let return_path = query.return_path.filter(|path| is_local_path(path));
    debug!("starting login {oauth_state} (return path {return_path:?})");
    PendingLogins::new(&session, state.settings.pending_state_ttl)
        .begin(
            oauth_state,
            PendingAuth {
                return_path,
                attempt,
                created_at: now_secs(),
            },
        )
        .await
        .wrap_err("could not store pending login")?;
    Ok(Redirect::to(url.as_str()))
}

pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<CallbackQuery>,
) -> ServerResult<Redirect, Redirect> {
    debug!("callback: {:?}", query);
    let next = complete_login(&state, &session, query)
        .await
        .with_redirect(Redirect::to(&state.settings.login_page))?;
    Ok(Redirect::to(&next))
}

async fn complete_login(state: &AppState, session: &Session, query: CallbackQuery) -> Result<String> {
    let oauth_state = query.state.ok_or_else(|| eyre!("state param not found"))?;
    let pending = PendingLogins::new(session, state.settings.pending_state_ttl)
        .take(&oauth_state)
        .await?
        .ok_or_else(|| eyre!("no pending login for state {oauth_state}"))?;
    if let Some(error) = query.error {
        bail!(
            "provider returned {error}: {}",
            query.error_description.unwrap_or_default()
        );
    }
    let code = query.code.ok_or_else(|| eyre!("code param not found"))?;

    let login = state
        .strategy
        .callback(&pending.attempt, &code)
        .await
        .wrap_err("could not complete login")?;
    session::sign_in(session, login)
        .await
        .wrap_err("could not store login in session")?;

    Ok(pending
        .return_path
        .filter(|_| state.settings.honor_return_path)
        .unwrap_or_else(|| "/me".to_owned()))
}

/// Only same-origin paths are remembered, so the flow cannot end on another host.
/// The path must also fit in a `Location` header as is.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.starts_with("/\\")
        && HeaderValue::from_str(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_local_path() {
        assert!(is_local_path("/dashboard"));
        assert!(is_local_path("/me?tab=claims"));
        assert!(!is_local_path("http://evil.example"));
        assert!(!is_local_path("//evil.example"));
        assert!(!is_local_path("/\\evil.example"));
        assert!(!is_local_path("dashboard"));
        assert!(!is_local_path(""));
        assert!(!is_local_path("/a\nb"));
        assert!(!is_local_path("/a\r\nSet-Cookie: x=y"));
        assert!(!is_local_path("/a\0b"));
    }
}
