use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;

use super::{error::ServerResult, AppState};
use crate::session;

pub async fn me(State(state): State<AppState>, session: Session) -> ServerResult<Response> {
    let Some(claims) = session::user(&session).await? else {
        return Ok(
            Redirect::to(&format!("{}?returnPath=/me", state.settings.login_page)).into_response(),
        );
    };
    let body = serde_json::to_string_pretty(&claims)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
