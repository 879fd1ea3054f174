use std::collections::HashMap;

use eyre::Result;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{
    clock::now_secs,
    oidc::Claims,
    strategy::{Login, LoginAttempt},
};

const PENDING_KEY: &str = "oidc.pending";
const USER_KEY: &str = "user";
const ACCESS_TOKEN_KEY: &str = "access_token";

/// A login started by `/auth` that has not come back through the callback yet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PendingAuth {
    pub return_path: Option<String>,
    #[serde(flatten)]
    pub attempt: LoginAttempt,
    pub created_at: u64,
}

type PendingMap = HashMap<String, PendingAuth>;

/// Pending logins of one browser session, keyed by their `state` value.
pub struct PendingLogins<'a> {
    session: &'a Session,
    ttl: u64,
}

impl<'a> PendingLogins<'a> {
    pub const fn new(session: &'a Session, ttl: u64) -> Self {
        Self { session, ttl }
    }

    pub async fn begin(&self, state: String, auth: PendingAuth) -> Result<()> {
        let mut pending = self.load().await?;
        pending.insert(state, auth);
        self.store(pending).await
    }

    /// Removes and returns the login for `state`, if it exists and has not expired.
    pub async fn take(&self, state: &str) -> Result<Option<PendingAuth>> {
        let mut pending = self.load().await?;
        let auth = pending.remove(state);
        self.store(pending).await?;
        Ok(auth)
    }

    async fn load(&self) -> Result<PendingMap> {
        let mut pending: PendingMap = self.session.get(PENDING_KEY).await?.unwrap_or_default();
        prune(&mut pending, now_secs(), self.ttl);
        Ok(pending)
    }

    async fn store(&self, pending: PendingMap) -> Result<()> {
        if pending.is_empty() {
            self.session.remove::<PendingMap>(PENDING_KEY).await?;
        } else {
            self.session.insert(PENDING_KEY, pending).await?;
        }
        Ok(())
    }
}

fn prune(pending: &mut PendingMap, now: u64, ttl: u64) {
    pending.retain(|_, auth| now.saturating_sub(auth.created_at) < ttl);
}

/// Stores the login in the session under a fresh session id.
pub async fn sign_in(session: &Session, login: Login) -> Result<()> {
    session.cycle_id().await?;
    session.insert(USER_KEY, login.claims).await?;
    session.insert(ACCESS_TOKEN_KEY, login.access_token).await?;
    Ok(())
}

pub async fn user(session: &Session) -> Result<Option<Claims>> {
    Ok(session.get(USER_KEY).await?)
}
