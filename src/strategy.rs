use async_trait::async_trait;
use eyre::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::oidc::{random_token, Claims, OidcClient, PkceChallenge};

/// Per-attempt secrets that must survive the round trip through the provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub code_verifier: String,
    pub nonce: String,
}

#[derive(Debug)]
pub struct Authorization {
    pub url: Url,
    pub attempt: LoginAttempt,
}

#[derive(Debug)]
pub struct Login {
    pub claims: Claims,
    pub access_token: String,
}

/// The two halves of a redirect based login.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Builds the provider redirect for a new attempt identified by `state`.
    fn initiate(&self, state: &str) -> Result<Authorization>;

    /// Redeems the authorization `code` returned for `attempt`.
    async fn callback(&self, attempt: &LoginAttempt, code: &str) -> Result<Login>;
}

pub struct OidcStrategy {
    client: OidcClient,
    fetch_userinfo: bool,
}

impl OidcStrategy {
    pub const fn new(client: OidcClient, fetch_userinfo: bool) -> Self {
        Self {
            client,
            fetch_userinfo,
        }
    }
}

#[async_trait]
impl Strategy for OidcStrategy {
    fn initiate(&self, state: &str) -> Result<Authorization> {
        let pkce = PkceChallenge::generate();
        let nonce = random_token(32);
        let url = self
            .client
            .authorization_url(state, &nonce, &pkce.challenge)
            .wrap_err("could not build authorization url")?;
        Ok(Authorization {
            url,
            attempt: LoginAttempt {
                code_verifier: pkce.verifier,
                nonce,
            },
        })
    }

    async fn callback(&self, attempt: &LoginAttempt, code: &str) -> Result<Login> {
        let token = self
            .client
            .exchange_code(code, &attempt.code_verifier)
            .await
            .wrap_err("could not exchange authorization code")?;
        debug!("token response: {:?}", token);
        let mut claims = self
            .client
            .validate_id_token(&token.id_token, &attempt.nonce)
            .wrap_err("invalid id token")?;
        if self.fetch_userinfo {
            let userinfo = self
                .client
                .userinfo(&token.access_token)
                .await
                .wrap_err("could not fetch user info")?;
            merge_userinfo(&mut claims, userinfo)?;
        }
        debug!("claims: {:?}", claims);
        Ok(Login {
            claims,
            access_token: token.access_token,
        })
    }
}

/// Adds userinfo claims the id token does not already carry.
fn merge_userinfo(claims: &mut Claims, userinfo: Claims) -> Result<()> {
    if userinfo.get("sub") != claims.get("sub") {
        bail!("userinfo subject does not match id token");
    }
    for (name, value) in userinfo {
        claims.entry(name).or_insert(value);
    }
    Ok(())
}
