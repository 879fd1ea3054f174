use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use eyre::{bail, eyre, Context, Result};
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Header, Validation};
use log::info;
use rand::{distributions::Alphanumeric, Rng, RngCore};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
    clock::now_secs,
    config::{Config, TokenAuthMethod},
};

/// Claims about the signed-in user, in the order the provider issued them.
pub type Claims = Map<String, Value>;

#[derive(Deserialize, Debug, Clone)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    pub jwks_uri: Url,
}

/// Provider metadata and signing keys, fetched once at startup.
#[derive(Debug)]
pub struct Issuer {
    pub metadata: ProviderMetadata,
    pub jwks: JwkSet,
}

impl Issuer {
    pub async fn discover(discovery_url: &str) -> Result<Self> {
        let http = Client::new();
        let metadata: ProviderMetadata = http
            .get(discovery_url)
            .send()
            .await
            .wrap_err("could not fetch discovery document")?
            .error_for_status()?
            .json()
            .await
            .wrap_err("could not parse discovery document")?;
        let jwks: JwkSet = http
            .get(metadata.jwks_uri.as_str())
            .send()
            .await
            .wrap_err("could not fetch provider keys")?
            .error_for_status()?
            .json()
            .await
            .wrap_err("could not parse provider keys")?;
        info!(
            "Discovered issuer {} ({} signing keys)",
            metadata.issuer,
            jwks.keys.len()
        );
        Ok(Self { metadata, jwks })
    }
}

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub id_token: String,
}

pub struct OidcClient {
    issuer: Issuer,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    response_type: String,
    scope: String,
    claims_request: String,
    auth_method: TokenAuthMethod,
    clock_tolerance: u64,
    http: Client,
}

impl OidcClient {
    pub fn new(issuer: Issuer, config: &Config) -> Result<Self> {
        let redirect_uri = config
            .redirect_uri()
            .ok_or_else(|| eyre!("no redirect uri configured"))?
            .to_owned();
        let claims: Map<String, Value> = config
            .requested_claims
            .iter()
            .map(|claim| (claim.clone(), Value::Null))
            .collect();
        Ok(Self {
            issuer,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret().resolve()?,
            redirect_uri,
            response_type: config.response_type(),
            scope: config.scope.clone(),
            // the same claims are requested in the id token and from the userinfo endpoint
            claims_request: json!({ "id_token": claims, "userinfo": claims }).to_string(),
            auth_method: config.token_endpoint_auth_method,
            clock_tolerance: config.clock_tolerance,
            http: Client::new(),
        })
    }

    pub fn authorization_url(&self, state: &str, nonce: &str, code_challenge: &str) -> Result<Url> {
        Ok(Url::parse_with_params(
            self.issuer.metadata.authorization_endpoint.as_str(),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", self.response_type.as_str()),
                ("scope", self.scope.as_str()),
                ("state", state),
                ("nonce", nonce),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
                ("claims", self.claims_request.as_str()),
            ],
        )?)
    }

    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        let request = self.http.post(self.issuer.metadata.token_endpoint.as_str());
        let request = match self.auth_method {
            TokenAuthMethod::ClientSecretBasic => {
                request.basic_auth(&self.client_id, Some(&self.client_secret))
            }
            TokenAuthMethod::ClientSecretPost => {
                form.push(("client_id", self.client_id.as_str()));
                form.push(("client_secret", self.client_secret.as_str()));
                request
            }
        };
        let token: TokenResponse = request
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            bail!("unsupported token type {}", token.token_type);
        }
        Ok(token)
    }

    pub async fn userinfo(&self, access_token: &str) -> Result<Claims> {
        let endpoint = self
            .issuer
            .metadata
            .userinfo_endpoint
            .as_ref()
            .ok_or_else(|| eyre!("provider has no userinfo endpoint"))?;
        Ok(self
            .http
            .get(endpoint.as_str())
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub fn validate_id_token(&self, id_token: &str, expected_nonce: &str) -> Result<Claims> {
        let header = decode_header(id_token).wrap_err("could not decode id token header")?;
        let key = self.decoding_key(&header)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.metadata.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = self.clock_tolerance;

        let claims = decode::<Claims>(id_token, &key, &validation)
            .wrap_err("id token validation failed")?
            .claims;

        let issued_at = claims
            .get("iat")
            .and_then(Value::as_u64)
            .ok_or_else(|| eyre!("iat claim missing"))?;
        if issued_at > now_secs() + self.clock_tolerance {
            bail!("id token issued in the future");
        }
        match claims.get("nonce").and_then(Value::as_str) {
            Some(nonce) if nonce == expected_nonce => {}
            Some(_) => bail!("nonce mismatch"),
            None => bail!("nonce claim missing"),
        }
        Ok(claims)
    }

    fn decoding_key(&self, header: &Header) -> Result<DecodingKey> {
        match header.alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                Ok(DecodingKey::from_secret(self.client_secret.as_bytes()))
            }
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::EdDSA => {
                let keys = &self.issuer.jwks;
                let jwk = match header.kid.as_deref() {
                    Some(kid) => keys.find(kid),
                    None if keys.keys.len() == 1 => keys.keys.first(),
                    None => None,
                }
                .ok_or_else(|| eyre!("no matching key for id token"))?;
                Ok(DecodingKey::from_jwk(jwk)?)
            }
        }
    }
}

/// PKCE verifier and its S256 challenge, generated once per login attempt.
#[derive(Debug)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        Self {
            challenge: Self::challenge_for(&verifier),
            verifier,
        }
    }

    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub mod tests {
    use jsonwebtoken::{encode, EncodingKey};
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    pub const SECRET: &str = "demo-client-secret-with-enough-entropy";

    pub async fn provider() -> MockServer {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{base}/authorize"),
                "token_endpoint": format!("{base}/token"),
                "userinfo_endpoint": format!("{base}/userinfo"),
                "jwks_uri": format!("{base}/jwks"),
                "id_token_signing_alg_values_supported": ["HS256"],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [] })))
            .mount(&server)
            .await;
        server
    }

    pub fn discovery_url(server: &MockServer) -> String {
        format!("{}/.well-known/openid-configuration", server.uri())
    }

    pub async fn client(server: &MockServer, config: &Config) -> OidcClient {
        let issuer = Issuer::discover(&discovery_url(server)).await.unwrap();
        OidcClient::new(issuer, config).unwrap()
    }

    pub fn id_token(server: &MockServer, nonce: &str, exp_offset: i64) -> String {
        let now = i64::try_from(now_secs()).unwrap();
        let claims = json!({
            "iss": server.uri(),
            "sub": "user-123",
            "aud": "demo-client",
            "iat": now,
            "exp": now + exp_offset,
            "nonce": nonce,
            "name": "Demo User",
        });
        encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_discover() {
        let server = provider().await;
        let issuer = Issuer::discover(&discovery_url(&server)).await.unwrap();
        assert_eq!(issuer.metadata.issuer, server.uri());
        assert_eq!(
            issuer.metadata.token_endpoint.as_str(),
            format!("{}/token", server.uri())
        );
        assert!(issuer.jwks.keys.is_empty());
    }

    #[tokio::test]
    async fn test_discover_malformed_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;
        assert!(Issuer::discover(&discovery_url(&server)).await.is_err());
    }

    #[tokio::test]
    async fn test_discover_missing_document() {
        let server = MockServer::start().await;
        assert!(Issuer::discover(&discovery_url(&server)).await.is_err());
    }

    #[tokio::test]
    async fn test_discover_unreachable() {
        assert!(Issuer::discover("http://127.0.0.1:9/.well-known/openid-configuration")
            .await
            .is_err());
        assert!(Issuer::discover("not a url").await.is_err());
    }

    #[tokio::test]
    async fn test_authorization_url() {
        let server = provider().await;
        let mut config = Config::for_discovery(&discovery_url(&server));
        config.requested_claims = vec!["email".to_owned()];
        let client = client(&server, &config).await;

        let url = client
            .authorization_url("the-state", "the-nonce", "the-challenge")
            .unwrap();
        assert_eq!(url.path(), "/authorize");
        let param = |key: &str| {
            url.query_pairs()
                .find_map(|(k, v)| (k == key).then(|| v.into_owned()))
                .unwrap()
        };
        assert_eq!(param("client_id"), "demo-client");
        assert_eq!(param("redirect_uri"), "https://localhost:8080/auth/cb");
        assert_eq!(param("response_type"), "code");
        assert_eq!(param("scope"), "openid profile");
        assert_eq!(param("state"), "the-state");
        assert_eq!(param("nonce"), "the-nonce");
        assert_eq!(param("code_challenge"), "the-challenge");
        assert_eq!(param("code_challenge_method"), "S256");
        let claims: Value = serde_json::from_str(&param("claims")).unwrap();
        assert_eq!(
            claims,
            json!({ "id_token": { "email": null }, "userinfo": { "email": null } })
        );
    }

    #[tokio::test]
    async fn test_exchange_code_basic_auth() {
        let server = provider().await;
        let token = id_token(&server, "n", 3600);
        let basic = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!("demo-client:{SECRET}"))
        );
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("authorization", basic.as_str()))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier=the-verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "token_type": "Bearer",
                "id_token": token,
                "expires_in": 300,
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = client(&server, &Config::for_discovery(&discovery_url(&server))).await;

        let response = client.exchange_code("the-code", "the-verifier").await.unwrap();
        assert_eq!(response.access_token, "access");
        assert_eq!(response.id_token, token);
    }

    #[tokio::test]
    async fn test_exchange_code_post_auth() {
        let server = provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("client_id=demo-client"))
            .and(body_string_contains(format!("client_secret={SECRET}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "token_type": "bearer",
                "id_token": "x.y.z",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let mut config = Config::for_discovery(&discovery_url(&server));
        config.token_endpoint_auth_method = TokenAuthMethod::ClientSecretPost;
        let client = client(&server, &config).await;

        assert!(client.exchange_code("the-code", "the-verifier").await.is_ok());
    }

    #[tokio::test]
    async fn test_exchange_code_error() {
        let server = provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;
        let client = client(&server, &Config::for_discovery(&discovery_url(&server))).await;

        assert!(client.exchange_code("the-code", "the-verifier").await.is_err());
    }

    #[tokio::test]
    async fn test_validate_id_token() {
        let server = provider().await;
        let client = client(&server, &Config::for_discovery(&discovery_url(&server))).await;

        let claims = client
            .validate_id_token(&id_token(&server, "n", 3600), "n")
            .unwrap();
        assert_eq!(claims["sub"], "user-123");
        assert_eq!(claims["name"], "Demo User");

        // expired, but within the clock tolerance
        assert!(client
            .validate_id_token(&id_token(&server, "n", -100), "n")
            .is_ok());
        assert!(client
            .validate_id_token(&id_token(&server, "n", -400), "n")
            .is_err());

        assert!(client
            .validate_id_token(&id_token(&server, "other", 3600), "n")
            .is_err());
        assert!(client.validate_id_token("garbage", "n").is_err());
    }

    #[tokio::test]
    async fn test_validate_id_token_audience_and_issuer() {
        let server = provider().await;
        let mut config = Config::for_discovery(&discovery_url(&server));
        config.client_id = "someone-else".to_owned();
        let wrong_audience = client(&server, &config).await;
        assert!(wrong_audience
            .validate_id_token(&id_token(&server, "n", 3600), "n")
            .is_err());

        let other = provider().await;
        let wrong_issuer = client(&server, &Config::for_discovery(&discovery_url(&server))).await;
        assert!(wrong_issuer
            .validate_id_token(&id_token(&other, "n", 3600), "n")
            .is_err());
    }

    #[tokio::test]
    async fn test_validate_id_token_unknown_key() {
        let server = provider().await;
        let client = client(&server, &Config::for_discovery(&discovery_url(&server))).await;
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"unknown"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"user-123"}"#);
        let token = format!("{header}.{payload}.c2lnbmF0dXJl");

        let err = client.validate_id_token(&token, "n").unwrap_err();
        assert!(err.to_string().contains("no matching key"));
    }

    #[tokio::test]
    async fn test_userinfo() {
        let server = provider().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "user-123",
                "email": "demo@example.com",
            })))
            .mount(&server)
            .await;
        let client = client(&server, &Config::for_discovery(&discovery_url(&server))).await;

        let info = client.userinfo("access").await.unwrap();
        assert_eq!(info["email"], "demo@example.com");
        assert!(client.userinfo("wrong").await.is_err());
    }

    #[test]
    fn test_pkce_challenge() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.verifier.len(), 86);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(
            pkce.challenge,
            URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()))
        );
        assert_ne!(pkce.verifier, PkceChallenge::generate().verifier);
    }

    #[test]
    fn test_random_token() {
        let token = random_token(64);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, random_token(64));
    }
}
