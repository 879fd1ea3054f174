use std::{env, fs, path::PathBuf};

use config::File;
use eyre::{Context, Result};
use log::info;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Config {
    pub discovery_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub client_secret_file: Option<PathBuf>,
    #[serde(deserialize_with = "string_list")]
    pub response_types: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub redirect_uris: Vec<String>,
    pub scope: String,
    #[serde(deserialize_with = "string_list")]
    pub requested_claims: Vec<String>,
    pub token_endpoint_auth_method: TokenAuthMethod,
    pub fetch_userinfo: bool,
    pub clock_tolerance: u64,
    pub environment: Option<String>,
    pub host: String,
    pub port: u16,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    pub public_dir: PathBuf,
    pub login_page: String,
    pub pending_state_ttl: u64,
    pub session_ttl: i64,
    pub honor_return_path: bool,
}

#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ClientSecret {
    File { client_secret_file: PathBuf },
    String { client_secret: String },
}

impl ClientSecret {
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::String { client_secret } => Ok(client_secret.clone()),
            Self::File { client_secret_file } => Ok(fs::read_to_string(client_secret_file)
                .wrap_err_with(|| {
                    format!(
                        "could not read client secret from {}",
                        client_secret_file.display()
                    )
                })?
                .trim()
                .to_owned()),
        }
    }
}

/// How the client authenticates itself at the token endpoint.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
}

impl Config {
    /// A secret file takes precedence over an inline secret.
    pub fn client_secret(&self) -> ClientSecret {
        match &self.client_secret_file {
            Some(client_secret_file) => ClientSecret::File {
                client_secret_file: client_secret_file.clone(),
            },
            None => ClientSecret::String {
                client_secret: self.client_secret.clone().unwrap_or_default(),
            },
        }
    }

    /// `ENVIRONMENT=local` serves HTTPS with the local certificate pair.
    pub fn is_local(&self) -> bool {
        self.environment.as_deref() == Some("local")
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uris.first().map(String::as_str)
    }

    pub fn response_type(&self) -> String {
        self.response_types.join(" ")
    }
}

#[cfg(test)]
impl Config {
    pub fn for_discovery(discovery_url: &str) -> Self {
        Self {
            discovery_url: discovery_url.to_owned(),
            client_id: "demo-client".to_owned(),
            client_secret: Some("demo-client-secret-with-enough-entropy".to_owned()),
            client_secret_file: None,
            response_types: vec!["code".to_owned()],
            redirect_uris: vec!["https://localhost:8080/auth/cb".to_owned()],
            scope: "openid profile".to_owned(),
            requested_claims: Vec::new(),
            token_endpoint_auth_method: TokenAuthMethod::ClientSecretBasic,
            fetch_userinfo: false,
            clock_tolerance: 300,
            environment: None,
            host: "127.0.0.1".to_owned(),
            port: 0,
            tls_cert: PathBuf::from("server.cert"),
            tls_key: PathBuf::from("server.key"),
            public_dir: PathBuf::from("public"),
            login_page: "/login.html".to_owned(),
            pending_state_ttl: 600,
            session_ttl: 86_400,
            honor_return_path: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringList {
    List(Vec<String>),
    Joined(String),
}

/// Accepts a TOML array or a comma separated string from the environment.
fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match StringList::deserialize(deserializer)? {
        StringList::List(items) => items,
        StringList::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect(),
    })
}

pub fn load() -> Result<Config> {
    let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_owned());
    info!("Loading config from {path}");
    Ok(config::Config::builder()
        .set_default(
            "discovery_url",
            "https://banno.com/a/oidc-provider/api/v0/.well-known/openid-configuration",
        )?
        .set_default("client_id", "")?
        .set_default("response_types", vec!["code"])?
        .set_default("redirect_uris", vec!["https://localhost:8080/auth/cb"])?
        .set_default("scope", "openid profile")?
        .set_default("requested_claims", Vec::<String>::new())?
        .set_default("token_endpoint_auth_method", "client_secret_basic")?
        .set_default("fetch_userinfo", false)?
        .set_default("clock_tolerance", 300)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("tls_cert", "server.cert")?
        .set_default("tls_key", "server.key")?
        .set_default("public_dir", "public")?
        .set_default("login_page", "/login.html")?
        .set_default("pending_state_ttl", 600)?
        .set_default("session_ttl", 86_400)?
        .set_default("honor_return_path", false)?
        .add_source(File::with_name(&path).required(false))
        .add_source(config::Environment::default())
        .build()?
        .try_deserialize()?)
}
