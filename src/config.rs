use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Secret used when none is configured. Only fit for local development.
pub const DEV_JWT_SECRET: &str = "media-store-dev-secret";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub asset_dir: String,
    pub staging_dir: String,
    pub database_url: String,
    /// Origin clients reach the service on; asset URLs are built from it.
    pub public_url: String,
    pub jwt_secret: String,
    pub max_upload_bytes: usize,
}

/// What the binary should do after loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupMode {
    Serve,
    Migrate,
    IssueToken(String),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Media upload and lifecycle service")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where video and thumbnail assets are stored (overrides MEDIA_STORE_ASSET_DIR)
    #[arg(long)]
    pub asset_dir: Option<String>,

    /// Directory for in-flight uploads (overrides MEDIA_STORE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Database URL (overrides MEDIA_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public origin, e.g. https://media.example.com (overrides MEDIA_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// HS256 secret for bearer tokens (overrides MEDIA_STORE_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Largest accepted request body in bytes (overrides MEDIA_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Print a bearer token for SUBJECT and exit
    #[arg(long, value_name = "SUBJECT", conflicts_with = "migrate")]
    pub issue_token: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args.
    pub fn from_env_and_args() -> Result<(Self, StartupMode)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, StartupMode)> {
        // --- Environment fallback ---
        let env_host = env::var("MEDIA_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("MEDIA_STORE_PORT", 3000u16)?;
        let env_assets =
            env::var("MEDIA_STORE_ASSET_DIR").unwrap_or_else(|_| "./data/assets".into());
        let env_staging =
            env::var("MEDIA_STORE_STAGING_DIR").unwrap_or_else(|_| "./data/staging".into());
        let env_db = env::var("MEDIA_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/media_store.db".into());
        let env_public = env::var("MEDIA_STORE_PUBLIC_URL").ok();
        let env_secret = env::var("MEDIA_STORE_JWT_SECRET").ok();
        let env_max_upload = env_parsed("MEDIA_STORE_MAX_UPLOAD_BYTES", 512 * 1024 * 1024usize)?;

        // --- Merge ---
        let port = args.port.unwrap_or(env_port);
        let public_url = args
            .public_url
            .or(env_public)
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            asset_dir: args.asset_dir.unwrap_or(env_assets),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            database_url: args.database_url.unwrap_or(env_db),
            public_url: public_url.trim_end_matches('/').to_string(),
            jwt_secret: args
                .jwt_secret
                .or(env_secret)
                .unwrap_or_else(|| DEV_JWT_SECRET.into()),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        let mode = match (args.migrate, args.issue_token) {
            (true, _) => StartupMode::Migrate,
            (false, Some(subject)) => StartupMode::IssueToken(subject),
            (false, None) => StartupMode::Serve,
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL prefix stored assets are published under.
    pub fn asset_base_url(&self) -> String {
        format!("{}/assets", self.public_url)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
