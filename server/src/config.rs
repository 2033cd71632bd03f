use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_path: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub tls: Option<TlsConfig>,
    /// Buffered events per tracking room subscriber before it starts lagging.
    pub room_capacity: usize,
    /// Users registered at startup when their token is unknown.
    pub bootstrap_users: Vec<BootstrapUser>,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapUser {
    pub name: String,
    pub token: String,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let bind = env::var("SERVER_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("SERVER_BIND is not a socket address")?;

        let database_path = env::var("DATABASE_PATH").ok().map(PathBuf::from);
        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "server/log".to_string()).into();

        let tls = match (env::var("TLS_CERT"), env::var("TLS_KEY")) {
            (Ok(cert), Ok(key)) => Some(TlsConfig { cert: cert.into(), key: key.into() }),
            _ => None,
        };

        let room_capacity = parse_room_capacity(env::var("ROOM_CAPACITY").ok().as_deref())?;

        let bootstrap_users = parse_bootstrap_users(&env::var("BOOTSTRAP_USERS").unwrap_or_default())?;

        Ok(Self {
            bind,
            database_path,
            log_dir,
            tls,
            room_capacity,
            bootstrap_users,
        })
    }
}

/// Defaults to 100 when unset. Zero is rejected, a room needs a buffer.
pub fn parse_room_capacity(raw: Option<&str>) -> Result<usize> {
    let Some(raw) = raw else {
        return Ok(100);
    };
    let capacity: usize = raw.trim().parse().context("ROOM_CAPACITY is not a number")?;
    anyhow::ensure!(capacity > 0, "ROOM_CAPACITY must be positive");
    Ok(capacity)
}

/// Parses `name:token,name:token`.
pub fn parse_bootstrap_users(raw: &str) -> Result<Vec<BootstrapUser>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, token) = entry
                .split_once(':')
                .with_context(|| format!("Bootstrap user '{}' is not name:token", entry))?;
            anyhow::ensure!(!name.is_empty() && !token.is_empty(), "Bootstrap user '{}' has an empty field", entry);
            Ok(BootstrapUser { name: name.to_string(), token: token.to_string() })
        })
        .collect()
}
