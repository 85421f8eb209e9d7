use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

/// Largest TTL a `chrono::Duration` can hold in seconds.
pub const MAX_SESSION_TTL_SECS: u64 = (i64::MAX / 1000) as u64;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub scratch_dir: String,
    pub database_url: String,
    pub storage_type: StorageType,
    pub scratch_type: ScratchType,
    /// Idle seconds before an unfinished upload is reaped. 0 disables reaping.
    pub session_ttl_secs: u64,
    pub reap_interval_secs: u64,
    pub max_body_bytes: usize,
}

/// Durable object storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Local,
    Memory,
}

impl FromStr for StorageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            other => bail!("unsupported storage type `{}`", other),
        }
    }
}

/// Where in-progress chunks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchType {
    Disk,
    Memory,
}

impl FromStr for ScratchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(Self::Disk),
            "memory" => Ok(Self::Memory),
            other => bail!("unsupported scratch type `{}`", other),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked file upload service")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where finished files are stored (overrides UPLOAD_SERVICE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Directory for in-progress chunks (overrides UPLOAD_SERVICE_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Database URL (overrides UPLOAD_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// `local` or `memory` (overrides UPLOAD_SERVICE_STORAGE_TYPE)
    #[arg(long)]
    pub storage_type: Option<String>,

    /// `disk` or `memory` (overrides UPLOAD_SERVICE_SCRATCH_TYPE)
    #[arg(long)]
    pub scratch_type: Option<String>,

    /// Seconds of inactivity before an upload session is reaped, 0 to keep forever
    /// (overrides UPLOAD_SERVICE_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Seconds between reaper sweeps (overrides UPLOAD_SERVICE_REAP_INTERVAL_SECS)
    #[arg(long)]
    pub reap_interval_secs: Option<u64>,

    /// Maximum request body size in bytes (overrides UPLOAD_SERVICE_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over environment values over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| text("UPLOAD_SERVICE_HOST", "0.0.0.0")),
            port: pick(args.port, &lookup, "UPLOAD_SERVICE_PORT", 3000)?,
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| text("UPLOAD_SERVICE_STORAGE_DIR", "./data/objects")),
            scratch_dir: args
                .scratch_dir
                .unwrap_or_else(|| text("UPLOAD_SERVICE_SCRATCH_DIR", "./data/scratch")),
            database_url: args.database_url.unwrap_or_else(|| {
                text(
                    "UPLOAD_SERVICE_DATABASE_URL",
                    "sqlite://./data/meta/uploads.db",
                )
            }),
            storage_type: pick(
                args.storage_type.map(|s| s.parse::<StorageType>()).transpose()?,
                &lookup,
                "UPLOAD_SERVICE_STORAGE_TYPE",
                StorageType::Local,
            )?,
            scratch_type: pick(
                args.scratch_type.map(|s| s.parse::<ScratchType>()).transpose()?,
                &lookup,
                "UPLOAD_SERVICE_SCRATCH_TYPE",
                ScratchType::Disk,
            )?,
            session_ttl_secs: pick(
                args.session_ttl_secs,
                &lookup,
                "UPLOAD_SERVICE_SESSION_TTL_SECS",
                86_400,
            )?,
            reap_interval_secs: pick(
                args.reap_interval_secs,
                &lookup,
                "UPLOAD_SERVICE_REAP_INTERVAL_SECS",
                300,
            )?,
            max_body_bytes: pick(
                args.max_body_bytes,
                &lookup,
                "UPLOAD_SERVICE_MAX_BODY_BYTES",
                64 * 1024 * 1024,
            )?,
        };

        if cfg.reap_interval_secs == 0 {
            bail!("reap interval must be at least one second");
        }
        if cfg.session_ttl_secs > MAX_SESSION_TTL_SECS {
            bail!(
                "session TTL {}s is out of range (max {}s)",
                cfg.session_ttl_secs,
                MAX_SESSION_TTL_SECS
            );
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value if given, else the parsed environment value, else `default`.
fn pick<T>(
    cli: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("parsing {} value `{}`", name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_args_or_env() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.storage_type, StorageType::Local);
        assert_eq!(cfg.scratch_type, ScratchType::Disk);
        assert_eq!(cfg.session_ttl_secs, 86_400);
        assert_eq!(cfg.max_body_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn cli_overrides_env() {
        let args = Args::try_parse_from(["upload-service", "--port", "9000", "--storage-type", "memory"])
            .unwrap();
        let env = env_of(&[
            ("UPLOAD_SERVICE_PORT", "8000"),
            ("UPLOAD_SERVICE_HOST", "127.0.0.1"),
            ("UPLOAD_SERVICE_STORAGE_TYPE", "local"),
            ("UPLOAD_SERVICE_SCRATCH_TYPE", "memory"),
        ]);

        let cfg = AppConfig::resolve(args, env).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.storage_type, StorageType::Memory);
        assert_eq!(cfg.scratch_type, ScratchType::Memory);
    }

    #[test]
    fn invalid_env_values_are_reported() {
        let err = AppConfig::resolve(Args::default(), env_of(&[("UPLOAD_SERVICE_PORT", "http")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("UPLOAD_SERVICE_PORT"));

        assert!(
            AppConfig::resolve(Args::default(), env_of(&[("UPLOAD_SERVICE_STORAGE_TYPE", "s3")]))
                .is_err()
        );
        assert!(
            AppConfig::resolve(Args::default(), env_of(&[("UPLOAD_SERVICE_REAP_INTERVAL_SECS", "0")]))
                .is_err()
        );
    }

    #[test]
    fn session_ttl_is_range_checked() {
        let too_long = (MAX_SESSION_TTL_SECS + 1).to_string();
        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("UPLOAD_SERVICE_SESSION_TTL_SECS", too_long.as_str())]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("session TTL"));

        let args = Args::try_parse_from(["upload-service", "--session-ttl-secs", "18446744073709551615"])
            .unwrap();
        assert!(AppConfig::resolve(args, env_of(&[])).is_err());

        let max = MAX_SESSION_TTL_SECS.to_string();
        let cfg = AppConfig::resolve(
            Args::default(),
            env_of(&[("UPLOAD_SERVICE_SESSION_TTL_SECS", max.as_str())]),
        )
        .unwrap();
        assert_eq!(cfg.session_ttl_secs, MAX_SESSION_TTL_SECS);
    }
}
