#![forbid(unsafe_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use collabgate_engine::SecretString;
use serde::Deserialize;
use tracing::{info, warn};

/// Parse a listener bind address: `host:port`, with an optional `http://`
/// prefix tolerated for symmetry with the engine/membership base URLs. The
/// host must be an IP literal; a DNS name cannot be bound.
pub fn parse_bind_addr(s: &str) -> Result<SocketAddr, String> {
	let s = s.trim();
	if s.is_empty() {
		return Err("bind address must be non-empty (expected host:port)".to_string());
	}

	let hostport = s.strip_prefix("http://").unwrap_or(s);
	hostport
		.parse()
		.map_err(|_| format!("invalid bind address (expected an IP literal host:port): {hostport}"))
}

/// Default config path: `~/.collabgate/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".collabgate").join("config.toml"))
}

/// Load the broker config from TOML and env overrides.
#[allow(dead_code)]
pub fn load_broker_config() -> anyhow::Result<BrokerConfig> {
	let path = default_config_path()?;
	load_broker_config_from_path(&path)
}

/// Same as `load_broker_config` but with an explicit config path.
pub fn load_broker_config_from_path(path: &Path) -> anyhow::Result<BrokerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = BrokerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Broker config (v1).
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
	pub server: ServerSettings,
	pub auth: AuthSettings,
	pub quota: QuotaSettings,
	pub access: AccessSettings,
	pub engine: EngineSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
	/// HMAC secret the inbound access credentials were signed with.
	pub credential_hmac_secret: Option<SecretString>,
	/// HMAC secret for the session tokens this broker mints.
	pub session_hmac_secret: Option<SecretString>,
	/// Session token lifetime.
	pub session_ttl: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaSettings {
	/// Free usage units granted to a new identity.
	pub free_allotment: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessSettings {
	/// Upper bound on a single membership lookup.
	pub membership_timeout: Option<Duration>,
	/// Base URL of the membership directory. Unset means deny non-members.
	pub membership_base_url: Option<String>,
	/// Bearer secret for the membership directory.
	pub membership_secret_key: Option<SecretString>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
	/// Base URL of the collaboration engine REST API.
	pub base_url: Option<String>,
	/// Engine secret key. Unset means the in-process dev engine.
	pub secret_key: Option<SecretString>,
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Enable persistence.
	pub enabled: bool,
	/// Database URL (sqlite: or postgres:).
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	auth: FileAuthSettings,

	#[serde(default)]
	quota: FileQuotaSettings,

	#[serde(default)]
	access: FileAccessSettings,

	#[serde(default)]
	engine: FileEngineSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileAuthSettings {
	credential_hmac_secret: Option<String>,
	session_hmac_secret: Option<String>,
	session_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileQuotaSettings {
	free_allotment: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileAccessSettings {
	membership_timeout_ms: Option<u64>,
	membership_base_url: Option<String>,
	membership_secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileEngineSettings {
	base_url: Option<String>,
	secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

impl BrokerConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
			},
			auth: AuthSettings {
				credential_hmac_secret: file
					.auth
					.credential_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				session_hmac_secret: file
					.auth
					.session_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				session_ttl: file.auth.session_ttl_secs.filter(|v| *v > 0).map(Duration::from_secs),
			},
			quota: QuotaSettings {
				free_allotment: file.quota.free_allotment,
			},
			access: AccessSettings {
				membership_timeout: file.access.membership_timeout_ms.filter(|v| *v > 0).map(Duration::from_millis),
				membership_base_url: file.access.membership_base_url.filter(|s| !s.trim().is_empty()),
				membership_secret_key: file
					.access
					.membership_secret_key
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
			},
			engine: EngineSettings {
				base_url: file.engine.base_url.filter(|s| !s.trim().is_empty()),
				secret_key: file.engine.secret_key.filter(|s| !s.trim().is_empty()).map(SecretString::new),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}

	/// Warn about configuration that looks wrong but is not fatal.
	pub fn sanity_check(&self) {
		if let Some(secret) = self.engine.secret_key.as_ref()
			&& !secret.expose().starts_with("sk_")
		{
			warn!("engine secret_key does not look like a secret key (expected sk_ prefix)");
		}

		if self.engine.base_url.is_some() != self.engine.secret_key.is_some() {
			warn!("engine base_url and secret_key must be set together; falling back to the in-process engine");
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut BrokerConfig) {
	if let Ok(v) = std::env::var("COLLABGATE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_CREDENTIAL_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.auth.credential_hmac_secret = Some(SecretString::new(v));
			info!("auth config: credential_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_SESSION_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.auth.session_hmac_secret = Some(SecretString::new(v));
			info!("auth config: session_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_SESSION_TTL_SECS") {
		match v.trim().parse::<u64>() {
			Ok(secs) if secs > 0 => {
				cfg.auth.session_ttl = Some(Duration::from_secs(secs));
				info!("auth config: session_ttl overridden by env");
			}
			_ => warn!(value = %v, "ignoring invalid COLLABGATE_SESSION_TTL_SECS"),
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_FREE_ALLOTMENT") {
		match v.trim().parse::<u32>() {
			Ok(n) => {
				cfg.quota.free_allotment = Some(n);
				info!("quota config: free_allotment overridden by env");
			}
			Err(_) => warn!(value = %v, "ignoring invalid COLLABGATE_FREE_ALLOTMENT"),
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_MEMBERSHIP_TIMEOUT_MS") {
		match v.trim().parse::<u64>() {
			Ok(ms) if ms > 0 => {
				cfg.access.membership_timeout = Some(Duration::from_millis(ms));
				info!("access config: membership_timeout overridden by env");
			}
			_ => warn!(value = %v, "ignoring invalid COLLABGATE_MEMBERSHIP_TIMEOUT_MS"),
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_MEMBERSHIP_BASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.access.membership_base_url = Some(v);
			info!("access config: membership_base_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_MEMBERSHIP_SECRET_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.access.membership_secret_key = Some(SecretString::new(v));
			info!("access config: membership_secret_key overridden by env");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_ENGINE_BASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.engine.base_url = Some(v);
			info!("engine config: base_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_ENGINE_SECRET_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.engine.secret_key = Some(SecretString::new(v));
			info!("engine config: secret_key overridden by env");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_PERSISTENCE_ENABLED") {
		if let Some(b) = parse_env_bool(&v) {
			cfg.persistence.enabled = b;
			info!("persistence config: enabled overridden by env");
		} else {
			warn!(value = %v, "ignoring invalid COLLABGATE_PERSISTENCE_ENABLED");
		}
	}

	if let Ok(v) = std::env::var("COLLABGATE_PERSISTENCE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence config: database_url overridden by env");
		}
	}
}
