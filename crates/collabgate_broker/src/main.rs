#![forbid(unsafe_code)]

mod config;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use collabgate_engine::memory::{DenyAllMembership, MemoryEngine};
use collabgate_engine::rest::{RestCollabEngine, RestMembershipDirectory};
use collabgate_engine::{CollabEngine, MembershipDirectory};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::access::{AccessResolver, ResolverConfig};
use crate::server::api::{BrokerState, run_api_server};
use crate::server::health::HealthState;
use crate::server::identity::IdentityAuthenticator;
use crate::server::quota::QuotaGate;
use crate::server::registry::RoomRegistry;
use crate::server::store::IdentityStore;
use crate::server::token::SessionTokenIssuer;

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_FREE_ALLOTMENT: u32 = 10;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: collabgate_broker [--bind host:port]\n\
\n\
Options:\n\
\t--bind    Listener bind address (default: 127.0.0.1:8787)\n\
\t         The host must be an IP literal\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_addr = "127.0.0.1:8787".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind_addr = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	crate::config::parse_bind_addr(&bind_addr).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,collabgate_broker=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("collabgate_broker");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let cfg = crate::config::load_broker_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded broker config (toml + env overrides)");
	cfg.sanity_check();

	init_metrics(cfg.server.metrics_bind.as_deref());

	let Some(session_secret) = cfg.auth.session_hmac_secret.clone() else {
		return Err(anyhow::anyhow!("auth.session_hmac_secret must be configured"));
	};
	let credential_secret = cfg.auth.credential_hmac_secret.clone().unwrap_or_else(|| {
		warn!("auth.credential_hmac_secret not set, reusing session secret for inbound credentials");
		session_secret.clone()
	});

	let store = if cfg.persistence.enabled {
		let Some(database_url) = cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};
		IdentityStore::connect(database_url).await?
	} else {
		warn!("persistence disabled, identities and quota live in memory only");
		IdentityStore::in_memory()
	};

	let engine: Arc<dyn CollabEngine> = match (cfg.engine.base_url.as_deref(), cfg.engine.secret_key.clone()) {
		(Some(base_url), Some(secret)) => {
			info!(%base_url, "using remote collaboration engine");
			Arc::new(RestCollabEngine::new(base_url, secret))
		}
		_ => {
			warn!("engine not configured, using in-process room registry (dev only)");
			Arc::new(MemoryEngine::new())
		}
	};

	let membership: Arc<dyn MembershipDirectory> =
		match (cfg.access.membership_base_url.as_deref(), cfg.access.membership_secret_key.clone()) {
			(Some(base_url), Some(secret)) => {
				info!(%base_url, "using remote membership directory");
				Arc::new(RestMembershipDirectory::new(base_url, secret))
			}
			_ => {
				warn!("membership directory not configured, non-members of private rooms are denied");
				Arc::new(DenyAllMembership)
			}
		};

	let resolver_cfg = ResolverConfig {
		membership_timeout: cfg.access.membership_timeout.unwrap_or(ResolverConfig::default().membership_timeout),
	};

	let health = HealthState::new();
	let state = Arc::new(BrokerState {
		authenticator: IdentityAuthenticator::new(
			credential_secret,
			store.clone(),
			cfg.quota.free_allotment.unwrap_or(DEFAULT_FREE_ALLOTMENT),
		),
		resolver: AccessResolver::new(membership, resolver_cfg),
		registry: RoomRegistry::new(engine),
		issuer: SessionTokenIssuer::new(session_secret, cfg.auth.session_ttl.unwrap_or(DEFAULT_SESSION_TTL)),
		quota: QuotaGate::new(store),
		health: health.clone(),
	});

	health.mark_ready();

	run_api_server(bind_addr, state).await
}
