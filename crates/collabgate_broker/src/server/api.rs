#![forbid(unsafe_code)]

//! HTTP surface of the broker.
//!
//! Routing and response shaping live in `dispatch`, which works on plain
//! values so handler behavior is testable without a socket. The hyper
//! plumbing around it only reads the body and writes the response.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use collabgate_domain::{CanonicalRoomId, Identity, Visibility};
use collabgate_domain::canonical;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::server::access::AccessResolver;
use crate::server::health::HealthState;
use crate::server::identity::{AuthError, IdentityAuthenticator};
use crate::server::quota::QuotaGate;
use crate::server::registry::{RegistryError, RoomRegistry};
use crate::server::token::SessionTokenIssuer;

pub struct BrokerState {
	pub authenticator: IdentityAuthenticator,
	pub resolver: AccessResolver,
	pub registry: RoomRegistry,
	pub issuer: SessionTokenIssuer,
	pub quota: QuotaGate,
	pub health: HealthState,
}

#[derive(Debug, Error)]
enum ApiError {
	#[error("invalid room label")]
	InvalidLabel,
	#[error("invalid room id")]
	InvalidRoomId,
	#[error("{0}")]
	BadRequest(String),
	#[error("{0}")]
	Unauthenticated(String),
	#[error("access denied")]
	AccessDenied,
	#[error("free usage exhausted")]
	QuotaExhausted,
	#[error("room creation failed")]
	RoomCreation,
	#[error("internal error")]
	Internal,
}

impl ApiError {
	fn status(&self) -> StatusCode {
		match self {
			ApiError::InvalidLabel | ApiError::InvalidRoomId | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
			ApiError::AccessDenied | ApiError::QuotaExhausted => StatusCode::FORBIDDEN,
			ApiError::RoomCreation | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn body(&self) -> serde_json::Value {
		match self {
			ApiError::QuotaExhausted => json!({
				"error": self.to_string(),
				"allowed": false,
				"remaining": 0,
				"requiresUpgrade": true,
			}),
			_ => json!({ "error": self.to_string() }),
		}
	}
}

impl From<AuthError> for ApiError {
	fn from(err: AuthError) -> Self {
		match err {
			AuthError::Store(inner) => {
				error!(error = %inner, "identity store failure during auth");
				ApiError::Internal
			}
			other => ApiError::Unauthenticated(other.to_string()),
		}
	}
}

impl From<RegistryError> for ApiError {
	fn from(err: RegistryError) -> Self {
		// Detail stays in the logs; ensure_room is idempotent so the caller
		// can always retry.
		error!(error = %err, "engine operation failed");
		ApiError::RoomCreation
	}
}

impl From<anyhow::Error> for ApiError {
	fn from(err: anyhow::Error) -> Self {
		error!(error = %err, "store operation failed");
		ApiError::Internal
	}
}

pub async fn run_api_server(bind: SocketAddr, state: Arc<BrokerState>) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	info!(%bind, "api server listening");

	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "api connection error");
			}
		});
	}
}

async fn handle(req: Request<Incoming>, state: Arc<BrokerState>) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	match path.as_str() {
		"/healthz" => {
			return Ok(plain(StatusCode::OK, "ok"));
		}
		"/readyz" => {
			return Ok(if state.health.is_ready() {
				plain(StatusCode::OK, "ready")
			} else {
				plain(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
			});
		}
		_ => {}
	}

	let authorization = req
		.headers()
		.get(hyper::header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);

	let body = match req.into_body().collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(err) => {
			warn!(error = %err, "failed to read request body");
			Bytes::new()
		}
	};

	let (status, payload) = dispatch(&state, &method, &path, authorization.as_deref(), &body).await;
	metrics::counter!("collabgate_requests_total", "path" => path, "status" => status.as_u16().to_string()).increment(1);

	Ok(Response::builder()
		.status(status)
		.header(hyper::header::CONTENT_TYPE, "application/json")
		.body(Full::new(Bytes::from(payload.to_string())))
		.unwrap_or_default())
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
	Response::builder()
		.status(status)
		.body(Full::new(Bytes::from_static(body.as_bytes())))
		.unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenRoomRequest {
	label: String,
	#[serde(default)]
	visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRoomRequest {
	room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentRequest {
	transaction_id: String,
}

/// Route a request to its handler and shape the response.
pub(crate) async fn dispatch(
	state: &BrokerState,
	method: &Method,
	path: &str,
	authorization: Option<&str>,
	body: &[u8],
) -> (StatusCode, serde_json::Value) {
	let result = match (method, path) {
		(&Method::POST, "/v1/rooms/open") => open_room(state, authorization, body).await,
		(&Method::POST, "/v1/rooms/join") => join_room(state, authorization, body).await,
		(&Method::GET, "/v1/rooms") => list_rooms(state, authorization).await,
		(&Method::GET, "/v1/me") => me(state, authorization).await,
		(&Method::POST, "/v1/usage/consume") => consume_usage(state, authorization).await,
		(&Method::POST, "/v1/payments/verify") => verify_payment(state, authorization, body).await,
		_ => Err(ApiError::BadRequest("unknown route".to_string())),
	};

	match result {
		Ok(value) => (StatusCode::OK, value),
		Err(err) => {
			debug!(path, error = %err, "request rejected");
			(err.status(), err.body())
		}
	}
}

async fn authenticate(state: &BrokerState, authorization: Option<&str>) -> Result<Identity, ApiError> {
	Ok(state.authenticator.authenticate_bearer(authorization).await?)
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ApiError> {
	serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

/// Open (create if needed) a room from a human label and hand back a session.
async fn open_room(state: &BrokerState, authorization: Option<&str>, body: &[u8]) -> Result<serde_json::Value, ApiError> {
	let identity = authenticate(state, authorization).await?;
	let req: OpenRoomRequest = parse_body(body)?;

	let visibility = match req.visibility.as_deref() {
		None | Some("private") => Visibility::Private,
		Some("shared") => Visibility::Shared,
		Some(other) => return Err(ApiError::BadRequest(format!("unknown visibility: {other}"))),
	};

	let room = canonical::canonicalize(&identity.id, &req.label, visibility).map_err(|_| ApiError::InvalidLabel)?;

	let outcome = state.registry.ensure_room(&room, &identity).await?;
	let decision = state.resolver.resolve(&identity, &room).await;
	if !decision.is_allowed() {
		return Err(ApiError::AccessDenied);
	}

	let token = state.issuer.issue(&identity.id, &room, decision.grant);
	Ok(json!({
		"token": token,
		"roomId": room.as_str(),
		"grant": decision.grant,
		"created": outcome.created,
	}))
}

/// Join a room by its canonical id. Joining never creates a room; access is
/// decided from the id and the membership directory alone.
async fn join_room(state: &BrokerState, authorization: Option<&str>, body: &[u8]) -> Result<serde_json::Value, ApiError> {
	let identity = authenticate(state, authorization).await?;
	let req: JoinRoomRequest = parse_body(body)?;

	let room = CanonicalRoomId::parse(&req.room_id).map_err(|_| ApiError::InvalidRoomId)?;
	let decision = state.resolver.resolve(&identity, &room).await;
	if !decision.is_allowed() {
		return Err(ApiError::AccessDenied);
	}

	let token = state.issuer.issue(&identity.id, &room, decision.grant);
	Ok(json!({
		"token": token,
		"roomId": room.as_str(),
		"grant": decision.grant,
	}))
}

async fn list_rooms(state: &BrokerState, authorization: Option<&str>) -> Result<serde_json::Value, ApiError> {
	let identity = authenticate(state, authorization).await?;
	let rooms = state.registry.accessible_rooms(&identity).await?;

	Ok(json!({
		"rooms": rooms
			.iter()
			.map(|r| {
				json!({
					"roomId": r.id.as_str(),
					"name": r.metadata.name,
					"createdBy": r.metadata.created_by,
					"visibility": r.metadata.visibility,
				})
			})
			.collect::<Vec<_>>(),
	}))
}

async fn me(state: &BrokerState, authorization: Option<&str>) -> Result<serde_json::Value, ApiError> {
	let identity = authenticate(state, authorization).await?;
	let remaining = state.quota.remaining_for(&identity);

	Ok(json!({
		"id": identity.id.as_str(),
		"displayName": identity.display_name,
		"avatarUrl": identity.avatar_url,
		"tier": identity.tier,
		"remaining": remaining,
	}))
}

async fn consume_usage(state: &BrokerState, authorization: Option<&str>) -> Result<serde_json::Value, ApiError> {
	let identity = authenticate(state, authorization).await?;
	let outcome = state.quota.consume_unit(&identity).await?;
	if !outcome.allowed {
		return Err(ApiError::QuotaExhausted);
	}

	Ok(json!({
		"allowed": true,
		"remaining": outcome.remaining,
	}))
}

async fn verify_payment(
	state: &BrokerState,
	authorization: Option<&str>,
	body: &[u8],
) -> Result<serde_json::Value, ApiError> {
	let identity = authenticate(state, authorization).await?;
	let req: VerifyPaymentRequest = parse_body(body)?;

	let proof_id = req.transaction_id.trim();
	if proof_id.is_empty() {
		return Err(ApiError::BadRequest("transactionId must not be empty".to_string()));
	}

	let outcome = state.quota.mark_paid(&identity.id, proof_id).await?;
	Ok(json!({
		"success": true,
		"applied": outcome.applied,
	}))
}
