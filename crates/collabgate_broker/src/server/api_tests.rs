#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use collabgate_engine::SecretString;
use collabgate_engine::memory::{DenyAllMembership, MemoryEngine};
use hmac::{Hmac, Mac};
use hyper::{Method, StatusCode};
use serde_json::{Value, json};
use sha2::Sha256;

use crate::server::access::{AccessResolver, ResolverConfig};
use crate::server::api::{BrokerState, dispatch};
use crate::server::health::HealthState;
use crate::server::identity::IdentityAuthenticator;
use crate::server::quota::QuotaGate;
use crate::server::registry::RoomRegistry;
use crate::server::store::IdentityStore;
use crate::server::token::SessionTokenIssuer;

const CREDENTIAL_SECRET: &str = "cred-secret";
const SESSION_SECRET: &str = "sess-secret";

fn state_with_allotment(free_allotment: u32) -> BrokerState {
	let store = IdentityStore::in_memory();
	BrokerState {
		authenticator: IdentityAuthenticator::new(SecretString::new(CREDENTIAL_SECRET), store.clone(), free_allotment),
		resolver: AccessResolver::new(Arc::new(DenyAllMembership), ResolverConfig::default()),
		registry: RoomRegistry::new(Arc::new(MemoryEngine::new())),
		issuer: SessionTokenIssuer::new(SecretString::new(SESSION_SECRET), Duration::from_secs(600)),
		quota: QuotaGate::new(store),
		health: HealthState::new(),
	}
}

fn state() -> BrokerState {
	state_with_allotment(10)
}

fn credential_for(sub: &str) -> String {
	let exp = crate::server::token::unix_now() + 3600;
	let claims = json!({ "sub": sub, "name": sub, "exp": exp }).to_string();
	let payload_b64 = URL_SAFE_NO_PAD.encode(claims.as_bytes());
	let mut mac = Hmac::<Sha256>::new_from_slice(CREDENTIAL_SECRET.as_bytes()).unwrap();
	mac.update(payload_b64.as_bytes());
	let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
	format!("Bearer v1.{payload_b64}.{sig_b64}")
}

async fn post(state: &BrokerState, path: &str, auth: Option<&str>, body: Value) -> (StatusCode, Value) {
	dispatch(state, &Method::POST, path, auth, body.to_string().as_bytes()).await
}

async fn get(state: &BrokerState, path: &str, auth: Option<&str>) -> (StatusCode, Value) {
	dispatch(state, &Method::GET, path, auth, b"").await
}

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
	let state = state();

	let (status, body) = post(&state, "/v1/rooms/open", None, json!({ "label": "Notes" })).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert!(body["error"].as_str().unwrap().contains("token"));

	let (status, _) = get(&state, "/v1/me", Some("Bearer garbage")).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn open_room_mints_a_verifiable_session() {
	let state = state();
	let auth = credential_for("alice");

	let (status, body) = post(&state, "/v1/rooms/open", Some(&auth), json!({ "label": "My Notes" })).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["created"], json!(true));
	assert_eq!(body["grant"], json!("full"));

	let room_id = body["roomId"].as_str().unwrap();
	assert!(room_id.starts_with("alice-"));
	assert!(room_id.len() <= 50);

	let claims = state.issuer.verify(body["token"].as_str().unwrap()).unwrap();
	assert_eq!(claims.sub, "alice");
	assert_eq!(claims.room, room_id);
}

#[tokio::test]
async fn owner_rejoins_their_room_by_id() {
	let state = state();
	let auth = credential_for("alice");

	let (_, opened) = post(&state, "/v1/rooms/open", Some(&auth), json!({ "label": "Notes" })).await;
	let room_id = opened["roomId"].as_str().unwrap();

	let (status, joined) = post(&state, "/v1/rooms/join", Some(&auth), json!({ "roomId": room_id })).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(joined["roomId"], opened["roomId"]);
	assert!(joined.get("created").is_none());
}

#[tokio::test]
async fn shared_rooms_are_open_to_everyone() {
	let state = state();
	let alice = credential_for("alice");
	let bob = credential_for("bob");

	let (status, opened) = post(
		&state,
		"/v1/rooms/open",
		Some(&alice),
		json!({ "label": "Standup", "visibility": "shared" }),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	let room_id = opened["roomId"].as_str().unwrap();
	assert!(room_id.starts_with("shared-"));

	let (status, joined) = post(&state, "/v1/rooms/join", Some(&bob), json!({ "roomId": room_id })).await;
	assert_eq!(status, StatusCode::OK);
	let claims = state.issuer.verify(joined["token"].as_str().unwrap()).unwrap();
	assert_eq!(claims.sub, "bob");
	assert_eq!(claims.room, room_id);
}

#[tokio::test]
async fn private_rooms_reject_strangers() {
	let state = state();
	let alice = credential_for("alice");
	let bob = credential_for("bob");

	let (_, opened) = post(&state, "/v1/rooms/open", Some(&alice), json!({ "label": "Secret" })).await;
	let room_id = opened["roomId"].as_str().unwrap();

	let (status, body) = post(&state, "/v1/rooms/join", Some(&bob), json!({ "roomId": room_id })).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert!(body["token"].is_null());
}

#[tokio::test]
async fn joining_never_creates_a_room() {
	let state = state();
	let alice = credential_for("alice");

	// Access is decided from the id alone; nothing lands in the engine.
	let (status, body) = post(
		&state,
		"/v1/rooms/join",
		Some(&alice),
		json!({ "roomId": "alice-123456-ghost" }),
	)
	.await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["grant"], json!("full"));

	let (_, rooms) = get(&state, "/v1/rooms", Some(&alice)).await;
	assert_eq!(rooms["rooms"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn malformed_inputs_are_bad_requests() {
	let state = state();
	let alice = credential_for("alice");

	let (status, _) = post(&state, "/v1/rooms/open", Some(&alice), json!({})).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);

	let (status, _) = post(
		&state,
		"/v1/rooms/open",
		Some(&alice),
		json!({ "label": "x", "visibility": "secret" }),
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);

	let (status, _) = post(&state, "/v1/rooms/open", Some(&alice), json!({ "label": "###" })).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);

	let (status, _) = post(&state, "/v1/rooms/join", Some(&alice), json!({ "roomId": "Bad Room!" })).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);

	let (status, _) = post(&state, "/v1/nope", Some(&alice), json!({})).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn room_listing_spans_shared_and_owned() {
	let state = state();
	let alice = credential_for("alice");
	let bob = credential_for("bob");

	post(&state, "/v1/rooms/open", Some(&alice), json!({ "label": "Mine" })).await;
	post(
		&state,
		"/v1/rooms/open",
		Some(&bob),
		json!({ "label": "Town Hall", "visibility": "shared" }),
	)
	.await;
	post(&state, "/v1/rooms/open", Some(&bob), json!({ "label": "Bobs Own" })).await;

	let (status, body) = get(&state, "/v1/rooms", Some(&alice)).await;
	assert_eq!(status, StatusCode::OK);

	let rooms = body["rooms"].as_array().unwrap();
	assert_eq!(rooms.len(), 2);
	assert!(rooms.iter().any(|r| r["roomId"].as_str().unwrap().starts_with("alice-")));
	assert!(rooms.iter().any(|r| r["visibility"] == json!("shared")));
}

#[tokio::test]
async fn usage_runs_out_and_demands_an_upgrade() {
	let state = state_with_allotment(2);
	let alice = credential_for("alice");

	let (status, body) = post(&state, "/v1/usage/consume", Some(&alice), json!({})).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "allowed": true, "remaining": 1 }));

	let (status, body) = post(&state, "/v1/usage/consume", Some(&alice), json!({})).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["remaining"], json!(0));

	let (status, body) = post(&state, "/v1/usage/consume", Some(&alice), json!({})).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(body["allowed"], json!(false));
	assert_eq!(body["requiresUpgrade"], json!(true));
}

#[tokio::test]
async fn payment_upgrade_lifts_the_quota() {
	let state = state_with_allotment(0);
	let alice = credential_for("alice");

	let (status, body) = post(&state, "/v1/usage/consume", Some(&alice), json!({})).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(body["requiresUpgrade"], json!(true));

	let (status, body) = post(
		&state,
		"/v1/payments/verify",
		Some(&alice),
		json!({ "transactionId": "txn-123" }),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "success": true, "applied": true }));

	// Replaying the same proof still succeeds but applies nothing.
	let (status, body) = post(
		&state,
		"/v1/payments/verify",
		Some(&alice),
		json!({ "transactionId": "txn-123" }),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "success": true, "applied": false }));

	let (status, body) = post(&state, "/v1/usage/consume", Some(&alice), json!({})).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "allowed": true, "remaining": -1 }));
}

#[tokio::test]
async fn blank_payment_proof_is_rejected() {
	let state = state();
	let alice = credential_for("alice");

	let (status, _) = post(&state, "/v1/payments/verify", Some(&alice), json!({ "transactionId": "  " })).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_reports_tier_and_balance() {
	let state = state_with_allotment(7);
	let alice = credential_for("alice");

	let (status, body) = get(&state, "/v1/me", Some(&alice)).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["id"], json!("alice"));
	assert_eq!(body["displayName"], json!("alice"));
	assert_eq!(body["tier"], json!("free"));
	assert_eq!(body["remaining"], json!(7));

	post(&state, "/v1/payments/verify", Some(&alice), json!({ "transactionId": "t1" })).await;
	let (_, body) = get(&state, "/v1/me", Some(&alice)).await;
	assert_eq!(body["tier"], json!("premium"));
	assert_eq!(body["remaining"], json!(-1));
}
