#![forbid(unsafe_code)]

//! Short-lived, room-scoped capability tokens.
//!
//! Format is `v1.<payload>.<signature>` with base64url parts and an
//! HMAC-SHA256 signature, verifiable without server-side state.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use collabgate_domain::{CanonicalRoomId, Grant, IdentityId};
use collabgate_engine::SecretString;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Claims carried by a session token. Nothing else goes in: no profile, no
/// quota state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
	pub sub: String,
	pub room: String,
	pub grant: Grant,
	pub jti: String,
	pub iat: u64,
	pub exp: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
	#[error("malformed token")]
	Malformed,
	#[error("invalid token signature")]
	BadSignature,
	#[error("token expired")]
	Expired,
}

/// Stateless issuer/verifier for session tokens.
#[derive(Clone)]
pub struct SessionTokenIssuer {
	secret: SecretString,
	ttl: Duration,
}

impl SessionTokenIssuer {
	pub fn new(secret: SecretString, ttl: Duration) -> Self {
		Self { secret, ttl }
	}

	/// Sign a token scoping `grant` to `room` for `identity`.
	///
	/// This is a pure scoping step: the grant is signed as given, never
	/// widened or narrowed. Policy lives in the access resolver.
	pub fn issue(&self, identity: &IdentityId, room: &CanonicalRoomId, grant: Grant) -> String {
		let iat = unix_now();
		let claims = SessionClaims {
			sub: identity.as_str().to_string(),
			room: room.as_str().to_string(),
			grant,
			jti: uuid::Uuid::new_v4().to_string(),
			iat,
			exp: iat.saturating_add(self.ttl.as_secs()),
		};

		let payload = serde_json::to_vec(&claims).expect("serialize session claims");
		let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
		let sig = sign(payload_b64.as_bytes(), self.secret.expose().as_bytes());
		let sig_b64 = URL_SAFE_NO_PAD.encode(sig);

		format!("v1.{payload_b64}.{sig_b64}")
	}

	/// Verify a session token and return its claims.
	pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
		let payload = verify_signed_payload(token, &self.secret)?;
		let claims: SessionClaims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

		if claims.exp <= unix_now() {
			return Err(TokenError::Expired);
		}

		Ok(claims)
	}
}

/// Check format and signature of a `v1.<payload>.<sig>` token and return the
/// decoded payload. Expiry is the caller's concern (claims differ per use).
pub(crate) fn verify_signed_payload(token: &str, secret: &SecretString) -> Result<Vec<u8>, TokenError> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(TokenError::Malformed);
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| TokenError::Malformed)?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.expose().as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| TokenError::Malformed)?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(TokenError::BadSignature);
	}

	Ok(payload)
}

pub(crate) fn unix_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn issuer() -> SessionTokenIssuer {
		SessionTokenIssuer::new(SecretString::new("test-secret"), Duration::from_secs(600))
	}

	fn room(id: &str) -> CanonicalRoomId {
		CanonicalRoomId::parse(id).expect("valid room id")
	}

	#[test]
	fn issue_then_verify_returns_the_same_claims() {
		let issuer = issuer();
		let id = IdentityId::new("u_42").unwrap();
		let room = room("shared-12345678-proj");

		let token = issuer.issue(&id, &room, Grant::Full);
		let claims = issuer.verify(&token).unwrap();

		assert_eq!(claims.sub, "u_42");
		assert_eq!(claims.room, "shared-12345678-proj");
		assert_eq!(claims.grant, Grant::Full);
		assert!(claims.exp > claims.iat);
	}

	#[test]
	fn grant_is_signed_as_given() {
		let issuer = issuer();
		let id = IdentityId::new("u_42").unwrap();
		let token = issuer.issue(&id, &room("u_42-000000-doc"), Grant::None);
		assert_eq!(issuer.verify(&token).unwrap().grant, Grant::None);
	}

	#[test]
	fn tampered_payload_fails_signature_check() {
		let issuer = issuer();
		let id = IdentityId::new("u_42").unwrap();
		let token = issuer.issue(&id, &room("u_42-000000-doc"), Grant::Full);

		let mut parts: Vec<&str> = token.split('.').collect();
		let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"u_99","room":"u_42-000000-doc","grant":"full","jti":"x","iat":0,"exp":99999999999}"#);
		parts[1] = &forged;
		let forged_token = parts.join(".");

		assert_eq!(issuer.verify(&forged_token), Err(TokenError::BadSignature));
	}

	#[test]
	fn wrong_secret_fails_signature_check() {
		let issuer = issuer();
		let other = SessionTokenIssuer::new(SecretString::new("other-secret"), Duration::from_secs(600));
		let id = IdentityId::new("u_42").unwrap();

		let token = issuer.issue(&id, &room("u_42-000000-doc"), Grant::Full);
		assert_eq!(other.verify(&token), Err(TokenError::BadSignature));
	}

	#[test]
	fn expired_token_is_rejected() {
		let issuer = SessionTokenIssuer::new(SecretString::new("test-secret"), Duration::from_secs(0));
		let id = IdentityId::new("u_42").unwrap();

		let token = issuer.issue(&id, &room("u_42-000000-doc"), Grant::Full);
		assert_eq!(issuer.verify(&token), Err(TokenError::Expired));
	}

	#[test]
	fn garbage_is_malformed() {
		let issuer = issuer();
		assert_eq!(issuer.verify("not-a-token"), Err(TokenError::Malformed));
		assert_eq!(issuer.verify("v2.x.y"), Err(TokenError::Malformed));
		assert_eq!(issuer.verify("v1.%%%.###"), Err(TokenError::Malformed));
	}
}
