#![forbid(unsafe_code)]

//! Materialization of the caller identity.
//!
//! The credential is minted by the external trust source; varying claim
//! shapes are normalized into the single `Identity` view right here, and the
//! rest of the broker never branches on where a credential came from.

use collabgate_domain::{Identity, IdentityId};
use collabgate_engine::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::server::store::IdentityStore;
use crate::server::token;

/// Claims accepted from the trust source's credential.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialClaims {
	pub sub: String,

	#[serde(default)]
	pub name: Option<String>,

	#[serde(default)]
	pub avatar: Option<String>,

	pub exp: u64,
}

#[derive(Debug, Error)]
pub enum AuthError {
	#[error("access token required")]
	MissingCredential,
	#[error("invalid access token")]
	InvalidCredential,
	#[error("access token expired")]
	ExpiredCredential,
	#[error(transparent)]
	Store(anyhow::Error),
}

/// Verifies inbound credentials and materializes identity rows.
#[derive(Clone)]
pub struct IdentityAuthenticator {
	secret: SecretString,
	store: IdentityStore,
	free_allotment: u32,
}

impl IdentityAuthenticator {
	pub fn new(secret: SecretString, store: IdentityStore, free_allotment: u32) -> Self {
		Self {
			secret,
			store,
			free_allotment,
		}
	}

	/// Authenticate an `Authorization` header value.
	///
	/// First sight of an identity creates its row with the configured free
	/// allotment; later calls return the stored row (tier and counter
	/// included) so quota state never rides in the credential.
	pub async fn authenticate_bearer(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
		let token = bearer_token(authorization).ok_or(AuthError::MissingCredential)?;
		let claims = self.verify_credential(token)?;

		let id = IdentityId::new(claims.sub).map_err(|_| AuthError::InvalidCredential)?;
		let display_name = claims
			.name
			.filter(|n| !n.trim().is_empty())
			.unwrap_or_else(|| format!("User {id}"));
		let avatar_url = claims
			.avatar
			.filter(|a| !a.trim().is_empty())
			.unwrap_or_else(|| format!("https://api.dicebear.com/6.x/initials/svg?seed={id}"));

		self.store
			.ensure_identity(&id, &display_name, Some(&avatar_url), self.free_allotment)
			.await
			.map_err(AuthError::Store)
	}

	fn verify_credential(&self, token: &str) -> Result<CredentialClaims, AuthError> {
		// verify_signed_payload only checks format and signature; expiry is
		// decided here, from the credential's own claim shape.
		let payload = token::verify_signed_payload(token, &self.secret).map_err(|_| AuthError::InvalidCredential)?;

		let claims: CredentialClaims = serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidCredential)?;
		if claims.exp <= token::unix_now() {
			return Err(AuthError::ExpiredCredential);
		}

		Ok(claims)
	}
}

fn bearer_token(authorization: Option<&str>) -> Option<&str> {
	let header = authorization?.trim();
	let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?;
	let token = token.trim();
	if token.is_empty() { None } else { Some(token) }
}
