#![forbid(unsafe_code)]

pub mod memory;
pub mod rest;

use core::fmt;

use async_trait::async_trait;
use collabgate_domain::{CanonicalRoomId, IdentityId, Visibility};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata stored alongside a room in the collaboration engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,

	/// Identity id of the creator, as recorded by the engine.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_by: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub visibility: Option<Visibility>,
}

/// A room as known to the collaboration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
	pub id: CanonicalRoomId,

	#[serde(default)]
	pub metadata: RoomMetadata,
}

/// Errors from the collaboration-engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The room already exists. Callers treat this as a success path.
	#[error("room already exists")]
	AlreadyExists,

	/// The backend could not be reached (network, DNS, timeout).
	#[error("engine unavailable: {0}")]
	Unavailable(String),

	/// The backend answered with an error status.
	#[error("engine rejected request: status={status} {detail}")]
	Rejected { status: u16, detail: String },
}

/// Boundary to the realtime collaboration engine's management API.
///
/// The broker only authorizes access to rooms; the engine owns them. It is
/// the source of truth for "room exists".
#[async_trait]
pub trait CollabEngine: Send + Sync {
	/// Create a room. Returns [`EngineError::AlreadyExists`] if the id is
	/// taken; callers resolve that by fetching the existing room.
	async fn create_room(&self, id: &CanonicalRoomId, metadata: RoomMetadata) -> Result<RoomRecord, EngineError>;

	async fn get_room(&self, id: &CanonicalRoomId) -> Result<Option<RoomRecord>, EngineError>;

	async fn list_rooms(&self) -> Result<Vec<RoomRecord>, EngineError>;
}

/// Boundary to the external invitation/membership collaborator.
///
/// The broker calls this but does not implement it; its unavailability is a
/// deny, never an allow.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
	async fn is_member(&self, identity: &IdentityId, room: &CanonicalRoomId) -> anyhow::Result<bool>;
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}
