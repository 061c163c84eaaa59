#![forbid(unsafe_code)]

pub mod canonical;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subscription tier of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
	Free,
	Premium,
}

impl Tier {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Tier::Free => "free",
			Tier::Premium => "premium",
		}
	}
}

impl fmt::Display for Tier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown tier: {0}")]
	UnknownTier(String),
	#[error("unknown visibility: {0}")]
	UnknownVisibility(String),
	#[error("value exceeds {max} characters (got {len})")]
	TooLong { max: usize, len: usize },
	#[error("invalid character {0:?} (expected [a-z0-9-_])")]
	InvalidChar(char),
}

impl FromStr for Tier {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"free" => Ok(Tier::Free),
			"premium" | "paid" => Ok(Tier::Premium),
			other => Err(ParseIdError::UnknownTier(other.to_string())),
		}
	}
}

/// Opaque stable identifier of an authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
	/// Create a non-empty `IdentityId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for IdentityId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for IdentityId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		IdentityId::new(s.to_string())
	}
}

/// Materialized view of an authenticated caller.
///
/// Produced at the boundary by verifying a credential against the trust
/// source; the broker never branches on where the credential came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub id: IdentityId,
	pub display_name: String,
	pub tier: Tier,
	/// Remaining free-tier units. Ignored once `tier` is premium.
	pub usage_counter: u32,
	pub avatar_url: Option<String>,
}

impl Identity {
	pub fn is_premium(&self) -> bool {
		self.tier == Tier::Premium
	}
}

/// Access level resolved for an identity against a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
	Full,
	None,
}

impl Grant {
	pub const fn as_str(self) -> &'static str {
		match self {
			Grant::Full => "full",
			Grant::None => "none",
		}
	}
}

impl fmt::Display for Grant {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Visibility class of a room, recoverable from its canonical id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
	Private,
	Shared,
}

impl Visibility {
	pub const fn as_str(self) -> &'static str {
		match self {
			Visibility::Private => "private",
			Visibility::Shared => "shared",
		}
	}
}

impl fmt::Display for Visibility {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Visibility {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"private" => Ok(Visibility::Private),
			"shared" => Ok(Visibility::Shared),
			other => Err(ParseIdError::UnknownVisibility(other.to_string())),
		}
	}
}

/// Canonical room identifier accepted by the collaboration engine.
///
/// Invariant: charset is `[a-z0-9-_]`, length is at most
/// [`canonical::MAX_ROOM_ID_LEN`], and the visibility class (and, for private
/// rooms, the owning identity fragment) is recoverable from the string alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRoomId(String);

impl CanonicalRoomId {
	/// Validate and wrap an already-canonical room id.
	pub fn parse(s: impl Into<String>) -> Result<Self, ParseIdError> {
		let s = s.into();
		if s.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		if s.len() > canonical::MAX_ROOM_ID_LEN {
			return Err(ParseIdError::TooLong {
				max: canonical::MAX_ROOM_ID_LEN,
				len: s.len(),
			});
		}
		if let Some(c) = s
			.chars()
			.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
		{
			return Err(ParseIdError::InvalidChar(c));
		}
		Ok(Self(s))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}

	/// Visibility class, derived from the id with no lookup.
	pub fn visibility(&self) -> Visibility {
		if self.0.starts_with(canonical::SHARED_PREFIX) {
			Visibility::Shared
		} else {
			Visibility::Private
		}
	}

	/// Whether this room's id carries `owner`'s identity fragment.
	///
	/// This is the O(1) ownership check behind the resolver's owner case.
	pub fn is_owned_by(&self, owner: &IdentityId) -> bool {
		self.0.starts_with(&canonical::owner_fragment(owner))
	}
}

impl fmt::Display for CanonicalRoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for CanonicalRoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		CanonicalRoomId::parse(s.to_string())
	}
}

/// Why an access decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
	SharedRoom,
	RoomOwner,
	InvitedMember,
	NotAMember,
	MembershipUnavailable,
}

impl AccessReason {
	pub const fn as_str(self) -> &'static str {
		match self {
			AccessReason::SharedRoom => "shared_room",
			AccessReason::RoomOwner => "room_owner",
			AccessReason::InvitedMember => "invited_member",
			AccessReason::NotAMember => "not_a_member",
			AccessReason::MembershipUnavailable => "membership_unavailable",
		}
	}
}

impl fmt::Display for AccessReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Per-request access decision. Never persisted.
///
/// There is no reason-free constructor: every decision, allow or deny, names
/// why it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
	pub room: CanonicalRoomId,
	pub identity: IdentityId,
	pub grant: Grant,
	pub reason: AccessReason,
}

impl AccessDecision {
	pub fn allow(room: CanonicalRoomId, identity: IdentityId, reason: AccessReason) -> Self {
		Self {
			room,
			identity,
			grant: Grant::Full,
			reason,
		}
	}

	pub fn deny(room: CanonicalRoomId, identity: IdentityId, reason: AccessReason) -> Self {
		Self {
			room,
			identity,
			grant: Grant::None,
			reason,
		}
	}

	pub fn is_allowed(&self) -> bool {
		self.grant == Grant::Full
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tier_parse_and_display() {
		assert_eq!("free".parse::<Tier>().unwrap(), Tier::Free);
		assert_eq!("Paid".parse::<Tier>().unwrap(), Tier::Premium);
		assert_eq!(Tier::Premium.to_string(), "premium");
	}

	#[test]
	fn visibility_parse_roundtrip() {
		assert_eq!("shared".parse::<Visibility>().unwrap(), Visibility::Shared);
		assert_eq!("Private".parse::<Visibility>().unwrap(), Visibility::Private);
		assert_eq!(Visibility::Shared.to_string(), "shared");
	}

	#[test]
	fn room_id_rejects_bad_charset_and_length() {
		assert!(CanonicalRoomId::parse("ok-room_1").is_ok());
		assert!(matches!(
			CanonicalRoomId::parse("Has-Upper"),
			Err(ParseIdError::InvalidChar('H'))
		));
		assert!(matches!(
			CanonicalRoomId::parse("has space"),
			Err(ParseIdError::InvalidChar(' '))
		));
		assert!(matches!(
			CanonicalRoomId::parse("x".repeat(51)),
			Err(ParseIdError::TooLong { max: 50, len: 51 })
		));
		assert!(CanonicalRoomId::parse("").is_err());
	}

	#[test]
	fn room_id_visibility_from_prefix() {
		let shared = CanonicalRoomId::parse("shared-12345678-proj").unwrap();
		assert_eq!(shared.visibility(), Visibility::Shared);

		let private = CanonicalRoomId::parse("u_123-123456-notes").unwrap();
		assert_eq!(private.visibility(), Visibility::Private);
	}

	#[test]
	fn decision_constructors_set_grant() {
		let room = CanonicalRoomId::parse("shared-12345678-proj").unwrap();
		let id = IdentityId::new("u_1").unwrap();

		let allow = AccessDecision::allow(room.clone(), id.clone(), AccessReason::SharedRoom);
		assert!(allow.is_allowed());
		assert_eq!(allow.grant, Grant::Full);

		let deny = AccessDecision::deny(room, id, AccessReason::NotAMember);
		assert!(!deny.is_allowed());
		assert_eq!(deny.grant, Grant::None);
	}

	#[test]
	fn rejects_empty_ids() {
		assert!(IdentityId::new("").is_err());
		assert!(IdentityId::new("   ").is_err());
		assert!("".parse::<CanonicalRoomId>().is_err());
	}
}
