#![forbid(unsafe_code)]

//! In-memory engine and membership implementations for dev mode and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use collabgate_domain::{CanonicalRoomId, IdentityId};
use parking_lot::Mutex;

use crate::{CollabEngine, EngineError, MembershipDirectory, RoomMetadata, RoomRecord};

/// Engine backed by a process-local room map.
///
/// Create/exists semantics match the real backend: creating a taken id fails
/// with [`EngineError::AlreadyExists`], and the map is the source of truth.
#[derive(Debug, Default)]
pub struct MemoryEngine {
	rooms: Mutex<HashMap<CanonicalRoomId, RoomRecord>>,
}

impl MemoryEngine {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn room_count(&self) -> usize {
		self.rooms.lock().len()
	}
}

#[async_trait]
impl CollabEngine for MemoryEngine {
	async fn create_room(&self, id: &CanonicalRoomId, metadata: RoomMetadata) -> Result<RoomRecord, EngineError> {
		let mut rooms = self.rooms.lock();
		if rooms.contains_key(id) {
			return Err(EngineError::AlreadyExists);
		}

		let record = RoomRecord {
			id: id.clone(),
			metadata,
		};
		rooms.insert(id.clone(), record.clone());
		Ok(record)
	}

	async fn get_room(&self, id: &CanonicalRoomId) -> Result<Option<RoomRecord>, EngineError> {
		Ok(self.rooms.lock().get(id).cloned())
	}

	async fn list_rooms(&self) -> Result<Vec<RoomRecord>, EngineError> {
		let mut rooms: Vec<RoomRecord> = self.rooms.lock().values().cloned().collect();
		rooms.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
		Ok(rooms)
	}
}

/// Membership directory that knows nobody. The safe default when no
/// invitation backend is wired up.
#[derive(Debug, Default)]
pub struct DenyAllMembership;

#[async_trait]
impl MembershipDirectory for DenyAllMembership {
	async fn is_member(&self, _identity: &IdentityId, _room: &CanonicalRoomId) -> anyhow::Result<bool> {
		Ok(false)
	}
}

/// Fixed membership table, for tests and single-tenant setups.
#[derive(Debug, Default)]
pub struct StaticMembership {
	members: Mutex<HashSet<(String, String)>>,
}

impl StaticMembership {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record that `identity` may join `room`.
	pub fn grant(&self, identity: &IdentityId, room: &CanonicalRoomId) {
		self.members
			.lock()
			.insert((identity.as_str().to_string(), room.as_str().to_string()));
	}
}

#[async_trait]
impl MembershipDirectory for StaticMembership {
	async fn is_member(&self, identity: &IdentityId, room: &CanonicalRoomId) -> anyhow::Result<bool> {
		Ok(self
			.members
			.lock()
			.contains(&(identity.as_str().to_string(), room.as_str().to_string())))
	}
}
