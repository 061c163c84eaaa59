#![forbid(unsafe_code)]

//! Room lifecycle against the collaboration engine.

use std::sync::Arc;

use collabgate_domain::{CanonicalRoomId, Identity, Visibility};
use collabgate_engine::{CollabEngine, EngineError, RoomMetadata, RoomRecord};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("room creation failed: {0}")]
	Backend(EngineError),
}

/// Result of `ensure_room`: the room record and whether this call created it.
#[derive(Debug, Clone)]
pub struct EnsureOutcome {
	pub room: RoomRecord,
	pub created: bool,
}

pub struct RoomRegistry {
	engine: Arc<dyn CollabEngine>,
}

impl RoomRegistry {
	pub fn new(engine: Arc<dyn CollabEngine>) -> Self {
		Self { engine }
	}

	/// Create the room if it does not exist yet.
	///
	/// A concurrent or earlier creation is the same success: the engine's
	/// already-exists answer converges on the existing record. Any other
	/// engine failure surfaces as an error, never as a half-created room.
	pub async fn ensure_room(&self, room: &CanonicalRoomId, owner: &Identity) -> Result<EnsureOutcome, RegistryError> {
		let metadata = RoomMetadata {
			name: Some(room.as_str().to_string()),
			created_by: Some(owner.id.as_str().to_string()),
			visibility: Some(room.visibility()),
		};

		match self.engine.create_room(room, metadata).await {
			Ok(record) => {
				debug!(room = %room, owner = %owner.id, "room created");
				metrics::counter!("collabgate_rooms_created_total").increment(1);
				Ok(EnsureOutcome { room: record, created: true })
			}
			Err(EngineError::AlreadyExists) => match self.engine.get_room(room).await {
				Ok(Some(record)) => Ok(EnsureOutcome { room: record, created: false }),
				Ok(None) => Err(RegistryError::Backend(EngineError::Unavailable(
					"room reported as existing but not found".to_string(),
				))),
				Err(e) => Err(RegistryError::Backend(e)),
			},
			Err(e) => Err(RegistryError::Backend(e)),
		}
	}

	/// Rooms visible to `identity`: every shared room plus the rooms it owns.
	pub async fn accessible_rooms(&self, identity: &Identity) -> Result<Vec<RoomRecord>, RegistryError> {
		let rooms = self.engine.list_rooms().await.map_err(RegistryError::Backend)?;

		Ok(rooms
			.into_iter()
			.filter(|r| {
				r.metadata.visibility == Some(Visibility::Shared)
					|| r.id.is_owned_by(&identity.id)
					|| r.metadata.created_by.as_deref() == Some(identity.id.as_str())
			})
			.collect())
	}
}
