#![forbid(unsafe_code)]

//! REST client for the collaboration engine's management API.

use std::time::Duration;

use async_trait::async_trait;
use collabgate_domain::{CanonicalRoomId, IdentityId, Visibility};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CollabEngine, EngineError, MembershipDirectory, RoomMetadata, RoomRecord, SecretString};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the engine's `/v2/rooms` management endpoints.
#[derive(Debug, Clone)]
pub struct RestCollabEngine {
	base_url: String,
	secret_key: SecretString,
	client: reqwest::Client,
}

impl RestCollabEngine {
	pub fn new(base_url: impl Into<String>, secret_key: SecretString) -> Self {
		let client = reqwest::Client::builder()
			.timeout(DEFAULT_REQUEST_TIMEOUT)
			.build()
			.unwrap_or_default();

		Self {
			base_url: base_url.into(),
			secret_key,
			client,
		}
	}

	fn auth_header(&self) -> String {
		format!("Bearer {}", self.secret_key.expose().trim())
	}

	fn rooms_url(&self) -> String {
		format!("{}/v2/rooms", self.base_url.trim_end_matches('/'))
	}
}

#[derive(Debug, Serialize)]
struct CreateRoomRequest<'a> {
	id: &'a str,

	#[serde(skip_serializing_if = "Vec::is_empty", rename = "defaultAccesses")]
	default_accesses: Vec<&'static str>,

	metadata: &'a RoomMetadata,
}

#[derive(Debug, Deserialize)]
struct RoomListResponse {
	#[serde(default)]
	data: Vec<RoomRecord>,
}

#[async_trait]
impl CollabEngine for RestCollabEngine {
	async fn create_room(&self, id: &CanonicalRoomId, metadata: RoomMetadata) -> Result<RoomRecord, EngineError> {
		// Shared rooms are open to any authenticated client by default.
		let default_accesses = if metadata.visibility == Some(Visibility::Shared) {
			vec!["room:write"]
		} else {
			Vec::new()
		};

		let body = CreateRoomRequest {
			id: id.as_str(),
			default_accesses,
			metadata: &metadata,
		};

		let resp = self
			.client
			.post(self.rooms_url())
			.header("Authorization", self.auth_header())
			.json(&body)
			.send()
			.await
			.map_err(|e| EngineError::Unavailable(e.to_string()))?;

		match resp.status() {
			StatusCode::OK | StatusCode::CREATED => {
				debug!(room = %id, "engine created room");
				resp.json::<RoomRecord>()
					.await
					.map_err(|e| EngineError::Unavailable(format!("decode create response: {e}")))
			}
			StatusCode::CONFLICT => Err(EngineError::AlreadyExists),
			status => {
				let detail = resp.text().await.unwrap_or_default();
				Err(EngineError::Rejected {
					status: status.as_u16(),
					detail,
				})
			}
		}
	}

	async fn get_room(&self, id: &CanonicalRoomId) -> Result<Option<RoomRecord>, EngineError> {
		let url = format!("{}/{}", self.rooms_url(), id.as_str());
		let resp = self
			.client
			.get(url)
			.header("Authorization", self.auth_header())
			.send()
			.await
			.map_err(|e| EngineError::Unavailable(e.to_string()))?;

		if resp.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !resp.status().is_success() {
			let status = resp.status().as_u16();
			let detail = resp.text().await.unwrap_or_default();
			return Err(EngineError::Rejected { status, detail });
		}

		let room = resp
			.json::<RoomRecord>()
			.await
			.map_err(|e| EngineError::Unavailable(format!("decode room response: {e}")))?;
		Ok(Some(room))
	}

	async fn list_rooms(&self) -> Result<Vec<RoomRecord>, EngineError> {
		let resp = self
			.client
			.get(self.rooms_url())
			.header("Authorization", self.auth_header())
			.send()
			.await
			.map_err(|e| EngineError::Unavailable(e.to_string()))?;

		if !resp.status().is_success() {
			let status = resp.status().as_u16();
			let detail = resp.text().await.unwrap_or_default();
			return Err(EngineError::Rejected { status, detail });
		}

		let list = resp
			.json::<RoomListResponse>()
			.await
			.map_err(|e| EngineError::Unavailable(format!("decode room list: {e}")))?;
		Ok(list.data)
	}
}

/// Membership directory served by an external invitations service.
///
/// `GET {base}/memberships?identity=..&room=..` answering `{"member": bool}`.
#[derive(Debug, Clone)]
pub struct RestMembershipDirectory {
	base_url: String,
	secret_key: SecretString,
	client: reqwest::Client,
}

impl RestMembershipDirectory {
	pub fn new(base_url: impl Into<String>, secret_key: SecretString) -> Self {
		let client = reqwest::Client::builder()
			.timeout(DEFAULT_REQUEST_TIMEOUT)
			.build()
			.unwrap_or_default();

		Self {
			base_url: base_url.into(),
			secret_key,
			client,
		}
	}
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
	#[serde(default)]
	member: bool,
}

#[async_trait]
impl MembershipDirectory for RestMembershipDirectory {
	async fn is_member(&self, identity: &IdentityId, room: &CanonicalRoomId) -> anyhow::Result<bool> {
		let url = format!("{}/memberships", self.base_url.trim_end_matches('/'));
		let resp = self
			.client
			.get(url)
			.header("Authorization", format!("Bearer {}", self.secret_key.expose().trim()))
			.query(&[("identity", identity.as_str()), ("room", room.as_str())])
			.send()
			.await?;

		if !resp.status().is_success() {
			anyhow::bail!("membership lookup failed: status={}", resp.status());
		}

		let body: MembershipResponse = resp.json().await?;
		Ok(body.member)
	}
}
