#![forbid(unsafe_code)]

//! Room access decisions.
//!
//! The three rules run in a fixed order: shared rooms admit everyone, owners
//! always enter their own rooms, and everything else asks the membership
//! directory. When the directory cannot answer, the decision is deny.

use std::sync::Arc;
use std::time::Duration;

use collabgate_domain::{AccessDecision, AccessReason, CanonicalRoomId, Identity, Visibility};
use collabgate_engine::MembershipDirectory;
use tracing::warn;

/// Tuning for the resolver. `membership_timeout` bounds how long a single
/// directory lookup may stall a session request.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
	pub membership_timeout: Duration,
}

impl Default for ResolverConfig {
	fn default() -> Self {
		Self {
			membership_timeout: Duration::from_millis(1500),
		}
	}
}

pub struct AccessResolver {
	membership: Arc<dyn MembershipDirectory>,
	cfg: ResolverConfig,
}

impl AccessResolver {
	pub fn new(membership: Arc<dyn MembershipDirectory>, cfg: ResolverConfig) -> Self {
		Self { membership, cfg }
	}

	/// Decide whether `identity` may enter `room`.
	///
	/// Never returns an error: a failed or slow membership lookup becomes a
	/// deny with `MembershipUnavailable`, not a propagated failure.
	pub async fn resolve(&self, identity: &Identity, room: &CanonicalRoomId) -> AccessDecision {
		let allow = |reason| AccessDecision::allow(room.clone(), identity.id.clone(), reason);
		let deny = |reason| AccessDecision::deny(room.clone(), identity.id.clone(), reason);

		if room.visibility() == Visibility::Shared {
			return allow(AccessReason::SharedRoom);
		}

		if room.is_owned_by(&identity.id) {
			return allow(AccessReason::RoomOwner);
		}

		let lookup = self.membership.is_member(&identity.id, room);
		let decision = match tokio::time::timeout(self.cfg.membership_timeout, lookup).await {
			Ok(Ok(true)) => allow(AccessReason::InvitedMember),
			Ok(Ok(false)) => deny(AccessReason::NotAMember),
			Ok(Err(error)) => {
				warn!(room = %room, identity = %identity.id, %error, "membership lookup failed, denying");
				deny(AccessReason::MembershipUnavailable)
			}
			Err(_) => {
				warn!(
					room = %room,
					identity = %identity.id,
					timeout_ms = self.cfg.membership_timeout.as_millis() as u64,
					"membership lookup timed out, denying"
				);
				deny(AccessReason::MembershipUnavailable)
			}
		};

		if !decision.is_allowed() {
			metrics::counter!("collabgate_access_denied_total").increment(1);
		}

		decision
	}
}
