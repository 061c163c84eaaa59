#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collabgate_domain::{AccessReason, CanonicalRoomId, Grant, Identity, IdentityId, Tier};
use collabgate_engine::MembershipDirectory;
use collabgate_engine::memory::{DenyAllMembership, StaticMembership};

use crate::server::access::{AccessResolver, ResolverConfig};

fn identity(id: &str) -> Identity {
	Identity {
		id: IdentityId::new(id).unwrap(),
		display_name: id.to_string(),
		tier: Tier::Free,
		usage_counter: 10,
		avatar_url: None,
	}
}

fn room(id: &str) -> CanonicalRoomId {
	CanonicalRoomId::parse(id).unwrap()
}

fn resolver(membership: Arc<dyn MembershipDirectory>) -> AccessResolver {
	AccessResolver::new(membership, ResolverConfig::default())
}

struct FailingMembership;

#[async_trait]
impl MembershipDirectory for FailingMembership {
	async fn is_member(&self, _identity: &IdentityId, _room: &CanonicalRoomId) -> anyhow::Result<bool> {
		Err(anyhow::anyhow!("directory unreachable"))
	}
}

struct StalledMembership;

#[async_trait]
impl MembershipDirectory for StalledMembership {
	async fn is_member(&self, _identity: &IdentityId, _room: &CanonicalRoomId) -> anyhow::Result<bool> {
		tokio::time::sleep(Duration::from_secs(3600)).await;
		Ok(true)
	}
}

#[tokio::test]
async fn shared_rooms_admit_anyone() {
	let resolver = resolver(Arc::new(DenyAllMembership));
	let decision = resolver.resolve(&identity("stranger"), &room("shared-12345678-standup")).await;

	assert!(decision.is_allowed());
	assert_eq!(decision.grant, Grant::Full);
	assert_eq!(decision.reason, AccessReason::SharedRoom);
}

#[tokio::test]
async fn owner_enters_without_a_directory_lookup() {
	// DenyAllMembership would reject if the lookup ran at all.
	let resolver = resolver(Arc::new(DenyAllMembership));
	let decision = resolver.resolve(&identity("alice"), &room("alice-123456-notes")).await;

	assert!(decision.is_allowed());
	assert_eq!(decision.reason, AccessReason::RoomOwner);
}

#[tokio::test]
async fn invited_member_is_admitted() {
	let membership = StaticMembership::new();
	membership.grant(&IdentityId::new("bob").unwrap(), &room("alice-123456-notes"));

	let resolver = resolver(Arc::new(membership));
	let decision = resolver.resolve(&identity("bob"), &room("alice-123456-notes")).await;

	assert!(decision.is_allowed());
	assert_eq!(decision.reason, AccessReason::InvitedMember);
}

#[tokio::test]
async fn non_member_is_denied() {
	let resolver = resolver(Arc::new(StaticMembership::new()));
	let decision = resolver.resolve(&identity("mallory"), &room("alice-123456-notes")).await;

	assert!(!decision.is_allowed());
	assert_eq!(decision.grant, Grant::None);
	assert_eq!(decision.reason, AccessReason::NotAMember);
}

#[tokio::test]
async fn directory_failure_denies_instead_of_erroring() {
	let resolver = resolver(Arc::new(FailingMembership));
	let decision = resolver.resolve(&identity("bob"), &room("alice-123456-notes")).await;

	assert!(!decision.is_allowed());
	assert_eq!(decision.reason, AccessReason::MembershipUnavailable);
}

#[tokio::test(start_paused = true)]
async fn directory_timeout_denies() {
	let resolver = AccessResolver::new(
		Arc::new(StalledMembership),
		ResolverConfig {
			membership_timeout: Duration::from_millis(100),
		},
	);

	let decision = resolver.resolve(&identity("bob"), &room("alice-123456-notes")).await;

	assert!(!decision.is_allowed());
	assert_eq!(decision.reason, AccessReason::MembershipUnavailable);
}

#[tokio::test]
async fn decision_rules_run_in_order_shared_before_owner() {
	// A shared room "owned" by the caller (fragment prefix collision) still
	// reports the shared reason.
	let resolver = resolver(Arc::new(DenyAllMembership));
	let decision = resolver.resolve(&identity("shared"), &room("shared-12345678-x")).await;

	assert_eq!(decision.reason, AccessReason::SharedRoom);
}
