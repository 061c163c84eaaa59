#![forbid(unsafe_code)]

//! Free-tier usage metering.

use collabgate_domain::{Identity, IdentityId};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::server::store::IdentityStore;

/// Remaining balance after a quota check. Premium identities are unlimited
/// and serialize as `-1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
	Unlimited,
	Exact(u32),
}

impl Remaining {
	pub fn as_wire(self) -> i64 {
		match self {
			Remaining::Unlimited => -1,
			Remaining::Exact(n) => n as i64,
		}
	}
}

impl Serialize for Remaining {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_i64(self.as_wire())
	}
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConsumeOutcome {
	pub allowed: bool,
	pub remaining: Remaining,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MarkPaidOutcome {
	pub applied: bool,
}

/// Gate over the usage counter. All mutation happens in the store's atomic
/// test-and-decrement; this layer only adds the tier short-circuits.
pub struct QuotaGate {
	store: IdentityStore,
}

impl QuotaGate {
	pub fn new(store: IdentityStore) -> Self {
		Self { store }
	}

	/// Charge one usage unit, or report that none is left.
	///
	/// A failed decrement re-reads the row before denying: a payment may
	/// have flipped the tier between the caller's snapshot and now, and a
	/// premium identity is never denied.
	pub async fn consume_unit(&self, identity: &Identity) -> anyhow::Result<ConsumeOutcome> {
		if identity.is_premium() {
			return Ok(ConsumeOutcome {
				allowed: true,
				remaining: Remaining::Unlimited,
			});
		}

		if let Some(left) = self.store.consume_unit(&identity.id).await? {
			debug!(identity = %identity.id, remaining = left, "usage unit consumed");
			return Ok(ConsumeOutcome {
				allowed: true,
				remaining: Remaining::Exact(left),
			});
		}

		if let Some(current) = self.store.fetch(&identity.id).await?
			&& current.is_premium()
		{
			return Ok(ConsumeOutcome {
				allowed: true,
				remaining: Remaining::Unlimited,
			});
		}

		metrics::counter!("collabgate_quota_denied_total").increment(1);
		Ok(ConsumeOutcome {
			allowed: false,
			remaining: Remaining::Exact(0),
		})
	}

	/// Apply a payment proof. Idempotent per proof id; a replayed proof is
	/// still a success, just with `applied: false`.
	pub async fn mark_paid(&self, id: &IdentityId, proof_id: &str) -> anyhow::Result<MarkPaidOutcome> {
		let applied = self.store.mark_paid(id, proof_id).await?;
		if applied {
			debug!(identity = %id, "identity upgraded to premium");
			metrics::counter!("collabgate_payments_applied_total").increment(1);
		}

		Ok(MarkPaidOutcome { applied })
	}

	/// Current balance without charging anything.
	pub fn remaining_for(&self, identity: &Identity) -> Remaining {
		if identity.is_premium() {
			Remaining::Unlimited
		} else {
			Remaining::Exact(identity.usage_counter)
		}
	}
}
