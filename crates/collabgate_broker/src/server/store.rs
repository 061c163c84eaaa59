#![forbid(unsafe_code)]

//! Identity and quota persistence.
//!
//! The usage counter is the only shared mutable state in the broker; every
//! mutation goes through a single conditional update (or one step under one
//! lock in the memory backend) so concurrent consumers can never drive it
//! negative or double-charge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use collabgate_domain::{Identity, IdentityId, Tier};
use tokio::sync::Mutex;

/// Store for identity rows and payment proofs.
#[derive(Clone)]
pub struct IdentityStore {
	backend: Backend,
}

#[derive(Clone)]
enum Backend {
	Memory(Arc<Mutex<MemoryState>>),
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
}

#[derive(Default)]
struct MemoryState {
	identities: HashMap<String, Identity>,
	payment_proofs: HashSet<String>,
}

impl IdentityStore {
	/// Process-local store for dev mode and tests.
	pub fn in_memory() -> Self {
		Self {
			backend: Backend::Memory(Arc::new(Mutex::new(MemoryState::default()))),
		}
	}

	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;

			Ok(Self {
				backend: Backend::Sqlite(pool),
			})
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::migrate!("migrations/postgres")
				.run(&pool)
				.await
				.context("run postgres migrations")?;

			Ok(Self {
				backend: Backend::Postgres(pool),
			})
		} else {
			Err(anyhow!("unsupported database_url for identity store"))
		}
	}

	/// Fetch the identity row, creating it with `free_allotment` units on
	/// first sight. Existing rows are returned untouched.
	pub async fn ensure_identity(
		&self,
		id: &IdentityId,
		display_name: &str,
		avatar_url: Option<&str>,
		free_allotment: u32,
	) -> anyhow::Result<Identity> {
		match &self.backend {
			Backend::Memory(state) => {
				let mut state = state.lock().await;
				let identity = state
					.identities
					.entry(id.as_str().to_string())
					.or_insert_with(|| Identity {
						id: id.clone(),
						display_name: display_name.to_string(),
						tier: Tier::Free,
						usage_counter: free_allotment,
						avatar_url: avatar_url.map(str::to_string),
					});
				Ok(identity.clone())
			}
			Backend::Sqlite(pool) => {
				sqlx::query(
					"INSERT INTO identities (id, display_name, avatar_url, usage_counter) VALUES (?, ?, ?, ?) \
					ON CONFLICT (id) DO NOTHING",
				)
				.bind(id.as_str())
				.bind(display_name)
				.bind(avatar_url)
				.bind(free_allotment as i64)
				.execute(pool)
				.await
				.context("insert identity (sqlite)")?;

				let row = sqlx::query_as::<_, IdentityRow>(SELECT_IDENTITY_SQLITE)
					.bind(id.as_str())
					.fetch_one(pool)
					.await
					.context("fetch identity (sqlite)")?;
				identity_from_row(row)
			}
			Backend::Postgres(pool) => {
				sqlx::query(
					"INSERT INTO identities (id, display_name, avatar_url, usage_counter) VALUES ($1, $2, $3, $4) \
					ON CONFLICT (id) DO NOTHING",
				)
				.bind(id.as_str())
				.bind(display_name)
				.bind(avatar_url)
				.bind(free_allotment as i64)
				.execute(pool)
				.await
				.context("insert identity (postgres)")?;

				let row = sqlx::query_as::<_, IdentityRow>(SELECT_IDENTITY_POSTGRES)
					.bind(id.as_str())
					.fetch_one(pool)
					.await
					.context("fetch identity (postgres)")?;
				identity_from_row(row)
			}
		}
	}

	pub async fn fetch(&self, id: &IdentityId) -> anyhow::Result<Option<Identity>> {
		match &self.backend {
			Backend::Memory(state) => Ok(state.lock().await.identities.get(id.as_str()).cloned()),
			Backend::Sqlite(pool) => {
				let row = sqlx::query_as::<_, IdentityRow>(SELECT_IDENTITY_SQLITE)
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("fetch identity (sqlite)")?;
				row.map(identity_from_row).transpose()
			}
			Backend::Postgres(pool) => {
				let row = sqlx::query_as::<_, IdentityRow>(SELECT_IDENTITY_POSTGRES)
					.bind(id.as_str())
					.fetch_optional(pool)
					.await
					.context("fetch identity (postgres)")?;
				row.map(identity_from_row).transpose()
			}
		}
	}

	/// Atomic test-and-decrement of the free-usage counter.
	///
	/// Returns the remaining count after the decrement, or `None` when no
	/// unit could be charged (counter at zero, premium tier, or unknown
	/// identity). The check and the decrement are one step; two concurrent
	/// calls at counter=1 can never both succeed.
	pub async fn consume_unit(&self, id: &IdentityId) -> anyhow::Result<Option<u32>> {
		match &self.backend {
			Backend::Memory(state) => {
				let mut state = state.lock().await;
				let Some(identity) = state.identities.get_mut(id.as_str()) else {
					return Ok(None);
				};
				if identity.tier != Tier::Free || identity.usage_counter == 0 {
					return Ok(None);
				}
				identity.usage_counter -= 1;
				Ok(Some(identity.usage_counter))
			}
			Backend::Sqlite(pool) => {
				let row = sqlx::query_as::<_, (i64,)>(
					"UPDATE identities SET usage_counter = usage_counter - 1 \
					WHERE id = ? AND tier = 'free' AND usage_counter > 0 \
					RETURNING usage_counter",
				)
				.bind(id.as_str())
				.fetch_optional(pool)
				.await
				.context("consume usage unit (sqlite)")?;
				Ok(row.map(|(left,)| left.max(0) as u32))
			}
			Backend::Postgres(pool) => {
				let row = sqlx::query_as::<_, (i64,)>(
					"UPDATE identities SET usage_counter = usage_counter - 1 \
					WHERE id = $1 AND tier = 'free' AND usage_counter > 0 \
					RETURNING usage_counter",
				)
				.bind(id.as_str())
				.fetch_optional(pool)
				.await
				.context("consume usage unit (postgres)")?;
				Ok(row.map(|(left,)| left.max(0) as u32))
			}
		}
	}

	/// Record a payment proof and flip the identity to premium.
	///
	/// Idempotent per proof id: the proof insert is the gate, and the tier
	/// flip only happens in the same transaction when the insert landed.
	/// Returns whether this call applied the flip.
	pub async fn mark_paid(&self, id: &IdentityId, proof_id: &str) -> anyhow::Result<bool> {
		match &self.backend {
			Backend::Memory(state) => {
				let mut state = state.lock().await;
				if !state.payment_proofs.insert(proof_id.to_string()) {
					return Ok(false);
				}
				let Some(identity) = state.identities.get_mut(id.as_str()) else {
					return Err(anyhow!("unknown identity: {id}"));
				};
				identity.tier = Tier::Premium;
				Ok(true)
			}
			Backend::Sqlite(pool) => {
				let mut tx = pool.begin().await.context("begin payment tx (sqlite)")?;

				let inserted = sqlx::query(
					"INSERT INTO payment_proofs (proof_id, identity_id) VALUES (?, ?) \
					ON CONFLICT (proof_id) DO NOTHING",
				)
				.bind(proof_id)
				.bind(id.as_str())
				.execute(&mut *tx)
				.await
				.context("insert payment proof (sqlite)")?;

				if inserted.rows_affected() == 0 {
					tx.rollback().await.ok();
					return Ok(false);
				}

				sqlx::query("UPDATE identities SET tier = 'premium' WHERE id = ?")
					.bind(id.as_str())
					.execute(&mut *tx)
					.await
					.context("flip tier to premium (sqlite)")?;

				tx.commit().await.context("commit payment tx (sqlite)")?;
				Ok(true)
			}
			Backend::Postgres(pool) => {
				let mut tx = pool.begin().await.context("begin payment tx (postgres)")?;

				let inserted = sqlx::query(
					"INSERT INTO payment_proofs (proof_id, identity_id) VALUES ($1, $2) \
					ON CONFLICT (proof_id) DO NOTHING",
				)
				.bind(proof_id)
				.bind(id.as_str())
				.execute(&mut *tx)
				.await
				.context("insert payment proof (postgres)")?;

				if inserted.rows_affected() == 0 {
					tx.rollback().await.ok();
					return Ok(false);
				}

				sqlx::query("UPDATE identities SET tier = 'premium' WHERE id = $1")
					.bind(id.as_str())
					.execute(&mut *tx)
					.await
					.context("flip tier to premium (postgres)")?;

				tx.commit().await.context("commit payment tx (postgres)")?;
				Ok(true)
			}
		}
	}
}

const SELECT_IDENTITY_SQLITE: &str =
	"SELECT id, display_name, avatar_url, tier, usage_counter FROM identities WHERE id = ?";
const SELECT_IDENTITY_POSTGRES: &str =
	"SELECT id, display_name, avatar_url, tier, usage_counter FROM identities WHERE id = $1";

type IdentityRow = (String, String, Option<String>, String, i64);

fn identity_from_row((id, display_name, avatar_url, tier, usage_counter): IdentityRow) -> anyhow::Result<Identity> {
	Ok(Identity {
		id: IdentityId::new(id).context("identity row has empty id")?,
		display_name,
		tier: tier.parse::<Tier>().map_err(|e| anyhow!("identity row has bad tier: {e}"))?,
		usage_counter: usage_counter.max(0) as u32,
		avatar_url,
	})
}
