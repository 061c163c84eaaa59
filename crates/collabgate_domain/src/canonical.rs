#![forbid(unsafe_code)]

//! Deterministic mapping from human-supplied room labels to canonical room
//! identifiers accepted by the collaboration engine.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::{CanonicalRoomId, IdentityId, Visibility};

/// Maximum canonical room id length accepted by the engine.
pub const MAX_ROOM_ID_LEN: usize = 50;

/// Prefix marking the shared-room namespace.
pub const SHARED_PREFIX: &str = "shared-";

/// Maximum length of the owner identity fragment in private room ids.
pub const OWNER_FRAGMENT_MAX: usize = 15;

const SHARED_TIME_DIGITS: usize = 8;
const PRIVATE_TIME_DIGITS: usize = 6;
const SHARED_LABEL_MAX: usize = 10;
const PRIVATE_LABEL_MAX: usize = 8;

/// Errors from canonicalization. Only an empty label fails; everything else
/// falls back to the bounded-fragment form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CanonicalizeError {
	#[error("room label is empty")]
	EmptyLabel,
}

/// The identity fragment a private room id starts with.
///
/// Must match what [`canonicalize_at`] prepends, since ownership checks
/// compare against it with a plain prefix test.
pub fn owner_fragment(owner: &IdentityId) -> String {
	let mut out = String::with_capacity(OWNER_FRAGMENT_MAX);
	for c in owner.as_str().chars() {
		if out.len() >= OWNER_FRAGMENT_MAX {
			break;
		}
		if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
			out.push(c.to_ascii_lowercase());
		} else {
			out.push('-');
		}
	}
	// a fragment of `shared` would land private ids in the shared namespace
	if out == "shared" || out.starts_with(SHARED_PREFIX) {
		out.insert_str(0, "u-");
		out.truncate(OWNER_FRAGMENT_MAX);
	}
	out
}

/// Canonicalize with the current wall clock as disambiguator.
pub fn canonicalize(
	owner: &IdentityId,
	label: &str,
	visibility: Visibility,
) -> Result<CanonicalRoomId, CanonicalizeError> {
	let now_ms = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64;
	canonicalize_at(owner, label, visibility, now_ms)
}

/// Canonicalize `label` for `owner` at a fixed timestamp (milliseconds).
///
/// Shared rooms become `shared-<time>-<label>`, private rooms
/// `<owner fragment>-<time>-<label>`. The full sanitized label is used when
/// the result stays within [`MAX_ROOM_ID_LEN`]; otherwise the label collapses
/// to a short alphanumeric fragment. Never fails for a non-empty label.
pub fn canonicalize_at(
	owner: &IdentityId,
	label: &str,
	visibility: Visibility,
	now_ms: u64,
) -> Result<CanonicalRoomId, CanonicalizeError> {
	if label.trim().is_empty() {
		return Err(CanonicalizeError::EmptyLabel);
	}

	let full = sanitize_label(label);

	let id = match visibility {
		Visibility::Shared => {
			let time = time_fragment(now_ms, SHARED_TIME_DIGITS);
			bounded_or_full(
				&format!("{SHARED_PREFIX}{time}"),
				&full,
				label,
				SHARED_LABEL_MAX,
			)
		}
		Visibility::Private => {
			let time = time_fragment(now_ms, PRIVATE_TIME_DIGITS);
			bounded_or_full(
				&format!("{}-{}", owner_fragment(owner), time),
				&full,
				label,
				PRIVATE_LABEL_MAX,
			)
		}
	};

	debug_assert!(id.len() <= MAX_ROOM_ID_LEN);
	Ok(CanonicalRoomId(id))
}

/// Sanitize a raw label: out-of-charset characters become dashes, dash runs
/// collapse, everything lowercases, leading/trailing dashes drop.
pub fn sanitize_label(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	for c in raw.chars() {
		if c.is_ascii_alphanumeric() || c == '_' {
			out.push(c.to_ascii_lowercase());
		} else if !out.ends_with('-') {
			out.push('-');
		}
	}
	out.trim_matches('-').to_string()
}

fn bounded_or_full(prefix: &str, full_label: &str, raw_label: &str, label_max: usize) -> String {
	if !full_label.is_empty() {
		let naive = format!("{prefix}-{full_label}");
		if naive.len() <= MAX_ROOM_ID_LEN {
			return naive;
		}
	}
	format!("{prefix}-{}", alnum_fragment(raw_label, label_max))
}

fn alnum_fragment(raw: &str, max: usize) -> String {
	let frag: String = raw
		.chars()
		.filter(|c| c.is_ascii_alphanumeric())
		.take(max)
		.map(|c| c.to_ascii_lowercase())
		.collect();
	if frag.is_empty() { "room".to_string() } else { frag }
}

fn time_fragment(now_ms: u64, digits: usize) -> String {
	let s = now_ms.to_string();
	if s.len() > digits {
		s[s.len() - digits..].to_string()
	} else {
		format!("{s:0>digits$}")
	}
}
