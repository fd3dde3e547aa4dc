//! Artifact key generation

use chrono::{DateTime, Utc};
use uuid::Uuid;

const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Fresh artifact key under `prefix`.
///
/// Keys carry a second-resolution timestamp plus a random suffix, so concurrent
/// runs against the same source never share a key.
pub fn artifact_key(prefix: &str) -> String {
    artifact_key_at(prefix, Utc::now())
}

/// Deterministic timestamp part, random suffix
pub fn artifact_key_at(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!("data_{}_{}.json", at.format(KEY_TIMESTAMP_FORMAT), &suffix[..8]);

    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}
