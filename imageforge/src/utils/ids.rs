//! Build id generation.

use uuid::Uuid;

use crate::core::ID_PREFIX_LEN;

/// Generates a new build id (hyphenated UUID v4).
#[must_use]
pub fn generate_build_id() -> String {
    Uuid::new_v4().to_string()
}

/// Returns the short id prefix embedded in artifact names.
#[must_use]
pub fn id_prefix(id: &str) -> &str {
    match id.char_indices().nth(ID_PREFIX_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
