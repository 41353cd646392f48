use serde_json::Value;

use crate::TrackMetadata;

/// Metadata fields which get NUL characters stripped before storage
pub const SANITIZED_FIELDS: [&str; 3] = ["artist_name", "track_name", "release_name"];

/// Removes every `\u{0}` from the [`SANITIZED_FIELDS`] of `metadata`.
///
/// Missing fields stay missing and values that aren't strings are left alone.
/// Everything else in the map is untouched.
pub fn sanitize_metadata(metadata: &mut TrackMetadata) {
    for field in SANITIZED_FIELDS {
        if let Some(Value::String(text)) = metadata.get_mut(field) {
            if text.contains('\0') {
                text.retain(|c| c != '\0');
            }
        }
    }
}
