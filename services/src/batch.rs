use lb_writer_core::Listen;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("batch payload is not a json array: {0}")]
    NotAnArray(#[from] serde_json::Error),
}

/// Decodes a delivered batch: a json array of listens.
///
/// Entries that don't look like a listen are logged and skipped so that one
/// malformed record doesn't cost the rest of the batch.
pub fn decode_batch(body: &[u8]) -> Result<Vec<Listen>, DecodeError> {
    let raw: Vec<Value> = serde_json::from_slice(body)?;
    Ok(raw
        .into_iter()
        .filter_map(|val| {
            Listen::deserialize(&val)
                .map_err(|e| warn!(error = %e, listen = %val, "Skipping malformed listen"))
                .ok()
        })
        .collect())
}


#[cfg(test)]
mod tests {
    use lb_writer_core::ListenData;

    use super::*;

    const SAMPLE: &str = r#"[
        {
            "listened_at": 1669318360,
            "recording_msid": "7407a60c-ba0e-4fcd-ba47-80194f002b20",
            "user_name": "zozCXAEwpVLa",
            "track_metadata": {
                "artist_name": "The Cab",
                "track_name": "Angel With A Shotgun",
                "release_name": "Symphony Soldier",
                "additional_info": { "music_service": "spotify.com" }
            }
        },
        { "listened_at": "yesterday", "recording_msid": "m", "user_name": "u", "track_metadata": {} },
        { "recording_msid": "m", "user_name": "u" },
        {
            "listened_at": 1531090963,
            "recording_msid": "b92334c4-574a-46f5-89d8-417fcd1e873f",
            "user_name": "zozCXAEwpVLa",
            "track_metadata": { "artist_name": "Lansdowne", "track_name": "Burn Brighter" }
        }
    ]"#;

    #[test]
    fn test_skips_malformed_entries() {
        let listens = decode_batch(SAMPLE.as_bytes()).expect("Failed to decode batch");

        assert_eq!(listens.len(), 2);
        assert_eq!(listens[0].listened_at(), 1_669_318_360);
        assert_eq!(listens[1].recording_msid(), "b92334c4-574a-46f5-89d8-417fcd1e873f");
    }

    #[test]
    fn test_empty_array() {
        assert!(decode_batch(b"[]").expect("Failed to decode batch").is_empty());
    }

    #[test]
    fn test_not_an_array() {
        assert!(decode_batch(b"{\"listened_at\": 1}").is_err());
        assert!(decode_batch(b"not json").is_err());
    }
}
