use std::fmt::{
    self,
    Display,
};

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};

mod sanitize;
pub use sanitize::*;

pub type TrackMetadata = Map<String, Value>;


/// A single listen as published onto the incoming queue
///
/// `track_metadata` is kept as a raw json object so that unknown keys and
/// explicit `null`s are stored exactly as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listen {
    pub listened_at: i64,
    pub recording_msid: String,
    pub user_name: String,
    pub track_metadata: TrackMetadata,
}

impl Listen {
    /// Strips characters the listen store can't encode from the well known text fields
    pub fn sanitize(&mut self) { sanitize_metadata(&mut self.track_metadata) }

    pub fn sanitized(mut self) -> Self {
        self.sanitize();
        self
    }
}

impl ListenData for Listen {
    fn listened_at(&self) -> i64 { self.listened_at }

    fn recording_msid(&self) -> &str { self.recording_msid.as_str() }

    fn user_name(&self) -> &str { self.user_name.as_str() }

    fn track_metadata(&self) -> &TrackMetadata { &self.track_metadata }
}


/// Identity of a listen in the store. At most one row exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenKey {
    pub listened_at: i64,
    pub recording_msid: String,
    pub user_name: String,
}

impl ListenKey {
    pub fn new(listened_at: i64, recording_msid: &str, user_name: &str) -> Self {
        Self {
            listened_at,
            recording_msid: recording_msid.to_owned(),
            user_name: user_name.to_owned(),
        }
    }
}

impl Display for ListenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.user_name, self.listened_at, self.recording_msid)
    }
}


pub trait ListenData {
    fn listened_at(&self) -> i64;

    fn recording_msid(&self) -> &str;
    fn user_name(&self) -> &str;

    fn track_metadata(&self) -> &TrackMetadata;

    fn key(&self) -> ListenKey { ListenKey::new(self.listened_at(), self.recording_msid(), self.user_name()) }
}


#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = r#"{
        "track_metadata": {
            "artist_name": "The Cab",
            "release_name": "Symphony Soldier",
            "additional_info": {
                "origin_url": "https://open.spotify.com/tracks/49rpdsNYJirTTf6p6mMvag",
                "music_service": "spotify.com",
                "submission_client": "spotify-importer",
                "submission_client_version": "0.1.0"
            },
            "track_name": "Angel With A Shotgun"
        },
        "listened_at": 1669318360,
        "recording_msid": "7407a60c-ba0e-4fcd-ba47-80194f002b20",
        "user_name": "zozCXAEwpVLa",
        "inserted_at": 1670569910
    }"#;

    #[test]
    fn test_de() {
        let listen: Listen = serde_json::from_str(SAMPLE).expect("Failed to parse listen");

        assert_eq!(listen.key(), ListenKey {
            listened_at: 1_669_318_360,
            recording_msid: "7407a60c-ba0e-4fcd-ba47-80194f002b20".to_owned(),
            user_name: "zozCXAEwpVLa".to_owned(),
        });
        assert_eq!(listen.track_metadata["track_name"], "Angel With A Shotgun");
        assert_eq!(listen.track_metadata["additional_info"]["music_service"], "spotify.com");
    }

    #[test]
    fn test_metadata_kept_verbatim() {
        let listen: Listen = serde_json::from_str(
            r#"{"listened_at": 1, "recording_msid": "m", "user_name": "u",
                "track_metadata": {"artist_name": null, "tags": ["a", "b"], "rating": 4.5}}"#,
        )
        .expect("Failed to parse listen");

        let expected: Value = serde_json::from_str(r#"{"artist_name": null, "tags": ["a", "b"], "rating": 4.5}"#).unwrap();
        assert_eq!(Value::Object(listen.track_metadata.clone()), expected);
        assert!(!listen.track_metadata.contains_key("track_name"));
    }

    #[test]
    fn test_missing_identity_rejected() {
        let res = serde_json::from_str::<Listen>(r#"{"listened_at": 1, "user_name": "u", "track_metadata": {}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_key_display() {
        let key = ListenKey {
            listened_at: 100,
            recording_msid: "msid-1".to_owned(),
            user_name: "alice".to_owned(),
        };
        assert_eq!(key.to_string(), "alice@100/msid-1");
    }
}
