use std::{
    collections::{
        btree_map::Entry,
        BTreeMap,
        HashSet,
    },
    time::Duration,
};

use async_trait::async_trait;
use lb_writer_core::{
    Listen,
    ListenKey,
};
use serde_json::{
    json,
    Value,
};

use crate::{
    retry::BatchRetryPolicy,
    store::{
        ListenRow,
        ListenStore,
        StoreError,
    },
};

pub(crate) const NO_DELAY: BatchRetryPolicy = BatchRetryPolicy::new(5, Duration::ZERO);


/// In memory listen store enforcing the same uniqueness constraint as the `listen` table
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub rows: BTreeMap<ListenKey, Value>,
    /// Size of every batch an insert was attempted with, in call order
    pub calls: Vec<usize>,
    /// Any statement containing one of these keys fails operationally
    pub poison: HashSet<ListenKey>,
    /// Number of upcoming statements that fail operationally regardless of content
    pub transient_failures: usize,
    /// Every statement fails structurally
    pub structural: bool,
    /// Statements of at most `structural_max_len` rows containing one of these keys
    /// fail structurally; longer ones containing them fail operationally
    pub structural_keys: HashSet<ListenKey>,
    pub structural_max_len: usize,
}

impl MemoryStore {
    pub fn with_poison(keys: impl IntoIterator<Item = ListenKey>) -> Self {
        Self {
            poison: keys.into_iter().collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ListenStore for MemoryStore {
    async fn insert(&mut self, rows: &[ListenRow]) -> Result<u64, StoreError> {
        self.calls.push(rows.len());
        if self.structural {
            return Err(StoreError::Structural(sqlx::Error::ColumnNotFound("data".to_owned())));
        }
        if rows.iter().any(|r| self.structural_keys.contains(&r.key())) {
            return Err(if rows.len() <= self.structural_max_len {
                StoreError::Structural(sqlx::Error::ColumnNotFound("data".to_owned()))
            } else {
                StoreError::Operational(sqlx::Error::Protocol("canceling statement due to lock timeout".to_owned()))
            });
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(StoreError::Operational(sqlx::Error::Protocol("server closed the connection unexpectedly".to_owned())));
        }
        if rows.iter().any(|r| self.poison.contains(&r.key())) {
            return Err(StoreError::Operational(sqlx::Error::Protocol("invalid byte sequence for encoding \"UTF8\"".to_owned())));
        }

        let mut inserted = 0;
        for row in rows {
            if let Entry::Vacant(slot) = self.rows.entry(row.key()) {
                slot.insert(row.data.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}


pub(crate) fn listen(listened_at: i64, recording_msid: &str, user_name: &str) -> Listen {
    serde_json::from_value(json!({
        "listened_at": listened_at,
        "recording_msid": recording_msid,
        "user_name": user_name,
        "track_metadata": {
            "artist_name": format!("Artist {listened_at}"),
            "track_name": format!("Track {listened_at}"),
        },
    }))
    .expect("valid listen")
}

/// `n` listens with distinct keys
pub(crate) fn listens(n: usize) -> Vec<Listen> {
    (0..n).map(|i| listen(1_600_000_000 + i as i64, &format!("msid-{i}"), "alice")).collect()
}
