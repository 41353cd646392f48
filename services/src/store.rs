use async_trait::async_trait;
use lb_writer_core::{
    ListenData,
    ListenKey,
};
use serde::Serialize;
use serde_json::Value;

mod timescale;
pub use timescale::*;


/// One row of the `listen` relation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenRow {
    pub listened_at: i64,
    pub recording_msid: String,
    pub user_name: String,
    pub data: Value,
}

impl ListenRow {
    pub fn key(&self) -> ListenKey { ListenKey::from(self) }
}

impl From<&ListenRow> for ListenKey {
    fn from(row: &ListenRow) -> Self { Self::new(row.listened_at, &row.recording_msid, &row.user_name) }
}

impl<L: ListenData> From<&L> for ListenRow {
    fn from(listen: &L) -> Self {
        Self {
            listened_at: listen.listened_at(),
            recording_msid: listen.recording_msid().to_owned(),
            user_name: listen.user_name().to_owned(),
            data: Value::Object(listen.track_metadata().clone()),
        }
    }
}


#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient or row level failure; worth retrying, possibly with fewer rows
    #[error("operational error: {0}")]
    Operational(#[source] sqlx::Error),

    /// Retrying won't help: bad statement, schema mismatch, bad credentials...
    #[error("structural error: {0}")]
    Structural(#[source] sqlx::Error),
}

impl StoreError {
    pub fn is_operational(&self) -> bool { matches!(self, Self::Operational(_)) }

    /// Whether the connection the error came from is no longer usable
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Operational(e) | Self::Structural(e) => match e {
                sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => db.code().is_some_and(|c| c.starts_with("08") || c.starts_with("57P")),
                _ => false,
            },
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let operational = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db.code().is_some_and(|c| is_operational_sqlstate(&c)),
            _ => false,
        };
        if operational {
            Self::Operational(err)
        } else {
            Self::Structural(err)
        }
    }
}

/// SQLSTATE classes treated as operational
///
/// 08 connection exception, 22 data exception, 40 transaction rollback,
/// 53 insufficient resources, 54 program limit exceeded,
/// 55 object not in prerequisite state, 57 operator intervention, 58 system error
pub fn is_operational_sqlstate(code: &str) -> bool {
    matches!(code.get(..2), Some("08" | "22" | "40" | "53" | "54" | "55" | "57" | "58"))
}


/// Somewhere listens can be written to with "insert, ignore on conflict" semantics
#[async_trait]
pub trait ListenStore: Send {
    /// Inserts all `rows` in a single statement, skipping any whose key already exists.
    ///
    /// Returns how many rows were new.
    async fn insert(&mut self, rows: &[ListenRow]) -> Result<u64, StoreError>;
}
