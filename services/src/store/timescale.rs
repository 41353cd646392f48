use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Connection,
    PgConnection,
};
use tracing::{
    info,
    warn,
};

use super::{
    ListenRow,
    ListenStore,
    StoreError,
};

/// Rows are bound as parallel arrays so the statement doesn't grow with the batch
pub const INSERT_LISTENS: &str = r#"
    INSERT INTO listen (listened_at, recording_msid, user_name, data)
         SELECT listened_at, recording_msid::uuid, user_name, data
           FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::jsonb[])
             AS t (listened_at, recording_msid, user_name, data)
    ON CONFLICT (listened_at, recording_msid, user_name)
     DO NOTHING
"#;


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Postgres connection uri of the timescale instance
    pub uri: String,
}


/// Listen store backed by a single, exclusively owned timescale connection
pub struct TimescaleListenStore {
    config: StoreConfig,
    conn: Option<PgConnection>,
}

impl TimescaleListenStore {
    pub async fn connect(config: StoreConfig) -> Result<Self, sqlx::Error> {
        let conn = PgConnection::connect(&config.uri).await?;
        info!("Connected to timescale");
        Ok(Self { config, conn: Some(conn) })
    }

    /// The open connection, reopening it once if the last statement lost it
    async fn connection(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                info!("Reopening timescale connection");
                PgConnection::connect(&self.config.uri).await?
            },
        };
        Ok(self.conn.insert(conn))
    }
}

#[async_trait]
impl ListenStore for TimescaleListenStore {
    async fn insert(&mut self, rows: &[ListenRow]) -> Result<u64, StoreError> {
        let mut listened_at = Vec::with_capacity(rows.len());
        let mut recording_msid = Vec::with_capacity(rows.len());
        let mut user_name = Vec::with_capacity(rows.len());
        let mut data: Vec<Value> = Vec::with_capacity(rows.len());
        for row in rows {
            listened_at.push(row.listened_at);
            recording_msid.push(row.recording_msid.clone());
            user_name.push(row.user_name.clone());
            data.push(row.data.clone());
        }

        let conn = self.connection().await?;
        let res = sqlx::query(INSERT_LISTENS)
            .bind(listened_at)
            .bind(recording_msid)
            .bind(user_name)
            .bind(data)
            .execute(&mut *conn)
            .await;

        match res {
            Ok(done) => Ok(done.rows_affected()),
            Err(e) => {
                let err = StoreError::from(e);
                if err.is_connection_lost() {
                    warn!(error = %err, "Timescale connection lost; will reopen before the next statement");
                    self.conn = None;
                }
                Err(err)
            },
        }
    }
}
