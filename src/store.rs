//! Durable event log.

use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous},
};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    codec::{Event, Kind},
    error::StoreError,
};

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persists one event. Returns only once the write is durable.
    async fn append(&self, event: &Event) -> Result<Uuid, StoreError>;

    /// Every persisted event, oldest first, ties in insertion order.
    async fn read_all_ordered(&self) -> Result<Vec<Event>, StoreError>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    username TEXT NOT NULL,
    message TEXT NOT NULL,
    image TEXT NOT NULL,
    timestamp INTEGER NOT NULL
)";

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Full);

        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::from_pool(db_pool).await
    }

    /// A private in-memory log, gone when the store is dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // every sqlite memory connection is its own database, so pin one
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(db_pool).await
    }

    pub async fn from_pool(db_pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&db_pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS messages_by_time ON messages (timestamp)")
            .execute(&db_pool)
            .await?;
        Ok(Self { db_pool })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, event: &Event) -> Result<Uuid, StoreError> {
        sqlx::query("INSERT INTO messages (id,kind,username,message,image,timestamp) values (?,?,?,?,?,?)")
            .bind(event.id.to_string())
            .bind(event.kind.as_str())
            .bind(&event.username)
            .bind(&event.message)
            .bind(&event.image)
            .bind(to_millis(event.timestamp))
            .execute(&self.db_pool)
            .await?;

        Ok(event.id)
    }

    async fn read_all_ordered(&self) -> Result<Vec<Event>, StoreError> {
        let rows: Vec<(String, String, String, String, String, i64)> =
            sqlx::query_as("SELECT id,kind,username,message,image,timestamp FROM messages ORDER BY timestamp ASC, rowid ASC")
                .fetch_all(&self.db_pool)
                .await?;

        rows.into_iter()
            .map(|(id, kind, username, message, image, timestamp)| -> Result<Event, StoreError> {
                let corrupt = |reason: String| StoreError::CorruptRow { id: id.clone(), reason };
                Ok(Event {
                    id: Uuid::parse_str(&id).map_err(|e| corrupt(e.to_string()))?,
                    kind: kind.parse::<Kind>().map_err(|e| corrupt(e.to_string()))?,
                    timestamp: from_millis(timestamp).map_err(|e| corrupt(e.to_string()))?,
                    username,
                    message,
                    image,
                })
            })
            .collect()
    }
}

pub(crate) fn to_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(millis: i64) -> Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::codec::{Inbound, decode};

    fn event(raw: &str, timestamp: OffsetDateTime) -> Event {
        Event::stamp(decode(raw.as_bytes()).unwrap(), timestamp)
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.read_all_ordered().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_read() {
        let store = SqliteStore::in_memory().await.unwrap();
        let stored = event(
            r#"{"type":"chat","username":"alice","message":"hi"}"#,
            datetime!(2024-05-01 12:00:00.123 UTC),
        );

        let id = store.append(&stored).await.unwrap();
        assert_eq!(id, stored.id);

        let history = store.read_all_ordered().await.unwrap();
        assert_eq!(history, vec![stored]);
        assert_eq!(history[0].image, "");
    }

    #[tokio::test]
    async fn test_read_orders_by_timestamp_then_insertion() {
        let store = SqliteStore::in_memory().await.unwrap();
        let late = event(r#"{"type":"chat","username":"a","message":"late"}"#, datetime!(2024-05-01 12:00:02 UTC));
        let tie_a = event(r#"{"type":"chat","username":"a","message":"tie a"}"#, datetime!(2024-05-01 12:00:01 UTC));
        let tie_b = event(r#"{"type":"location","username":"b","message":"tie b"}"#, datetime!(2024-05-01 12:00:01 UTC));
        let early = event(r#"{"type":"image","username":"c","image":"AAAA"}"#, datetime!(2024-05-01 12:00:00 UTC));

        for e in [&late, &tie_a, &tie_b, &early] {
            store.append(e).await.unwrap();
        }

        let messages: Vec<String> = store
            .read_all_ordered()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, ["", "tie a", "tie b", "late"]);

        // restartable: a second read yields the same snapshot
        assert_eq!(store.read_all_ordered().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_append_after_close_fails() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.db_pool.close().await;

        let stored = Event::stamp(
            Inbound {
                kind: Kind::Chat,
                username: "a".into(),
                message: "lost".into(),
                image: String::new(),
            },
            OffsetDateTime::UNIX_EPOCH,
        );
        assert!(matches!(store.append(&stored).await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.read_all_ordered().await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unknown_stored_kind_is_corrupt() {
        let store = SqliteStore::in_memory().await.unwrap();
        sqlx::query("INSERT INTO messages (id,kind,username,message,image,timestamp) values (?,'poke','a','','',0)")
            .bind(Uuid::now_v7().to_string())
            .execute(&store.db_pool)
            .await
            .unwrap();

        assert!(matches!(
            store.read_all_ordered().await,
            Err(StoreError::CorruptRow { .. })
        ));
    }

    #[test]
    fn millis_round_trip() {
        let ts = datetime!(2024-05-01 12:00:00.123 UTC);
        assert_eq!(from_millis(to_millis(ts)).unwrap(), ts);
    }
}
