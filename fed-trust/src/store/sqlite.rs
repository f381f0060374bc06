//! SQLite storage backend for peers and trust events.

use super::{Peer, PeerStore, TrustEvent};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use fed_core::{ConflictStrategy, PeerStatus, TrustEventKind};
use fed_types::{Cursor, PeerId, SyncDirection};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

const PEER_COLUMNS: &str = "id, name, base_url, public_key, trust_score, status, direction, \
    conflict_strategy, push_min_trust, push_types, pull_cursor, push_cursor, syncs_attempted, \
    syncs_succeeded, items_received, items_sent, registered_at, last_sync_at, last_success_at, \
    last_verified_at, inactivity_checkpoint, verification_checkpoint, inbound_checkpoint_ms";

/// SQLite-based peer store.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqlitePeerStore {
    pool: SqlitePool,
}

impl SqlitePeerStore {
    /// Open (or create) a database file.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS peers (
                id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                public_key BLOB NOT NULL,
                trust_score REAL NOT NULL,
                status TEXT NOT NULL,
                direction TEXT NOT NULL,
                conflict_strategy TEXT NOT NULL,
                push_min_trust REAL NOT NULL DEFAULT 0,
                push_types TEXT NOT NULL DEFAULT '[]',
                pull_cursor INTEGER NOT NULL DEFAULT 0,
                push_cursor INTEGER NOT NULL DEFAULT 0,
                syncs_attempted INTEGER NOT NULL DEFAULT 0,
                syncs_succeeded INTEGER NOT NULL DEFAULT 0,
                items_received INTEGER NOT NULL DEFAULT 0,
                items_sent INTEGER NOT NULL DEFAULT 0,
                registered_at INTEGER NOT NULL,
                last_sync_at INTEGER,
                last_success_at INTEGER,
                last_verified_at INTEGER,
                inactivity_checkpoint INTEGER,
                verification_checkpoint INTEGER,
                inbound_checkpoint_ms INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Databases created before inbound checkpoints lack the column.
        let has_inbound: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('peers') WHERE name = 'inbound_checkpoint_ms'",
        )
        .fetch_one(&self.pool)
        .await?;
        if has_inbound == 0 {
            sqlx::query("ALTER TABLE peers ADD COLUMN inbound_checkpoint_ms INTEGER")
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                peer_id BLOB NOT NULL,
                kind TEXT NOT NULL,
                delta REAL NOT NULL,
                score_after REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_peers_public_key ON peers(public_key)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trust_events_peer ON trust_events(peer_id, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn bind_peer<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        peer: &'q Peer,
        push_types: String,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(peer.id.as_bytes().as_slice())
            .bind(&peer.name)
            .bind(&peer.base_url)
            .bind(peer.public_key.as_slice())
            .bind(peer.trust_score)
            .bind(peer.status.as_str())
            .bind(peer.direction.as_str())
            .bind(peer.conflict_strategy.as_str())
            .bind(peer.push_min_trust)
            .bind(push_types)
            .bind(peer.pull_cursor.value() as i64)
            .bind(peer.push_cursor.value() as i64)
            .bind(peer.syncs_attempted as i64)
            .bind(peer.syncs_succeeded as i64)
            .bind(peer.items_received as i64)
            .bind(peer.items_sent as i64)
            .bind(peer.registered_at as i64)
            .bind(peer.last_sync_at.map(|v| v as i64))
            .bind(peer.last_success_at.map(|v| v as i64))
            .bind(peer.last_verified_at.map(|v| v as i64))
            .bind(peer.inactivity_checkpoint.map(|v| v as i64))
            .bind(peer.verification_checkpoint.map(|v| v as i64))
            .bind(peer.inbound_checkpoint_ms.map(|v| v as i64))
    }

    fn encode_push_types(peer: &Peer) -> StorageResult<String> {
        serde_json::to_string(&peer.push_types).map_err(|e| StorageError::Corrupt {
            field: "push_types",
            value: e.to_string(),
        })
    }
}

const UPSERT_PEER: &str = r#"
    INSERT OR REPLACE INTO peers (
        id, name, base_url, public_key, trust_score, status, direction,
        conflict_strategy, push_min_trust, push_types, pull_cursor, push_cursor,
        syncs_attempted, syncs_succeeded, items_received, items_sent,
        registered_at, last_sync_at, last_success_at, last_verified_at,
        inactivity_checkpoint, verification_checkpoint, inbound_checkpoint_ms
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
            ?17, ?18, ?19, ?20, ?21, ?22, ?23)
"#;

#[async_trait]
impl PeerStore for SqlitePeerStore {
    async fn insert_peer(&self, peer: &Peer) -> StorageResult<()> {
        let push_types = Self::encode_push_types(peer)?;
        let sql = UPSERT_PEER.replacen("INSERT OR REPLACE", "INSERT", 1);
        Self::bind_peer(sqlx::query(&sql), peer, push_types)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_peer(&self, id: &PeerId) -> StorageResult<Option<Peer>> {
        let row = sqlx::query_as::<_, PeerRow>(&format!(
            "SELECT {PEER_COLUMNS} FROM peers WHERE id = ?1"
        ))
        .bind(id.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Peer::try_from).transpose()
    }

    async fn update_peer(&self, peer: &Peer) -> StorageResult<()> {
        let push_types = Self::encode_push_types(peer)?;
        Self::bind_peer(sqlx::query(UPSERT_PEER), peer, push_types)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_peers(&self) -> StorageResult<Vec<Peer>> {
        let rows = sqlx::query_as::<_, PeerRow>(&format!(
            "SELECT {PEER_COLUMNS} FROM peers ORDER BY registered_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Peer::try_from).collect()
    }

    async fn find_by_public_key(&self, public_key: &[u8; 32]) -> StorageResult<Option<Peer>> {
        let row = sqlx::query_as::<_, PeerRow>(&format!(
            "SELECT {PEER_COLUMNS} FROM peers WHERE public_key = ?1 \
             ORDER BY (status = 'revoked') ASC, registered_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(public_key.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Peer::try_from).transpose()
    }

    async fn append_event(
        &self,
        peer: &Peer,
        event: &TrustEvent,
        max_history: usize,
    ) -> StorageResult<()> {
        let push_types = Self::encode_push_types(peer)?;
        let mut tx = self.pool.begin().await?;

        Self::bind_peer(sqlx::query(UPSERT_PEER), peer, push_types)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO trust_events (peer_id, kind, delta, score_after, timestamp, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(event.peer_id.as_bytes().as_slice())
        .bind(event.kind.as_str())
        .bind(event.delta)
        .bind(event.score_after)
        .bind(event.timestamp as i64)
        .bind(event.reason.as_deref())
        .execute(&mut *tx)
        .await?;

        // Trim oldest beyond the bound
        sqlx::query(
            r#"
            DELETE FROM trust_events
            WHERE peer_id = ?1 AND id NOT IN (
                SELECT id FROM trust_events WHERE peer_id = ?1 ORDER BY id DESC LIMIT ?2
            )
            "#,
        )
        .bind(event.peer_id.as_bytes().as_slice())
        .bind(max_history.max(1) as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_events(&self, peer: &PeerId, limit: u32) -> StorageResult<Vec<TrustEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT peer_id, kind, delta, score_after, timestamp, reason
            FROM trust_events
            WHERE peer_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(peer.as_bytes().as_slice())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrustEvent::try_from).collect()
    }

    async fn count_events(&self, peer: &PeerId) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trust_events WHERE peer_id = ?1")
            .bind(peer.as_bytes().as_slice())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Internal row type for peer queries.
#[derive(sqlx::FromRow)]
struct PeerRow {
    id: Vec<u8>,
    name: String,
    base_url: String,
    public_key: Vec<u8>,
    trust_score: f64,
    status: String,
    direction: String,
    conflict_strategy: String,
    push_min_trust: f64,
    push_types: String,
    pull_cursor: i64,
    push_cursor: i64,
    syncs_attempted: i64,
    syncs_succeeded: i64,
    items_received: i64,
    items_sent: i64,
    registered_at: i64,
    last_sync_at: Option<i64>,
    last_success_at: Option<i64>,
    last_verified_at: Option<i64>,
    inactivity_checkpoint: Option<i64>,
    verification_checkpoint: Option<i64>,
    inbound_checkpoint_ms: Option<i64>,
}

fn corrupt(field: &'static str, value: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        field,
        value: value.into(),
    }
}

fn opt_u64(v: Option<i64>) -> Option<u64> {
    v.map(|v| v.max(0) as u64)
}

impl TryFrom<PeerRow> for Peer {
    type Error = StorageError;

    fn try_from(row: PeerRow) -> Result<Self, Self::Error> {
        let public_key: [u8; 32] = row
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| corrupt("public_key", format!("{} bytes", row.public_key.len())))?;

        Ok(Peer {
            id: PeerId::from_bytes(&row.id).ok_or_else(|| corrupt("id", format!("{:?}", row.id)))?,
            name: row.name,
            base_url: row.base_url,
            public_key,
            trust_score: row.trust_score,
            status: PeerStatus::parse(&row.status).ok_or_else(|| corrupt("status", row.status.clone()))?,
            direction: SyncDirection::parse(&row.direction)
                .ok_or_else(|| corrupt("direction", row.direction.clone()))?,
            conflict_strategy: ConflictStrategy::parse(&row.conflict_strategy)
                .ok_or_else(|| corrupt("conflict_strategy", row.conflict_strategy.clone()))?,
            push_min_trust: row.push_min_trust,
            push_types: serde_json::from_str(&row.push_types)
                .map_err(|_| corrupt("push_types", row.push_types.clone()))?,
            pull_cursor: Cursor::new(row.pull_cursor.max(0) as u64),
            push_cursor: Cursor::new(row.push_cursor.max(0) as u64),
            syncs_attempted: row.syncs_attempted.max(0) as u64,
            syncs_succeeded: row.syncs_succeeded.max(0) as u64,
            items_received: row.items_received.max(0) as u64,
            items_sent: row.items_sent.max(0) as u64,
            registered_at: row.registered_at.max(0) as u64,
            last_sync_at: opt_u64(row.last_sync_at),
            last_success_at: opt_u64(row.last_success_at),
            last_verified_at: opt_u64(row.last_verified_at),
            inactivity_checkpoint: opt_u64(row.inactivity_checkpoint),
            verification_checkpoint: opt_u64(row.verification_checkpoint),
            inbound_checkpoint_ms: opt_u64(row.inbound_checkpoint_ms),
        })
    }
}

/// Internal row type for event queries.
#[derive(sqlx::FromRow)]
struct EventRow {
    peer_id: Vec<u8>,
    kind: String,
    delta: f64,
    score_after: f64,
    timestamp: i64,
    reason: Option<String>,
}

impl TryFrom<EventRow> for TrustEvent {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(TrustEvent {
            peer_id: PeerId::from_bytes(&row.peer_id)
                .ok_or_else(|| corrupt("peer_id", format!("{:?}", row.peer_id)))?,
            kind: TrustEventKind::parse(&row.kind).ok_or_else(|| corrupt("kind", row.kind.clone()))?,
            delta: row.delta,
            score_after: row.score_after,
            timestamp: row.timestamp.max(0) as u64,
            reason: row.reason,
        })
    }
}
