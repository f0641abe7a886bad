use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::StoreError;
use crate::session::{apply_patch, SessionPatch, SessionState};

pub const DEFAULT_STORE_KEY: &str = "runOverlay/state";

/// Receiving end of a store subscription.
pub trait SnapshotSource {
    /// Next full record broadcast since the previous call, without blocking.
    fn try_next(&mut self) -> Result<Option<SessionState>, StoreError>;
}

/// Shared session record with subscribe-on-change and partial updates.
pub trait SessionStore {
    fn load(&self) -> Result<Option<SessionState>, StoreError>;

    /// Write `state` only if no record exists. Returns whether it was written.
    fn insert_if_absent(&self, state: &SessionState) -> Result<bool, StoreError>;

    /// Overwrite the whole record.
    fn replace(&self, state: &SessionState) -> Result<(), StoreError>;

    /// Merge `patch` into the current record and broadcast the result.
    fn update(&self, patch: &SessionPatch) -> Result<SessionState, StoreError>;

    /// Subscribe to the full record. The current record, if any, is delivered first.
    fn subscribe(&self) -> Result<Box<dyn SnapshotSource>, StoreError>;
}

impl<T: SessionStore + ?Sized> SessionStore for &T {
    fn load(&self) -> Result<Option<SessionState>, StoreError> {
        (**self).load()
    }
    fn insert_if_absent(&self, state: &SessionState) -> Result<bool, StoreError> {
        (**self).insert_if_absent(state)
    }
    fn replace(&self, state: &SessionState) -> Result<(), StoreError> {
        (**self).replace(state)
    }
    fn update(&self, patch: &SessionPatch) -> Result<SessionState, StoreError> {
        (**self).update(patch)
    }
    fn subscribe(&self) -> Result<Box<dyn SnapshotSource>, StoreError> {
        (**self).subscribe()
    }
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn load(&self) -> Result<Option<SessionState>, StoreError> {
        (**self).load()
    }
    fn insert_if_absent(&self, state: &SessionState) -> Result<bool, StoreError> {
        (**self).insert_if_absent(state)
    }
    fn replace(&self, state: &SessionState) -> Result<(), StoreError> {
        (**self).replace(state)
    }
    fn update(&self, patch: &SessionPatch) -> Result<SessionState, StoreError> {
        (**self).update(patch)
    }
    fn subscribe(&self) -> Result<Box<dyn SnapshotSource>, StoreError> {
        (**self).subscribe()
    }
}

/// Make sure a usable record exists, writing the default `ready` record once
/// if the key is missing or unreadable.
pub fn ensure_initialized<S: SessionStore + ?Sized>(
    store: &S,
    now_epoch_ms: i64,
) -> Result<SessionState, StoreError> {
    match store.load() {
        Ok(Some(state)) => Ok(state),
        Ok(None) => {
            let initial = SessionState::initial(now_epoch_ms);
            if store.insert_if_absent(&initial)? {
                info!("session record missing, wrote default ready record");
                Ok(initial)
            } else {
                // someone else initialized it between our read and write
                store.load()?.ok_or(StoreError::Closed)
            }
        }
        Err(StoreError::Malformed { key, reason }) => {
            warn!("session record at {key} is malformed ({reason}), rewriting defaults");
            let initial = SessionState::initial(now_epoch_ms);
            store.replace(&initial)?;
            Ok(initial)
        }
        Err(e) => Err(e),
    }
}

#[derive(Default)]
struct MemoryInner {
    record: Option<SessionState>,
    subscribers: Vec<Sender<SessionState>>,
}

/// In-process store: one record, broadcast to every live subscriber.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(state: SessionState) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.record = Some(state);
        }
        store
    }

    /// Make every subsequent write fail, as a lost connection or denied rule would.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Drop every subscriber's channel; their next poll reports `Closed`.
    pub fn disconnect_subscribers(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.clear();
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }

    fn broadcast(inner: &mut MemoryInner, state: &SessionState) {
        inner
            .subscribers
            .retain(|tx| tx.send(state.clone()).is_ok());
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<SessionState>, StoreError> {
        Ok(self.lock()?.record.clone())
    }

    fn insert_if_absent(&self, state: &SessionState) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        if inner.record.is_some() {
            return Ok(false);
        }
        inner.record = Some(state.clone());
        Self::broadcast(&mut inner, state);
        Ok(true)
    }

    fn replace(&self, state: &SessionState) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        inner.record = Some(state.clone());
        Self::broadcast(&mut inner, state);
        Ok(())
    }

    fn update(&self, patch: &SessionPatch) -> Result<SessionState, StoreError> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        let current = inner.record.clone().unwrap_or_default();
        let next = apply_patch(&current, patch);
        inner.record = Some(next.clone());
        Self::broadcast(&mut inner, &next);
        Ok(next)
    }

    fn subscribe(&self) -> Result<Box<dyn SnapshotSource>, StoreError> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.lock()?;
        if let Some(record) = inner.record.clone() {
            // receiver is alive, this cannot fail
            let _ = tx.send(record);
        }
        inner.subscribers.push(tx);
        Ok(Box::new(ChannelSubscription { rx }))
    }
}

struct ChannelSubscription {
    rx: Receiver<SessionState>,
}

impl SnapshotSource for ChannelSubscription {
    fn try_next(&mut self) -> Result<Option<SessionState>, StoreError> {
        match self.rx.try_recv() {
            Ok(state) => Ok(Some(state)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StoreError::Closed),
        }
    }
}

/// Durable store backed by a SQLite file, shareable between processes.
///
/// Each key holds one JSON record and a version counter bumped on every
/// write; subscriptions poll the version on their own connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
    key: String,
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS session_state (
            key TEXT PRIMARY KEY,
            record TEXT NOT NULL,
            version INTEGER NOT NULL
        )
        "#,
        [],
    )?;
    Ok(conn)
}

fn parse_record(key: &str, raw: &str) -> Result<SessionState, StoreError> {
    serde_json::from_str::<SessionState>(raw)
        .map(SessionState::sanitized)
        .map_err(|e| StoreError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn read_record(conn: &Connection, key: &str) -> Result<Option<SessionState>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT record FROM session_state WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|r| parse_record(key, &r)).transpose()
}

fn write_record(conn: &Connection, key: &str, state: &SessionState) -> Result<(), StoreError> {
    let raw = serde_json::to_string(state)?;
    conn.execute(
        r#"
        INSERT INTO session_state (key, record, version) VALUES (?1, ?2, 1)
        ON CONFLICT(key) DO UPDATE SET record = excluded.record, version = session_state.version + 1
        "#,
        params![key, raw],
    )?;
    Ok(())
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P, key: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path)?;
        let key = key.into();
        debug!("opened sqlite session store at {} (key {})", path.display(), key);
        Ok(Self { conn, path, key })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl SessionStore for SqliteStore {
    fn load(&self) -> Result<Option<SessionState>, StoreError> {
        read_record(&self.conn, &self.key)
    }

    fn insert_if_absent(&self, state: &SessionState) -> Result<bool, StoreError> {
        let raw = serde_json::to_string(state)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO session_state (key, record, version) VALUES (?1, ?2, 1)",
            params![self.key, raw],
        )?;
        Ok(changed == 1)
    }

    fn replace(&self, state: &SessionState) -> Result<(), StoreError> {
        write_record(&self.conn, &self.key, state)
    }

    fn update(&self, patch: &SessionPatch) -> Result<SessionState, StoreError> {
        // IMMEDIATE takes the write lock up front so two processes cannot
        // both read the same record and overwrite each other's merge.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let current = read_record(&tx, &self.key)?.unwrap_or_default();
        let next = apply_patch(&current, patch);
        write_record(&tx, &self.key, &next)?;
        tx.commit()?;
        Ok(next)
    }

    fn subscribe(&self) -> Result<Box<dyn SnapshotSource>, StoreError> {
        let conn = open_connection(&self.path)?;
        Ok(Box::new(SqliteSubscription {
            conn,
            key: self.key.clone(),
            last_version: 0,
        }))
    }
}

struct SqliteSubscription {
    conn: Connection,
    key: String,
    last_version: i64,
}

impl SnapshotSource for SqliteSubscription {
    fn try_next(&mut self) -> Result<Option<SessionState>, StoreError> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT version, record FROM session_state WHERE key = ?1",
                [&self.key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((version, raw)) if version != self.last_version => {
                self.last_version = version;
                parse_record(&self.key, &raw).map(Some)
            }
            _ => Ok(None),
        }
    }
}
