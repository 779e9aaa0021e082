// src/lock/mod.rs

//! Lock Service (spec §4.5): run-lock + per-resource state-locks with
//! TTL expiry, heartbeat renewal, and background cleanup, backed by a
//! durable table. SQLite (not `flock`) because TTL/heartbeat semantics
//! need row-level bookkeeping a plain advisory lock can't express.
//!
//! Grounded on the teacher's `SystemLock` (`daemon/lock.rs`) for the
//! PID-liveness-check contention idiom, combined with `rusqlite` (the
//! teacher's core DB dependency) for the durable table this spec
//! requires.

use crate::config::LockConfig;
use crate::error::{check_cancelled, CancelToken, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Sentinel `lock_type` used for the process-singleton run lock, which
/// has no per-resource type of its own.
pub const RUN_LOCK_TYPE: &str = "__run__";

/// A held lock record (spec §3 `RunLock`/`StateLock` share this shape).
#[derive(Debug, Clone, PartialEq)]
pub struct Lock {
    pub lock_id: String,
    pub lock_type: String,
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub metadata: String,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_run_lock(&self) -> bool {
        self.lock_type == RUN_LOCK_TYPE
    }
}

fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    unsafe {
        if libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            if let Ok(s) = std::str::from_utf8(&buf[..end]) {
                return s.to_string();
            }
        }
    }
    "unknown-host".to_string()
}

/// Returns true if `pid` corresponds to a running process on this host.
fn process_is_live(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

struct Inner {
    conn: Mutex<Connection>,
}

/// The durable two-kind lock table plus its background heartbeat and
/// cleanup tasks.
pub struct LockService {
    inner: Arc<Inner>,
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LockService {
    pub fn open(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS locks (
                lock_id TEXT NOT NULL,
                lock_type TEXT NOT NULL,
                pid INTEGER NOT NULL,
                hostname TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                heartbeat_at TEXT NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (lock_id, lock_type)
            )",
            [],
        )?;
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        })
    }

    fn acquire(
        &self,
        lock_id: &str,
        lock_type: &str,
        ttl: Duration,
        cancel: CancelToken,
    ) -> Result<Option<Lock>> {
        check_cancelled(cancel)?;
        let conn = self.inner.conn.lock().unwrap();
        let now = Utc::now();
        let expires_at = now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(0));
        let pid = std::process::id();
        let hostname = local_hostname();

        conn.execute(
            "DELETE FROM locks WHERE lock_id = ?1 AND lock_type = ?2 AND expires_at <= ?3",
            params![lock_id, lock_type, now.to_rfc3339()],
        )?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO locks
                (lock_id, lock_type, pid, hostname, acquired_at, expires_at, heartbeat_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '{}')",
            params![
                lock_id,
                lock_type,
                pid,
                hostname,
                now.to_rfc3339(),
                expires_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(Lock {
            lock_id: lock_id.to_string(),
            lock_type: lock_type.to_string(),
            pid,
            hostname,
            acquired_at: now,
            expires_at,
            heartbeat_at: now,
            metadata: "{}".to_string(),
        }))
    }

    pub fn acquire_run_lock(
        &self,
        lock_id: &str,
        ttl: Duration,
        cancel: CancelToken,
    ) -> Result<Option<Lock>> {
        self.acquire(lock_id, RUN_LOCK_TYPE, ttl, cancel)
    }

    pub fn acquire_state_lock(
        &self,
        lock_id: &str,
        lock_type: &str,
        ttl: Duration,
        cancel: CancelToken,
    ) -> Result<Option<Lock>> {
        self.acquire(lock_id, lock_type, ttl, cancel)
    }

    fn find(&self, lock_id: &str, lock_type: &str) -> Result<Option<Lock>> {
        let conn = self.inner.conn.lock().unwrap();
        let lock = conn
            .query_row(
                "SELECT lock_id, lock_type, pid, hostname, acquired_at, expires_at, heartbeat_at, metadata
                 FROM locks WHERE lock_id = ?1 AND lock_type = ?2",
                params![lock_id, lock_type],
                row_to_lock,
            )
            .optional()?;
        Ok(lock)
    }

    pub fn find_run_lock(&self, lock_id: &str) -> Result<Option<Lock>> {
        self.find(lock_id, RUN_LOCK_TYPE)
    }

    pub fn find_state_lock(&self, lock_id: &str, lock_type: &str) -> Result<Option<Lock>> {
        self.find(lock_id, lock_type)
    }

    pub fn list_run_locks(&self) -> Result<Vec<Lock>> {
        self.list_by_type(RUN_LOCK_TYPE)
    }

    pub fn list_state_locks(&self) -> Result<Vec<Lock>> {
        let conn = self.inner.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT lock_id, lock_type, pid, hostname, acquired_at, expires_at, heartbeat_at, metadata
             FROM locks WHERE lock_type != ?1",
        )?;
        let rows = stmt.query_map(params![RUN_LOCK_TYPE], row_to_lock)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn list_by_type(&self, lock_type: &str) -> Result<Vec<Lock>> {
        let conn = self.inner.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT lock_id, lock_type, pid, hostname, acquired_at, expires_at, heartbeat_at, metadata
             FROM locks WHERE lock_type = ?1",
        )?;
        let rows = stmt.query_map(params![lock_type], row_to_lock)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn release_run_lock(&self, lock_id: &str) -> Result<()> {
        self.release(lock_id, RUN_LOCK_TYPE)
    }

    pub fn release_state_lock(&self, lock_id: &str, lock_type: &str) -> Result<()> {
        self.release(lock_id, lock_type)
    }

    fn release(&self, lock_id: &str, lock_type: &str) -> Result<()> {
        let conn = self.inner.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM locks WHERE lock_id = ?1 AND lock_type = ?2",
            params![lock_id, lock_type],
        )?;
        Ok(())
    }

    /// Contention policy at driver startup (spec §4.5): if acquiring the
    /// run lock fails, check whether the holder is alive and unexpired.
    /// If not, steal the lock and retry once. Otherwise the caller must
    /// decide (prompt interactively, or exit non-zero).
    pub fn acquire_run_lock_with_steal(
        &self,
        lock_id: &str,
        ttl: Duration,
        cancel: CancelToken,
    ) -> Result<Option<Lock>> {
        if let Some(lock) = self.acquire_run_lock(lock_id, ttl, cancel)? {
            return Ok(Some(lock));
        }

        if let Some(existing) = self.find_run_lock(lock_id)? {
            let now = Utc::now();
            if existing.is_expired(now) || !process_is_live(existing.pid) {
                tracing::warn!(
                    lock_id, holder_pid = existing.pid, "stealing stale run lock"
                );
                self.release_run_lock(lock_id)?;
                return self.acquire_run_lock(lock_id, ttl, cancel);
            }
        }
        Ok(None)
    }

    /// Extend `expires_at`/`heartbeat_at` for every lock currently held
    /// by this process (spec §4.5 Heartbeat).
    fn heartbeat_once(&self, ttl: Duration) -> Result<usize> {
        heartbeat_once(&self.inner, ttl)
    }

    fn cleanup_once(&self) -> Result<usize> {
        cleanup_once(&self.inner)
    }

    /// Start the background heartbeat and cleanup tasks. Both are
    /// cooperative periodic loops that check `stop` between sleeps and
    /// are joined by [`LockService::stop`].
    pub fn start(&self, config: &LockConfig) {
        let heartbeat_ttl = config.default_ttl;
        let heartbeat_interval = config.heartbeat_interval;
        let cleanup_interval = config.cleanup_interval;

        {
            let inner = Arc::clone(&self.inner);
            let stop = Arc::clone(&self.stop);
            let handle = std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(heartbeat_interval);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Err(e) = heartbeat_once(&inner, heartbeat_ttl) {
                        tracing::warn!(error = %e, "lock heartbeat failed");
                    }
                }
            });
            self.handles.lock().unwrap().push(handle);
        }

        {
            let inner = Arc::clone(&self.inner);
            let stop = Arc::clone(&self.stop);
            let handle = std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(cleanup_interval);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match cleanup_once(&inner) {
                        Ok(n) if n > 0 => tracing::debug!(removed = n, "cleaned up expired locks"),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "lock cleanup failed"),
                    }
                }
            });
            self.handles.lock().unwrap().push(handle);
        }
    }

    /// Signal both background tasks to stop and join them.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for LockService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn heartbeat_once(inner: &Inner, ttl: Duration) -> Result<usize> {
    let conn = inner.conn.lock().unwrap();
    let now = Utc::now();
    let expires_at = now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(0));
    let pid = std::process::id();
    let updated = conn.execute(
        "UPDATE locks SET expires_at = ?1, heartbeat_at = ?2 WHERE pid = ?3",
        params![expires_at.to_rfc3339(), now.to_rfc3339(), pid],
    )?;
    Ok(updated)
}

fn cleanup_once(inner: &Inner) -> Result<usize> {
    let conn = inner.conn.lock().unwrap();
    let now = Utc::now();
    let removed = conn.execute(
        "DELETE FROM locks WHERE expires_at <= ?1",
        params![now.to_rfc3339()],
    )?;
    Ok(removed)
}

fn row_to_lock(row: &rusqlite::Row) -> rusqlite::Result<Lock> {
    Ok(Lock {
        lock_id: row.get(0)?,
        lock_type: row.get(1)?,
        pid: row.get::<_, i64>(2)? as u32,
        hostname: row.get(3)?,
        acquired_at: parse_ts(row.get::<_, String>(4)?),
        expires_at: parse_ts(row.get::<_, String>(5)?),
        heartbeat_at: parse_ts(row.get::<_, String>(6)?),
        metadata: row.get(7)?,
    })
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service() -> (TempDir, LockService) {
        let dir = TempDir::new().unwrap();
        let service = LockService::open(&dir.path().join("locks.db")).unwrap();
        (dir, service)
    }

    #[test]
    fn test_second_acquire_before_ttl_is_contested() {
        let (_dir, service) = service();
        let first = service
            .acquire_run_lock("system-runlock", Duration::from_secs(60), None)
            .unwrap();
        assert!(first.is_some());

        let second = service
            .acquire_run_lock("system-runlock", Duration::from_secs(60), None)
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_release_then_reacquire_succeeds() {
        let (_dir, service) = service();
        service
            .acquire_run_lock("system-runlock", Duration::from_secs(60), None)
            .unwrap();
        service.release_run_lock("system-runlock").unwrap();

        let reacquired = service
            .acquire_run_lock("system-runlock", Duration::from_secs(60), None)
            .unwrap();
        assert!(reacquired.is_some());
    }

    #[test]
    fn test_expired_lock_is_reclaimable() {
        let (_dir, service) = service();
        service
            .acquire_run_lock("system-runlock", Duration::from_millis(1), None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let reacquired = service
            .acquire_run_lock("system-runlock", Duration::from_secs(60), None)
            .unwrap();
        assert!(reacquired.is_some());
    }

    #[test]
    fn test_state_locks_are_keyed_independently() {
        let (_dir, service) = service();
        let a = service
            .acquire_state_lock("system-runlock", "sbi:1", Duration::from_secs(60), None)
            .unwrap();
        let b = service
            .acquire_state_lock("system-runlock", "sbi:2", Duration::from_secs(60), None)
            .unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[test]
    fn test_steal_dead_process_lock() {
        let (_dir, service) = service();
        // Fabricate a lock held by a pid that can't possibly be alive.
        {
            let conn = service.inner.conn.lock().unwrap();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO locks (lock_id, lock_type, pid, hostname, acquired_at, expires_at, heartbeat_at, metadata)
                 VALUES ('system-runlock', '__run__', 999999, 'h', ?1, ?2, ?1, '{}')",
                params![now.to_rfc3339(), (now + ChronoDuration::hours(1)).to_rfc3339()],
            ).unwrap();
        }

        let stolen = service
            .acquire_run_lock_with_steal("system-runlock", Duration::from_secs(60), None)
            .unwrap();
        assert!(stolen.is_some());
    }

    #[test]
    fn test_heartbeat_extends_expiry() {
        let (_dir, service) = service();
        let lock = service
            .acquire_run_lock("system-runlock", Duration::from_secs(1), None)
            .unwrap()
            .unwrap();

        std::thread::sleep(Duration::from_millis(5));
        service.heartbeat_once(Duration::from_secs(120)).unwrap();

        let updated = service.find_run_lock("system-runlock").unwrap().unwrap();
        assert!(updated.expires_at > lock.expires_at);
    }

    #[test]
    fn test_cleanup_removes_expired_rows() {
        let (_dir, service) = service();
        service
            .acquire_run_lock("a", Duration::from_millis(1), None)
            .unwrap();
        service
            .acquire_state_lock("b", "sbi:1", Duration::from_secs(60), None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = service.cleanup_once().unwrap();
        assert_eq!(removed, 1);
        assert!(service.find_run_lock("a").unwrap().is_none());
        assert!(service.find_state_lock("b", "sbi:1").unwrap().is_some());
    }
}
