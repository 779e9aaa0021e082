// src/config.rs

//! Runtime configuration: home directory resolution and the environment
//! variables the core recognizes (spec §6).

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default home directory name, relative to the current working directory
/// unless overridden.
pub const DEFAULT_HOME: &str = ".deespec";

/// `DEESPEC_DISABLE_RECOVERY=1` — skip startup recovery (diagnostic only).
pub const ENV_DISABLE_RECOVERY: &str = "DEESPEC_DISABLE_RECOVERY";
/// `DEESPEC_TX_DEST_ROOT` — override destination root for recovery.
pub const ENV_TX_DEST_ROOT: &str = "DEESPEC_TX_DEST_ROOT";
/// `DEESPEC_TEST_QUIET` — suppress verbose stderr logging.
pub const ENV_TEST_QUIET: &str = "DEESPEC_TEST_QUIET";
/// `DEE_HOME` — override home directory when the runtime config omits it.
pub const ENV_HOME: &str = "DEE_HOME";

/// Tunables for the Recovery Engine (spec §4.4).
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub per_txn_timeout: Duration,
    pub total_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            per_txn_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(5 * 60),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// Tunables for the Lock Service (spec §4.5).
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub default_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Process-wide runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Home directory (default `.deespec/`), resolved from `DEE_HOME` or
    /// the caller-supplied override.
    pub home: PathBuf,
    /// Destination root for published files, resolved with precedence
    /// `DEESPEC_TX_DEST_ROOT` env override > configured home > default.
    pub dest_root: PathBuf,
    pub recovery: RecoveryConfig,
    pub lock: LockConfig,
    pub disable_recovery: bool,
    pub quiet: bool,
}

impl Config {
    /// Transaction root: `<home>/var/txn`.
    pub fn txn_root(&self) -> PathBuf {
        self.home.join("var").join("txn")
    }

    /// Journal file: `<home>/var/journal.ndjson`.
    pub fn journal_path(&self) -> PathBuf {
        self.home.join("var").join("journal.ndjson")
    }

    /// Metrics file: `<home>/var/metrics.json`.
    pub fn metrics_path(&self) -> PathBuf {
        self.home.join("var").join("metrics.json")
    }

    /// Metrics snapshot directory: `<home>/var/metrics/snapshots`.
    pub fn metrics_snapshot_dir(&self) -> PathBuf {
        self.home.join("var").join("metrics").join("snapshots")
    }

    /// Durable lock table database: `<home>/var/locks.db`.
    pub fn lock_db_path(&self) -> PathBuf {
        self.home.join("var").join("locks.db")
    }

    /// Build a config, resolving `home` from the optional override, then
    /// `DEE_HOME`, then [`DEFAULT_HOME`].
    pub fn resolve(home_override: Option<PathBuf>) -> Self {
        let home = home_override
            .or_else(|| std::env::var_os(ENV_HOME).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));

        let dest_root = std::env::var_os(ENV_TX_DEST_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| home.clone());

        let disable_recovery = env_flag(ENV_DISABLE_RECOVERY);
        let quiet = env_flag(ENV_TEST_QUIET);

        Self {
            home,
            dest_root,
            recovery: RecoveryConfig::default(),
            lock: LockConfig::default(),
            disable_recovery,
            quiet,
        }
    }

    /// Config rooted at an explicit path, bypassing environment resolution
    /// (used by tests to get a hermetic temp-dir config).
    pub fn at(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            dest_root: home.clone(),
            home,
            recovery: RecoveryConfig::default(),
            lock: LockConfig::default(),
            disable_recovery: false,
            quiet: false,
        }
    }

    /// Ensure the on-disk directory layout described in spec §6 exists.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.txn_root())?;
        std::fs::create_dir_all(self.metrics_snapshot_dir())?;
        Ok(())
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Helper mirroring the teacher's "strip leading slash and join" idiom,
/// used when resolving a manifest-relative destination under a root.
pub fn join_relative(root: &Path, rel: &Path) -> PathBuf {
    let rel = rel.strip_prefix("/").unwrap_or(rel);
    root.join(rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_derives_var_paths_under_home() {
        let config = Config::at("/tmp/home-x");
        assert_eq!(config.txn_root(), PathBuf::from("/tmp/home-x/var/txn"));
        assert_eq!(
            config.journal_path(),
            PathBuf::from("/tmp/home-x/var/journal.ndjson")
        );
        assert_eq!(
            config.metrics_path(),
            PathBuf::from("/tmp/home-x/var/metrics.json")
        );
        assert_eq!(config.lock_db_path(), PathBuf::from("/tmp/home-x/var/locks.db"));
        assert_eq!(config.dest_root, config.home);
    }

    #[test]
    fn test_ensure_layout_creates_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::at(dir.path().join("home"));
        config.ensure_layout().unwrap();
        assert!(config.txn_root().is_dir());
        assert!(config.metrics_snapshot_dir().is_dir());
    }

    #[test]
    fn test_join_relative_strips_leading_slash() {
        let root = Path::new("/dest");
        assert_eq!(
            join_relative(root, Path::new("/a/b.txt")),
            PathBuf::from("/dest/a/b.txt")
        );
        assert_eq!(
            join_relative(root, Path::new("a/b.txt")),
            PathBuf::from("/dest/a/b.txt")
        );
    }
}
