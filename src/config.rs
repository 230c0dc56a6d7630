use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration, read once from the environment at startup.
///
/// Mirrors `BLV_*`/`pyleanrepl`-style env vars from the system this worker
/// is modeled after, renamed to the plain names in the wire contract.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory containing the REPL build artifact.
    pub repl_path: PathBuf,
    /// Working directory for REPL subprocesses.
    pub project_path: PathBuf,
    /// Default import statements, applied to environment 0 on worker boot.
    pub imports: Vec<String>,
    /// Non-zero: recycle (tear down and rebuild) the cache after this many
    /// completed jobs. Zero disables recycling.
    pub max_jobs: u64,
    /// Capacity K of the header-environment cache.
    pub cache_capacity: usize,
    /// Host the REPL TCP listener binds/connects on.
    pub repl_host: String,
    /// Ceiling on how long to wait for the REPL's TCP listener to come up.
    pub repl_connect_timeout: Duration,
    /// Ceiling on how long to wait for one complete JSON reply.
    pub repl_read_deadline: Duration,
    /// Redis connection string backing the job broker.
    pub redis_url: String,
    /// Namespace for the broker's queue keys.
    pub jobs_queue: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repl_path: PathBuf::from("/repl"),
            project_path: PathBuf::from("/repl"),
            imports: vec!["import Mathlib".to_string(), "import Aesop".to_string()],
            max_jobs: 0,
            cache_capacity: 3,
            repl_host: "localhost".to_string(),
            repl_connect_timeout: Duration::from_secs(30),
            repl_read_deadline: Duration::from_secs(30),
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            jobs_queue: "lean_verify".to_string(),
        }
    }
}

impl Config {
    /// Build a `Config` from the environment, falling back to defaults for
    /// anything unset or unparsable. Read once; nothing below this point
    /// consults the environment again.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let repl_path = std::env::var("REPL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.repl_path);
        let project_path = std::env::var("PROJECT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| repl_path.clone());
        let imports = std::env::var("IMPORTS")
            .ok()
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or(defaults.imports);
        let max_jobs = std::env::var("MAX_JOBS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_jobs);
        let cache_capacity = std::env::var("CACHE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cache_capacity);
        let repl_host = std::env::var("REPL_HOST").unwrap_or(defaults.repl_host);
        let repl_connect_timeout = std::env::var("REPL_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.repl_connect_timeout);
        let repl_read_deadline = std::env::var("REPL_READ_DEADLINE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.repl_read_deadline);
        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let jobs_queue = std::env::var("JOBS_QUEUE").unwrap_or(defaults.jobs_queue);

        Self {
            repl_path,
            project_path,
            imports,
            max_jobs,
            cache_capacity,
            repl_host,
            repl_connect_timeout,
            repl_read_deadline,
            redis_url,
            jobs_queue,
        }
    }
}
