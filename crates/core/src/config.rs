use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::blood::MatchMode;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub routing: RoutingConfig,
    pub events: EventConfig,
    /// Optional YAML/JSON graph snapshot loaded at start-up.
    pub graph_seed: Option<PathBuf>,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LIFELINE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LIFELINE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            engine: EngineConfig::from_env_profiled(p),
            routing: RoutingConfig::from_env_profiled(p),
            events: EventConfig::from_env_profiled(p),
            graph_seed: profiled_env_opt(p, "GRAPH_SEED").map(PathBuf::from),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  engine:   tick={}s, cycle={}ms, attempts/cycle={}",
            self.engine.tick_interval_secs,
            self.engine.cycle_interval_ms,
            self.engine.max_attempts_per_cycle
        );
        tracing::info!(
            "  routing:  mode={:?}, max_visited={}, timeout={}ms, candidates={}, verified_only={}",
            self.routing.match_mode,
            self.routing.max_visited_nodes,
            self.routing.search_timeout_ms,
            self.routing.max_candidates,
            self.routing.require_verified_nodes
        );
        tracing::info!(
            "  events:   attempts={}, backoff={}ms",
            self.events.max_attempts,
            self.events.retry_backoff_ms
        );
        tracing::info!(
            "  seed:     {}",
            self.graph_seed
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 3080),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3080,
            cors_origin: "*".to_string(),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between wait-time refreshes of the whole queue.
    pub tick_interval_secs: u64,
    /// Milliseconds between allocation cycles.
    pub cycle_interval_ms: u64,
    /// Distinct requests popped per cycle at most.
    pub max_attempts_per_cycle: usize,
    /// Capacity of the command channel into the coordination task.
    pub command_buffer: usize,
    /// Override audit entries kept in memory.
    pub audit_max_entries: usize,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            tick_interval_secs: profiled_env_parse(p, "TICK_INTERVAL_SECS", d.tick_interval_secs),
            cycle_interval_ms: profiled_env_parse(p, "CYCLE_INTERVAL_MS", d.cycle_interval_ms),
            max_attempts_per_cycle: profiled_env_parse(
                p,
                "MAX_ATTEMPTS_PER_CYCLE",
                d.max_attempts_per_cycle,
            )
            .max(1),
            command_buffer: profiled_env_parse(p, "COMMAND_BUFFER", d.command_buffer).max(1),
            audit_max_entries: profiled_env_parse(p, "AUDIT_MAX_ENTRIES", d.audit_max_entries),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            cycle_interval_ms: 1000,
            max_attempts_per_cycle: 8,
            command_buffer: 1024,
            audit_max_entries: 500,
        }
    }
}

// ── Routing ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub match_mode: MatchMode,
    /// Settled-node budget per search.
    pub max_visited_nodes: usize,
    /// Wall-clock budget per search.
    pub search_timeout_ms: u64,
    /// Ranked candidates collected per search.
    pub max_candidates: usize,
    pub require_verified_nodes: bool,
    /// Routing pool size. 0 = available parallelism.
    pub worker_threads: usize,
}

impl RoutingConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            match_mode: profiled_env_opt(p, "MATCH_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.match_mode),
            max_visited_nodes: profiled_env_parse(p, "MAX_VISITED_NODES", d.max_visited_nodes),
            search_timeout_ms: profiled_env_parse(p, "SEARCH_TIMEOUT_MS", d.search_timeout_ms),
            max_candidates: profiled_env_parse(p, "MAX_CANDIDATES", d.max_candidates).max(1),
            require_verified_nodes: profiled_env_bool(
                p,
                "REQUIRE_VERIFIED_NODES",
                d.require_verified_nodes,
            ),
            worker_threads: profiled_env_parse(p, "ROUTING_WORKERS", d.worker_threads),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::Compatible,
            max_visited_nodes: 10_000,
            search_timeout_ms: 250,
            max_candidates: 5,
            require_verified_nodes: true,
            worker_threads: 0,
        }
    }
}

// ── Events ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub backlog_limit: usize,
}

impl EventConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_attempts: profiled_env_parse(p, "EVENT_MAX_ATTEMPTS", d.max_attempts).max(1),
            retry_backoff_ms: profiled_env_parse(p, "EVENT_RETRY_BACKOFF_MS", d.retry_backoff_ms),
            backlog_limit: profiled_env_parse(p, "EVENT_BACKLOG_LIMIT", d.backlog_limit),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 50,
            backlog_limit: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.profile_label(), "default");
        assert_eq!(config.engine.max_attempts_per_cycle, 8);
        assert_eq!(config.routing.match_mode, MatchMode::Compatible);
        assert!(config.routing.require_verified_nodes);
        assert!(config.graph_seed.is_none());
    }

    #[test]
    fn resolved_worker_threads() {
        let mut routing = RoutingConfig::default();
        assert!(routing.resolved_worker_threads() > 0);
        routing.worker_threads = 3;
        assert_eq!(routing.resolved_worker_threads(), 3);
    }

    #[test]
    fn profile_prefix_wins_over_plain_key() {
        // Unique key names keep this test independent of the process env.
        env::set_var("LLTEST_ROUTING_WORKERS", "7");
        let routing = RoutingConfig::from_env_profiled("LLTEST");
        assert_eq!(routing.worker_threads, 7);
        env::remove_var("LLTEST_ROUTING_WORKERS");
    }
}
