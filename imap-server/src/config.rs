use std::time::Duration;

/// Bind-independent server tunables (spec.md's ambient "Config surface"
/// addition, grounded on `aero_user::config::ImapConfig` as referenced
/// from `aero-proto/src/imap/mod.rs` — loading this from a file is an
/// external collaborator per spec.md §1, so this struct only carries
/// the values the dispatcher and connection need at runtime).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sent as the greeting's human-readable text.
    pub server_name: String,
    /// How often an idling connection polls its tracker for updates
    /// in the absence of a wakeup (a `Notify` normally fires sooner).
    pub idle_poll_interval: Duration,
    /// Bound on outstanding pipelined commands before the connection
    /// is dropped for sending too fast (mirrors `aero-proto`'s
    /// `PIPELINABLE_COMMANDS`).
    pub max_pipelined_commands: usize,
    pub allow_starttls: bool,
    /// Forbid plaintext `LOGIN` (advertises `LOGINDISABLED`) until TLS
    /// is active.
    pub login_disabled_on_plaintext: bool,
    /// Maximum literal size accepted, guarding against unbounded
    /// allocation from a hostile `{N}` header.
    pub max_literal_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "imap-server".to_string(),
            idle_poll_interval: Duration::from_secs(30),
            max_pipelined_commands: 64,
            allow_starttls: true,
            login_disabled_on_plaintext: true,
            max_literal_size: 64 * 1024 * 1024,
        }
    }
}
