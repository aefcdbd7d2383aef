//! Protocol and client constants.
//!
//! Grouped by domain:
//!
//! - **Close codes**: WebSocket status codes the client produces or maps
//! - **Timeouts**: Network operation bounds
//! - **Reconnect**: Backoff schedule for replacing a closed connection
//! - **Defaults**: Values used when configuration is silent

use std::time::Duration;

// ============================================================================
// Close codes
// ============================================================================

/// Normal closure, sent on an explicit disconnect.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Reported by a peer close frame that carried no status.
pub const NO_STATUS_CLOSE_CODE: u16 = 1005;

/// Synthesized when the socket drops without a close handshake.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

// ============================================================================
// Timeouts
// ============================================================================

/// Bound on one REST request (chat lookup, message delete).
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pending calls older than this at hand-off are failed with
/// `ChatError::Expired` instead of being moved to the new connection.
///
/// A reply is only ever delivered on the socket that carried the request,
/// so a call this old will not be answered after a reconnect.
pub const PENDING_HANDOFF_TTL: Duration = Duration::from_secs(30);

// ============================================================================
// Reconnect
// ============================================================================

/// First reconnect delay. Doubles per failed attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Ceiling for the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound of the random jitter added to each delay, in milliseconds.
pub const BACKOFF_JITTER_MS: u64 = 1000;

// ============================================================================
// Defaults
// ============================================================================

/// REST base path for chat lookups.
pub const DEFAULT_BASE_PATH: &str = "https://mixer.com/api/v1/";

/// Runtime worker threads used by the CLI.
pub const DEFAULT_WORKER_THREADS: usize = 10;

/// `User-Agent` sent on REST requests and the WebSocket handshake.
pub const USER_AGENT: &str = concat!("mixer-chat/", env!("CARGO_PKG_VERSION"));
