//! Centralized default constants for the forum event core.
//!
//! Every crate and config struct references these constants instead of
//! defining its own magic numbers. Organized by domain area.

// =============================================================================
// DISPATCH
// =============================================================================

/// Idle wait between claim attempts when a subscription's queue is empty.
pub const BUS_POLL_INTERVAL_MS: u64 = 500;

/// Deliveries after which a message is dead-lettered instead of handled again.
pub const BUS_MAX_DELIVER: u32 = 10;

/// Delay before a failed message becomes visible to its group again.
pub const BUS_REDELIVER_DELAY_MS: u64 = 1000;

/// Capacity of the dispatcher's observability broadcast channel.
pub const BUS_EVENT_CAPACITY: usize = 256;

/// Ack wait used when a subscriber does not declare one.
pub const BUS_ACK_WAIT_SECS: u64 = 60;

/// Concurrency used when a subscriber does not declare one.
pub const BUS_CONCURRENT: usize = 1;

// =============================================================================
// SUBSCRIBERS
// =============================================================================

pub const AI_ANSWER_CONCURRENT: usize = 10;
pub const AI_ANSWER_ACK_WAIT_SECS: u64 = 300;

pub const RAG_INDEX_CONCURRENT: usize = 5;
pub const RAG_INDEX_ACK_WAIT_SECS: u64 = 120;

pub const SUMMARY_CONCURRENT: usize = 5;
pub const SUMMARY_ACK_WAIT_SECS: u64 = 300;

/// Stats and ranking writers run single-threaded to avoid write contention.
pub const TREND_CONCURRENT: usize = 1;
pub const TREND_ACK_WAIT_SECS: u64 = 30;

pub const WEBHOOK_CONCURRENT: usize = 2;
pub const WEBHOOK_ACK_WAIT_SECS: u64 = 60;

pub const CASCADE_CONCURRENT: usize = 1;
pub const CASCADE_ACK_WAIT_SECS: u64 = 120;

pub const POINTS_CONCURRENT: usize = 1;
pub const POINTS_ACK_WAIT_SECS: u64 = 60;

pub const NOTIFY_CONCURRENT: usize = 5;
pub const NOTIFY_ACK_WAIT_SECS: u64 = 60;

pub const ESCALATE_CONCURRENT: usize = 5;
pub const ESCALATE_ACK_WAIT_SECS: u64 = 120;

pub const KB_RAG_CONCURRENT: usize = 3;
pub const KB_RAG_ACK_WAIT_SECS: u64 = 120;

pub const LIVE_PUSH_CONCURRENT: usize = 20;
pub const LIVE_PUSH_ACK_WAIT_SECS: u64 = 10;

// =============================================================================
// POINTS
// =============================================================================

/// Maximum positive points a user can earn per UTC day.
pub const POINT_DAILY_CAP: i64 = 100;

/// Awarded to the author of an accepted answer.
pub const POINT_ANSWER_ACCEPTED: i64 = 15;

/// Awarded to the asker for accepting an answer.
pub const POINT_ACCEPT_ANSWER: i64 = 2;

/// Awarded to a comment author per like.
pub const POINT_ANSWER_LIKED: i64 = 10;

/// Applied to a comment author per dislike.
pub const POINT_ANSWER_DISLIKED: i64 = -2;

/// Running point totals never drop below this value.
pub const POINT_FLOOR: i64 = 1;

// =============================================================================
// BOT
// =============================================================================

/// Model response meaning "I don't know".
pub const BOT_DEFAULT_ANSWER: &str = "I don't know.";

/// Deliveries that may be deferred before an unknown answer is accepted.
pub const BOT_UNKNOWN_RETRY_THRESHOLD: u32 = 1;

// =============================================================================
// RAG
// =============================================================================

pub const RAG_FORUM_DATASET: &str = "forum";
pub const RAG_KB_DATASET: &str = "kb";

// =============================================================================
// WEBHOOK
// =============================================================================

/// Timeout for outbound webhook HTTP calls.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// LIVE PUSH
// =============================================================================

/// Per-user buffer of the live push hub.
pub const LIVE_PUSH_BUFFER: usize = 32;
