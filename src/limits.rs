use crate::model::Ms;

pub const MAX_ENGINEERS: usize = 10_000;
pub const MAX_TASKS_PER_ENGINEER: usize = 10_000;
pub const MAX_UNASSIGNED_TASKS: usize = 100_000;
pub const MAX_ID_LEN: usize = 128;
pub const MAX_TEXT_LEN: usize = 4096;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Attempts to lock a task's engineers before giving up on a task that keeps moving.
pub const MAX_LOCK_RETRIES: usize = 8;
