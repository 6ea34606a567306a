use chrono::NaiveTime;
use thiserror::Error;

use crate::data::{EntryId, StudioId};

/// Rejected input, caught at the boundary before any scheduling happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("time window {start} - {end} is empty, start must be before end")]
    EmptyWindow { start: NaiveTime, end: NaiveTime },

    #[error("opening time {opening} must be before closing time {closing}")]
    OpeningAfterClosing { opening: NaiveTime, closing: NaiveTime },

    #[error("peak hours {start} - {end} are inverted")]
    InvertedPeak { start: NaiveTime, end: NaiveTime },

    #[error("slot increment must be at least one minute")]
    ZeroIncrement,

    #[error("max concurrent classes must be at least 1")]
    ZeroConcurrency,

    #[error("minimum capacity {min} exceeds maximum capacity {max}")]
    CapacityRange { min: u32, max: u32 },

    #[error("class duration must be positive")]
    ZeroDuration,
}

/// Failures of the persistence collaborator. These are infrastructure
/// problems, never scheduling outcomes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown studio {0}")]
    UnknownStudio(StudioId),

    #[error("malformed seed data: {0}")]
    Seed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The old recurring entries were deleted but only part of the new
    /// schedule was written.
    #[error(
        "timetable only partly replaced: {removed} removed, {} of {planned} saved",
        .created.len()
    )]
    PartialReplace {
        removed: usize,
        created: Vec<EntryId>,
        planned: usize,
        source: StoreError,
    },
}
