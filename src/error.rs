//! Error types for the scoring engine.
//!
//! Every variant is a precondition violation on the caller's input. Nothing
//! here is transient, so nothing here is worth retrying.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("question has no resolution")]
    MissingResolution,

    #[error("question resolved as {0}, which cannot be scored")]
    UnscoreableResolution(String),

    #[error("question has no resolution timestamp")]
    MissingResolvedAt,

    #[error("resolved_at {resolved_at} must be after created_at {created_at}")]
    InvalidWindow {
        created_at: DateTime<Utc>,
        resolved_at: DateTime<Utc>,
    },

    #[error("question has no forecasts")]
    NoForecasts,

    #[error("score resolution must be at least 2, got {0}")]
    InvalidSampleCount(usize),

    #[error("forecast by {forecaster_id} has probability {probability} outside [0, 1]")]
    InvalidProbability { forecaster_id: i32, probability: f64 },
}

pub type ScoringResult<T> = Result<T, ScoringError>;
