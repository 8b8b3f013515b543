//! Forecast Scoring Engine Library
//!
//! This library scores resolved yes/no questions: doubled Brier scores sampled
//! over each question's lifetime, relative to the cohort median, plus the
//! community forecast and track-record aggregates built on top of them.

// Re-export modules for use in binaries
pub mod community;
pub mod config;
pub mod database;
pub mod db_adapter;
pub mod display;
pub mod error;
pub mod score_history;
pub mod scoring_api;
pub mod scoring_core;
pub mod stress;
