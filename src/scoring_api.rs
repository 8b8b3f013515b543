//! Scoring API layer: loads questions and forecasts, runs the pure engine and
//! persists every forecaster's score for a question in one transaction.

use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, PgPool};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::community::community_forecast;
use crate::config::ScoringConfig;
use crate::database;
use crate::db_adapter::DbAdapter;
use crate::display::{format_probability, format_score};
use crate::score_history::{
    rank_leaderboard, score_history, LeaderboardEntry, QuestionScore, ScoreHistory, ScoreSummary,
};
use crate::scoring_core::{score_question, ForecasterScore, Resolution};

// Configuration constants for concurrency control
const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_RETRY_DELAY_MS: u64 = 10;

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub resolution: Resolution,
}

#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ResolveResult {
    pub question_id: i32,
    pub resolution: Resolution,
    pub resolved_at: DateTime<Utc>,
    pub scores: Vec<ForecasterScore>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommunityView {
    pub question_id: i32,
    /// Hidden until enough forecasters have a standing forecast.
    pub probability: Option<f64>,
    pub display: Option<String>,
    pub forecaster_count: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SummaryDisplay {
    pub average_absolute: String,
    pub average_relative: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TrackRecord {
    pub user_id: i32,
    pub username: String,
    pub recent_window_days: i64,
    pub history: ScoreHistory,
    pub recent_display: Option<SummaryDisplay>,
    pub overall_display: Option<SummaryDisplay>,
}

/// Macro for executing transactions with SERIALIZABLE isolation and retry logic
macro_rules! with_serializable_tx {
    ($pool:expr, $tx_var:ident, $body:block) => {{
        let mut attempt = 1;
        loop {
            let mut $tx_var = $pool.begin().await?;

            // Set SERIALIZABLE isolation level
            $tx_var
                .execute(sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"))
                .await?;

            let result: Result<_> = async { $body }.await;

            match result {
                Ok(value) => {
                    $tx_var.commit().await?;
                    break Ok(value);
                }
                Err(e) => {
                    $tx_var.rollback().await.ok();

                    // Check if this is a serialization conflict that we should retry
                    let error_str = e.to_string().to_lowercase();
                    let is_retry_able = error_str.contains("serialization failure")
                        || error_str.contains("deadlock")
                        || error_str.contains("could not serialize");

                    if is_retry_able && attempt < MAX_RETRY_ATTEMPTS {
                        // Exponential backoff with jitter
                        let jitter = rand::thread_rng().gen_range(0..10);
                        let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1)) + jitter;
                        warn!("Retrying transaction (attempt {}) after {}ms: {}", attempt, delay_ms, e);
                        sleep(StdDuration::from_millis(delay_ms)).await;
                        attempt += 1;
                        continue;
                    } else {
                        break Err(e);
                    }
                }
            }
        }
    }};
}

/// Resolve a question and (re)write the QuestionScore rows of its whole cohort.
///
/// AMBIGUOUS resolutions and questions nobody forecast on are recorded but
/// leave no score rows behind.
pub async fn resolve_question(
    pool: &PgPool,
    config: &ScoringConfig,
    question_id: i32,
    resolution: Resolution,
    resolved_at: DateTime<Utc>,
) -> Result<ResolveResult> {
    let result = with_serializable_tx!(pool, tx, {
        resolve_question_transaction(&mut tx, config, question_id, resolution, resolved_at).await
    })?;

    info!(
        "✅ Resolved question {} as {} ({} forecasters scored)",
        question_id,
        resolution,
        result.scores.len()
    );
    Ok(result)
}

// Internal transaction logic extracted for concurrency control
async fn resolve_question_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    config: &ScoringConfig,
    question_id: i32,
    resolution: Resolution,
    resolved_at: DateTime<Utc>,
) -> Result<ResolveResult> {
    // Lock the question row so concurrent resolutions serialize
    let mut question = database::fetch_question_for_update(tx, question_id)
        .await?
        .ok_or_else(|| anyhow!("Question {} not found", question_id))?;
    question.resolution = Some(resolution);
    question.resolved_at = Some(resolved_at);

    DbAdapter::mark_question_resolved(tx, question_id, resolution, resolved_at).await?;

    let scores = if resolution.outcome().is_none() {
        debug!("Question {} is ambiguous, clearing scores", question_id);
        Vec::new()
    } else {
        let forecasts = database::fetch_question_forecasts(tx.as_mut(), question_id).await?;
        if forecasts.is_empty() {
            debug!("Question {} has no forecasts, nothing to score", question_id);
            Vec::new()
        } else {
            score_question(&question, &forecasts, config.score_resolution)?
        }
    };

    DbAdapter::replace_question_scores(tx, question_id, &scores, resolved_at).await?;

    Ok(ResolveResult {
        question_id,
        resolution,
        resolved_at,
        scores,
    })
}

pub async fn question_scores(pool: &PgPool, question_id: i32) -> Result<Vec<QuestionScore>> {
    database::fetch_question(pool, question_id)
        .await?
        .ok_or_else(|| anyhow!("Question {} not found", question_id))?;
    database::fetch_question_scores(pool, question_id).await
}

/// Community forecast for display; never persisted.
pub async fn community_view(
    pool: &PgPool,
    config: &ScoringConfig,
    question_id: i32,
    at: DateTime<Utc>,
) -> Result<CommunityView> {
    database::fetch_question(pool, question_id)
        .await?
        .ok_or_else(|| anyhow!("Question {} not found", question_id))?;
    let forecasts = database::fetch_question_forecasts(pool, question_id).await?;

    let community = community_forecast(&forecasts, at);
    let forecaster_count = community.map_or(0, |c| c.forecaster_count);
    let probability = community
        .filter(|c| c.forecaster_count >= config.community_min_forecasters)
        .map(|c| c.probability);

    Ok(CommunityView {
        question_id,
        probability,
        display: probability.map(format_probability),
        forecaster_count,
        at,
    })
}

fn summary_display(summary: &ScoreSummary) -> SummaryDisplay {
    SummaryDisplay {
        average_absolute: format_score(summary.average_absolute),
        average_relative: summary.average_relative.map(format_score),
    }
}

/// Recent and all-time summaries for one user; `None` if the user is unknown.
pub async fn track_record(
    pool: &PgPool,
    config: &ScoringConfig,
    user_id: i32,
    now: DateTime<Utc>,
) -> Result<Option<TrackRecord>> {
    let Some(username) = database::fetch_username(pool, user_id).await? else {
        return Ok(None);
    };

    let scores = database::fetch_user_scores(pool, user_id).await?;
    let history = score_history(&scores, now, Duration::days(config.recent_window_days));

    Ok(Some(TrackRecord {
        user_id,
        username,
        recent_window_days: config.recent_window_days,
        recent_display: history.recent.as_ref().map(summary_display),
        overall_display: history.overall.as_ref().map(summary_display),
        history,
    }))
}

pub async fn leaderboard(pool: &PgPool, config: &ScoringConfig) -> Result<Vec<LeaderboardEntry>> {
    let scores = database::fetch_all_scores(pool).await?;
    Ok(rank_leaderboard(&scores, config.leaderboard_limit))
}
