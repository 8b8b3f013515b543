//! Track-record aggregation over persisted per-question scores.
//!
//! Relative averages divide by every row in the subset, including rows from
//! questions the forecaster scored alone (which carry no relative score).
//! That keeps the same fixed-denominator convention the engine uses.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::scoring_core::ForecasterId;

/// One persisted score row: a forecaster's result on one resolved question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuestionScore {
    pub forecaster_id: ForecasterId,
    pub question_id: i32,
    pub absolute_score: f64,
    pub relative_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScoreSummary {
    pub average_absolute: f64,
    /// `None` when no row in the subset has a relative score.
    pub average_relative: Option<f64>,
    pub question_count: usize,
}

/// Empty subsets are `None` and must not be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScoreHistory {
    pub recent: Option<ScoreSummary>,
    pub overall: Option<ScoreSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LeaderboardEntry {
    pub forecaster_id: ForecasterId,
    pub overall: ScoreSummary,
}

pub fn summarize<'a, I>(scores: I) -> Option<ScoreSummary>
where
    I: IntoIterator<Item = &'a QuestionScore>,
{
    let mut count = 0usize;
    let mut absolute_sum = 0.0;
    let mut relative_sum = 0.0;
    let mut has_relative = false;

    for score in scores {
        count += 1;
        absolute_sum += score.absolute_score;
        if let Some(relative) = score.relative_score {
            relative_sum += relative;
            has_relative = true;
        }
    }

    if count == 0 {
        return None;
    }

    Some(ScoreSummary {
        average_absolute: absolute_sum / count as f64,
        average_relative: has_relative.then(|| relative_sum / count as f64),
        question_count: count,
    })
}

/// Recent (scored within `recent_window` of `now`) and all-time summaries.
pub fn score_history(
    scores: &[QuestionScore],
    now: DateTime<Utc>,
    recent_window: Duration,
) -> ScoreHistory {
    let cutoff = now - recent_window;
    ScoreHistory {
        recent: summarize(scores.iter().filter(|score| score.created_at >= cutoff)),
        overall: summarize(scores),
    }
}

/// Lower relative score ranks first; forecasters without one sort last.
fn leaderboard_order(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    match (a.overall.average_relative, b.overall.average_relative) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.overall.average_absolute.total_cmp(&b.overall.average_absolute))
    .then_with(|| a.forecaster_id.cmp(&b.forecaster_id))
}

/// Rank forecasters by their all-time summary, keeping at most `limit` entries.
pub fn rank_leaderboard(scores: &[QuestionScore], limit: usize) -> Vec<LeaderboardEntry> {
    let mut by_forecaster: BTreeMap<ForecasterId, Vec<&QuestionScore>> = BTreeMap::new();
    for score in scores {
        by_forecaster.entry(score.forecaster_id).or_default().push(score);
    }

    let mut entries: Vec<LeaderboardEntry> = by_forecaster
        .into_iter()
        .filter_map(|(forecaster_id, rows)| {
            summarize(rows).map(|overall| LeaderboardEntry {
                forecaster_id,
                overall,
            })
        })
        .collect();

    entries.sort_by(leaderboard_order);
    entries.truncate(limit);
    entries
}
