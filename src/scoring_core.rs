//! src/scoring_core.rs
//! Pure scoring core: doubled Brier score, median with a defined tie-break,
//! time sampling over a question's lifetime and relative-to-cohort scoring.
//!
//! Nothing in here touches I/O or shared state. Every call builds its own
//! accumulators and drops them on return, so callers may score different
//! questions concurrently without coordination.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{ScoringError, ScoringResult};

/// Number of sample instants a question is split into unless configured otherwise.
pub const DEFAULT_SCORE_RESOLUTION: usize = 101;

pub type ForecasterId = i32;

/// Final outcome of a question as recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum Resolution {
    Yes,
    No,
    Ambiguous,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Yes => "YES",
            Resolution::No => "NO",
            Resolution::Ambiguous => "AMBIGUOUS",
        }
    }

    /// The scoreable outcome, if any. Ambiguous questions are never scored.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Resolution::Yes => Some(Outcome::Yes),
            Resolution::No => Some(Outcome::No),
            Resolution::Ambiguous => None,
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Parse from string (API boundary conversion)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YES" => Ok(Resolution::Yes),
            "NO" => Ok(Resolution::No),
            "AMBIGUOUS" => Ok(Resolution::Ambiguous),
            _ => Err(format!(
                "Invalid resolution: '{}', expected 'YES', 'NO' or 'AMBIGUOUS'",
                s
            )),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary outcome a forecast is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    #[inline]
    pub fn target(&self) -> f64 {
        match self {
            Outcome::Yes => 1.0,
            Outcome::No => 0.0,
        }
    }
}

/// One probability estimate by one forecaster on one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub forecaster_id: ForecasterId,
    pub probability: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
}

/// The validated part of a question that scoring needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWindow {
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl Question {
    /// Check the scoring preconditions and extract the window to sample over.
    pub fn scoring_window(&self) -> ScoringResult<ScoringWindow> {
        let resolution = self.resolution.ok_or(ScoringError::MissingResolution)?;
        let outcome = resolution
            .outcome()
            .ok_or_else(|| ScoringError::UnscoreableResolution(resolution.to_string()))?;
        let resolved_at = self.resolved_at.ok_or(ScoringError::MissingResolvedAt)?;

        if resolved_at <= self.created_at {
            return Err(ScoringError::InvalidWindow {
                created_at: self.created_at,
                resolved_at,
            });
        }

        Ok(ScoringWindow {
            opened_at: self.created_at,
            closed_at: resolved_at,
            outcome,
        })
    }
}

/// Engine output for one forecaster on one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ForecasterScore {
    pub forecaster_id: ForecasterId,
    /// Average Brier score over every sampled instant.
    pub absolute_score: f64,
    /// Average gap to the cohort median; `None` for a lone forecaster.
    pub relative_score: Option<f64>,
    /// Sample instants at which this forecaster had a standing forecast.
    pub scored_instants: usize,
}

// -----------------------
// Leaf functions
// -----------------------

/// Two-category Brier score, i.e. twice the single-category convention.
///
/// Ranges over [0, 2]: 0 for a certain and correct forecast, 0.5 for a coin
/// flip, 2 for a certain and wrong one.
#[inline]
pub fn brier_score(probability: f64, outcome: Outcome) -> f64 {
    let target = outcome.target();
    (probability - target).powi(2) + ((1.0 - probability) - (1.0 - target)).powi(2)
}

/// Median of `values`; mean of the two middle values for even lengths.
///
/// An empty slice yields 0.0. That value carries no meaning and callers
/// should not rely on it.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Evenly spaced instants from `opened_at` up to, but excluding, `closed_at`.
///
/// The step is `(closed_at - opened_at) / sample_count` in milliseconds and is
/// accumulated as a float on the epoch-millisecond clock; only the emitted
/// instants are truncated to whole milliseconds. The first step is skipped so
/// nobody is scored at the moment the question opens. Roughly `sample_count - 1`
/// instants come back, one more when accumulated rounding lands the last step
/// just short of the close. Windows shorter than `sample_count` milliseconds
/// produce repeated instants.
pub fn sample_instants(
    opened_at: DateTime<Utc>,
    closed_at: DateTime<Utc>,
    sample_count: usize,
) -> ScoringResult<Vec<DateTime<Utc>>> {
    if sample_count < 2 {
        return Err(ScoringError::InvalidSampleCount(sample_count));
    }
    if closed_at <= opened_at {
        return Err(ScoringError::InvalidWindow {
            created_at: opened_at,
            resolved_at: closed_at,
        });
    }

    let open_ms = opened_at.timestamp_millis() as f64;
    let close_ms = closed_at.timestamp_millis() as f64;
    let interval = (close_ms - open_ms) / sample_count as f64;

    let mut instants = Vec::with_capacity(sample_count);
    let mut t = open_ms + interval;
    while t < close_ms {
        let instant = DateTime::<Utc>::from_timestamp_millis(t as i64).ok_or(
            ScoringError::InvalidWindow {
                created_at: opened_at,
                resolved_at: closed_at,
            },
        )?;
        instants.push(instant);
        t += interval;
    }

    Ok(instants)
}

/// A forecaster's standing forecast at `at`: the latest one made at or before it.
///
/// Forecasts sharing the latest timestamp resolve to the one listed last.
pub fn standing_forecast(forecasts: &[Forecast], at: DateTime<Utc>) -> Option<&Forecast> {
    forecasts
        .iter()
        .filter(|forecast| forecast.created_at <= at)
        .max_by_key(|forecast| forecast.created_at)
}

// -----------------------
// Relative scoring
// -----------------------

/// One forecaster's history sorted by time, walked forward as instants advance.
struct Timeline<'a> {
    forecaster_id: ForecasterId,
    forecasts: Vec<&'a Forecast>,
    cursor: usize,
}

impl<'a> Timeline<'a> {
    fn new(forecaster_id: ForecasterId) -> Self {
        Self {
            forecaster_id,
            forecasts: Vec::new(),
            cursor: 0,
        }
    }

    /// Same answer as [`standing_forecast`], for non-decreasing `at`.
    fn standing_at(&mut self, at: DateTime<Utc>) -> Option<&'a Forecast> {
        while self.cursor < self.forecasts.len() && self.forecasts[self.cursor].created_at <= at {
            self.cursor += 1;
        }
        self.cursor.checked_sub(1).map(|index| self.forecasts[index])
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }
}

fn validate_forecasts(forecasts: &[Forecast]) -> ScoringResult<()> {
    if forecasts.is_empty() {
        return Err(ScoringError::NoForecasts);
    }
    for forecast in forecasts {
        if !forecast.probability.is_finite() || !(0.0..=1.0).contains(&forecast.probability) {
            return Err(ScoringError::InvalidProbability {
                forecaster_id: forecast.forecaster_id,
                probability: forecast.probability,
            });
        }
    }
    Ok(())
}

/// Group forecasts into per-forecaster timelines, in order of first appearance.
fn build_timelines(forecasts: &[Forecast]) -> Vec<Timeline<'_>> {
    let mut index: HashMap<ForecasterId, usize> = HashMap::new();
    let mut timelines: Vec<Timeline<'_>> = Vec::new();

    for forecast in forecasts {
        let slot = *index.entry(forecast.forecaster_id).or_insert_with(|| {
            timelines.push(Timeline::new(forecast.forecaster_id));
            timelines.len() - 1
        });
        timelines[slot].forecasts.push(forecast);
    }

    // Stable sort keeps input order among equal timestamps, so the last one wins.
    for timeline in &mut timelines {
        timeline.forecasts.sort_by_key(|forecast| forecast.created_at);
    }

    timelines
}

/// Score every forecaster on a resolved question.
///
/// Absolute scores average the Brier score over every sampled instant,
/// counting instants without a standing forecast as empty. With two or more
/// forecasters, each instant also contributes `score - cohort median` for
/// everyone with a standing forecast; that sum is divided by the fixed
/// `sample_count - 1`, not by the number of instants the forecaster was
/// present for, so late or sparse forecasters are pulled towards zero.
pub fn score_question(
    question: &Question,
    forecasts: &[Forecast],
    sample_count: usize,
) -> ScoringResult<Vec<ForecasterScore>> {
    let window = question.scoring_window()?;
    validate_forecasts(forecasts)?;
    let instants = sample_instants(window.opened_at, window.closed_at, sample_count)?;

    let mut timelines = build_timelines(forecasts);
    let cohort_size = timelines.len();
    let mut absolute = vec![Accumulator::default(); cohort_size];
    let mut relative = vec![Accumulator::default(); cohort_size];

    let mut instant_scores: Vec<Option<f64>> = Vec::with_capacity(cohort_size);
    let mut present: Vec<f64> = Vec::with_capacity(cohort_size);

    for &instant in &instants {
        instant_scores.clear();
        instant_scores.extend(timelines.iter_mut().map(|timeline| {
            timeline
                .standing_at(instant)
                .map(|forecast| brier_score(forecast.probability, window.outcome))
        }));

        for (acc, score) in absolute.iter_mut().zip(&instant_scores) {
            if let Some(score) = score {
                acc.add(*score);
            }
        }

        if cohort_size < 2 {
            continue;
        }

        present.clear();
        present.extend(instant_scores.iter().flatten().copied());
        if present.is_empty() {
            continue;
        }
        let cohort_median = median(&present);

        for (acc, score) in relative.iter_mut().zip(&instant_scores) {
            if let Some(score) = score {
                acc.add(score - cohort_median);
            }
        }
    }

    let sampled = instants.len().max(1) as f64;
    let denominator = (sample_count - 1) as f64;

    let scores = timelines
        .iter()
        .zip(absolute.iter().zip(&relative))
        .map(|(timeline, (abs, rel))| ForecasterScore {
            forecaster_id: timeline.forecaster_id,
            absolute_score: abs.sum / sampled,
            relative_score: (cohort_size > 1).then(|| rel.sum / denominator),
            scored_instants: abs.count,
        })
        .collect();

    Ok(scores)
}

/// One `(forecaster, score)` pair per forecaster.
///
/// The score is the average relative score, except for a lone forecaster
/// where no peer exists and their absolute score is reported instead.
pub fn relative_scores(
    question: &Question,
    forecasts: &[Forecast],
    sample_count: usize,
) -> ScoringResult<Vec<(ForecasterId, f64)>> {
    Ok(score_question(question, forecasts, sample_count)?
        .into_iter()
        .map(|score| {
            (
                score.forecaster_id,
                score.relative_score.unwrap_or(score.absolute_score),
            )
        })
        .collect())
}

// -----------------------
// Tests
// -----------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn forecast(forecaster_id: ForecasterId, probability: f64, at: i64) -> Forecast {
        Forecast {
            forecaster_id,
            probability,
            created_at: day(at),
        }
    }

    fn resolved(resolution: Resolution) -> Question {
        Question {
            id: 1,
            created_at: day(0),
            resolved_at: Some(day(8)),
            resolution: Some(resolution),
        }
    }

    proptest! {
        #[test]
        fn brier_is_twice_squared_error(p in 0.0f64..=1.0) {
            let yes = brier_score(p, Outcome::Yes);
            let no = brier_score(p, Outcome::No);
            prop_assert!((yes - 2.0 * (p - 1.0).powi(2)).abs() < 1e-12);
            prop_assert!((no - 2.0 * p.powi(2)).abs() < 1e-12);
            prop_assert!((0.0..=2.0).contains(&yes));
        }

        #[test]
        fn median_ignores_input_order(mut values in prop::collection::vec(-2.0f64..2.0, 1..40)) {
            let before = median(&values);
            values.reverse();
            prop_assert_eq!(before, median(&values));
        }
    }

    #[test]
    fn brier_fixed_points() {
        assert_eq!(brier_score(0.0, Outcome::Yes), 2.0);
        assert_eq!(brier_score(1.0, Outcome::Yes), 0.0);
        assert_eq!(brier_score(0.5, Outcome::Yes), 0.5);
        assert_eq!(brier_score(0.5, Outcome::No), 0.5);
        assert_eq!(brier_score(1.0, Outcome::No), 2.0);
    }

    #[test]
    fn median_tie_break() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[0.7]), 0.7);
        assert_eq!(median(&[0.2, 0.6]), 0.4);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn sampler_skips_first_interval() {
        let instants = sample_instants(day(0), day(8), 8).unwrap();
        assert_eq!(instants, (1..=7).map(day).collect::<Vec<_>>());
    }

    /// Plain float stepping on the epoch-millisecond clock.
    fn reference_offsets(open_ms: i64, span_ms: i64, sample_count: usize) -> Vec<i64> {
        let close = (open_ms + span_ms) as f64;
        let interval = span_ms as f64 / sample_count as f64;
        let mut offsets = Vec::new();
        let mut t = open_ms as f64 + interval;
        while t < close {
            offsets.push(t as i64 - open_ms);
            t += interval;
        }
        offsets
    }

    proptest! {
        #[test]
        fn sampler_matches_float_stepping(
            open_days in 0i64..3650,
            span_ms in 1i64..400 * 86_400_000,
        ) {
            let opened_at = day(open_days);
            let closed_at = opened_at + Duration::milliseconds(span_ms);
            let instants = sample_instants(opened_at, closed_at, DEFAULT_SCORE_RESOLUTION).unwrap();
            let offsets: Vec<_> = instants
                .iter()
                .map(|at| (*at - opened_at).num_milliseconds())
                .collect();
            prop_assert_eq!(
                offsets,
                reference_offsets(opened_at.timestamp_millis(), span_ms, DEFAULT_SCORE_RESOLUTION)
            );
        }
    }

    #[test]
    fn sampler_steps_by_fractional_interval() {
        // 1000ms / 3: 333.33 and 666.67 land on 333 and 666, and the third
        // step rounds to just under the close.
        let close = day(0) + Duration::milliseconds(1000);
        let instants = sample_instants(day(0), close, 3).unwrap();
        let offsets: Vec<_> = instants
            .iter()
            .map(|at| (*at - day(0)).num_milliseconds())
            .collect();
        assert_eq!(offsets, vec![333, 666, 999]);

        let instants = sample_instants(day(0), day(30), DEFAULT_SCORE_RESOLUTION).unwrap();
        assert_eq!(instants.len(), DEFAULT_SCORE_RESOLUTION - 1);
        assert!(instants.iter().all(|at| *at > day(0) && *at < day(30)));
        assert!(instants.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn sampler_accepts_windows_shorter_than_sample_count() {
        let close = day(0) + Duration::milliseconds(50);
        let instants = sample_instants(day(0), close, DEFAULT_SCORE_RESOLUTION).unwrap();
        assert_eq!(instants.len(), DEFAULT_SCORE_RESOLUTION - 1);
        assert_eq!(instants[0], day(0));
        assert!(instants.iter().all(|at| *at >= day(0) && *at < close));
        assert!(instants.windows(2).all(|pair| pair[0] <= pair[1]));

        let question = Question {
            id: 1,
            created_at: day(0),
            resolved_at: Some(close),
            resolution: Some(Resolution::Yes),
        };
        let forecasts = vec![
            Forecast {
                forecaster_id: 1,
                probability: 0.8,
                created_at: day(0),
            },
            Forecast {
                forecaster_id: 2,
                probability: 0.4,
                created_at: day(0),
            },
        ];
        let scores = score_question(&question, &forecasts, DEFAULT_SCORE_RESOLUTION).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|score| score.scored_instants == 100));
    }

    #[test]
    fn sampler_rejects_bad_input() {
        assert_eq!(
            sample_instants(day(0), day(1), 1),
            Err(ScoringError::InvalidSampleCount(1))
        );
        assert!(sample_instants(day(1), day(1), 8).is_err());
        assert!(sample_instants(day(2), day(1), 8).is_err());
    }

    #[test]
    fn standing_forecast_picks_latest_at_or_before() {
        let history = vec![forecast(1, 0.4, 3), forecast(1, 0.2, 1), forecast(1, 0.9, 5)];
        assert_eq!(standing_forecast(&history, day(0)), None);
        assert_eq!(standing_forecast(&history, day(1)).unwrap().probability, 0.2);
        assert_eq!(standing_forecast(&history, day(4)).unwrap().probability, 0.4);
        assert_eq!(standing_forecast(&history, day(9)).unwrap().probability, 0.9);
    }

    #[test]
    fn timeline_matches_standing_forecast() {
        let history = vec![
            forecast(1, 0.4, 3),
            forecast(1, 0.2, 1),
            forecast(1, 0.6, 3),
            forecast(1, 0.9, 5),
        ];
        let mut timelines = build_timelines(&history);
        assert_eq!(timelines.len(), 1);
        for n in 0..8 {
            let expected = standing_forecast(&history, day(n)).map(|f| f.probability);
            let walked = timelines[0].standing_at(day(n)).map(|f| f.probability);
            assert_eq!(expected, walked, "day {}", n);
        }
    }

    #[test]
    fn preconditions_fail_fast() {
        let forecasts = vec![forecast(1, 0.5, 1)];

        let mut question = resolved(Resolution::Yes);
        question.resolution = None;
        assert_eq!(
            score_question(&question, &forecasts, 8),
            Err(ScoringError::MissingResolution)
        );

        let question = resolved(Resolution::Ambiguous);
        assert!(matches!(
            score_question(&question, &forecasts, 8),
            Err(ScoringError::UnscoreableResolution(_))
        ));

        let mut question = resolved(Resolution::No);
        question.resolved_at = Some(day(0));
        assert!(matches!(
            score_question(&question, &forecasts, 8),
            Err(ScoringError::InvalidWindow { .. })
        ));

        let question = resolved(Resolution::No);
        assert_eq!(score_question(&question, &[], 8), Err(ScoringError::NoForecasts));

        let bad = vec![forecast(7, 1.5, 1)];
        assert!(matches!(
            score_question(&question, &bad, 8),
            Err(ScoringError::InvalidProbability { forecaster_id: 7, .. })
        ));
    }

    #[test]
    fn lone_forecaster_gets_absolute_score() {
        let question = resolved(Resolution::Yes);
        let forecasts = vec![forecast(1, 0.90, 1), forecast(1, 0.95, 4)];

        let scores = score_question(&question, &forecasts, 8).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].relative_score, None);
        assert_eq!(scores[0].scored_instants, 7);
        assert!((scores[0].absolute_score - 0.0114).abs() < 1e-4);

        let pairs = relative_scores(&question, &forecasts, 8).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, 1);
        assert!((pairs[0].1 - scores[0].absolute_score).abs() < 1e-12);
    }

    #[test]
    fn absent_instants_still_count_in_denominator() {
        let question = resolved(Resolution::No);
        // Present only at days 6 and 7 of seven sampled instants.
        let forecasts = vec![forecast(1, 0.5, 6)];
        let scores = score_question(&question, &forecasts, 8).unwrap();
        assert_eq!(scores[0].scored_instants, 2);
        assert!((scores[0].absolute_score - 2.0 * 0.5 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn identical_forecasters_score_zero_relative() {
        let question = resolved(Resolution::Yes);
        let forecasts = vec![forecast(1, 0.3, 1), forecast(2, 0.3, 1), forecast(3, 0.3, 1)];
        for score in score_question(&question, &forecasts, 8).unwrap() {
            assert_eq!(score.relative_score, Some(0.0));
        }
    }

    #[test]
    fn output_follows_first_appearance() {
        let question = resolved(Resolution::Yes);
        let forecasts = vec![forecast(9, 0.3, 2), forecast(4, 0.6, 1), forecast(9, 0.4, 3)];
        let ids: Vec<_> = score_question(&question, &forecasts, 8)
            .unwrap()
            .into_iter()
            .map(|score| score.forecaster_id)
            .collect();
        assert_eq!(ids, vec![9, 4]);
    }

    #[test]
    fn resolution_parses_case_insensitively() {
        assert_eq!("yes".parse::<Resolution>(), Ok(Resolution::Yes));
        assert_eq!("No".parse::<Resolution>(), Ok(Resolution::No));
        assert_eq!("AMBIGUOUS".parse::<Resolution>(), Ok(Resolution::Ambiguous));
        assert!("maybe".parse::<Resolution>().is_err());
        assert_eq!(Resolution::Yes.outcome(), Some(Outcome::Yes));
        assert_eq!(Resolution::Ambiguous.outcome(), None);
    }
}
