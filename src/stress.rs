//! Stress tests for the forecast scoring engine
//!
//! This module checks:
//! 1. **Correctness**: every score is finite and inside its theoretical range
//! 2. **Performance**: questions scored per second under parallel load
//! 3. **Consensus**: community forecasts stay strictly inside (0, 1)
//!
//! Questions are synthetic and generated in memory; no database is needed.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::env;
use std::time::Instant;
use tracing::{error, info};

use crate::community::community_forecast;
use crate::config::Config;
use crate::scoring_core::{score_question, Forecast, ForecasterScore, Question, Resolution};

// Simulation Parameters (defaults; override via STRESS_* env vars)
const NUM_QUESTIONS: usize = 2_000;
const MAX_FORECASTERS: usize = 40;
const MAX_FORECASTS_PER_FORECASTER: usize = 6;
const MAX_LIFETIME_DAYS: i64 = 365;
const SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub num_questions: usize,
    pub max_forecasters: usize,
    pub max_forecasts_per_forecaster: usize,
    pub seed: u64,
}

impl StressConfig {
    pub fn from_env() -> Self {
        Self {
            num_questions: env_usize("STRESS_NUM_QUESTIONS", NUM_QUESTIONS),
            max_forecasters: env_usize("STRESS_MAX_FORECASTERS", MAX_FORECASTERS),
            max_forecasts_per_forecaster: env_usize(
                "STRESS_MAX_FORECASTS_PER_FORECASTER",
                MAX_FORECASTS_PER_FORECASTER,
            ),
            seed: env::var("STRESS_SEED")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(SEED),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// A synthetic resolved question with its forecasts.
#[derive(Debug, Clone)]
pub struct SyntheticQuestion {
    pub question: Question,
    pub forecasts: Vec<Forecast>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StressReport {
    pub questions_scored: usize,
    pub forecaster_scores: usize,
    pub community_checks: usize,
    pub violations: Vec<String>,
}

/// Forecasters lean towards the truth by a random skill factor, so relative
/// scores spread out the way they do on a real question.
pub fn generate_question(rng: &mut StdRng, id: i32, stress: &StressConfig) -> SyntheticQuestion {
    // 2024-01-01T00:00:00Z
    let epoch = DateTime::<Utc>::default() + Duration::days(19_723);
    let created_at = epoch + Duration::minutes(rng.gen_range(0..525_600));
    let lifetime = Duration::minutes(rng.gen_range(60..MAX_LIFETIME_DAYS * 24 * 60));
    let resolved_at = created_at + lifetime;
    let resolves_yes = rng.gen_bool(0.5);

    let num_forecasters = rng.gen_range(1..=stress.max_forecasters);
    let mut forecasts = Vec::new();
    for forecaster_id in 0..num_forecasters as i32 {
        let skill: f64 = rng.gen_range(0.0..1.0);
        let count = rng.gen_range(1..=stress.max_forecasts_per_forecaster);
        for _ in 0..count {
            let offset = rng.gen_range(0..lifetime.num_minutes());
            let noise: f64 = rng.gen_range(0.0..1.0);
            let lean = if resolves_yes { 1.0 } else { 0.0 };
            // Snap to the two-decimal grid forecasts are entered on
            let probability = ((skill * lean + (1.0 - skill) * noise) * 100.0).round() / 100.0;
            forecasts.push(Forecast {
                forecaster_id,
                probability,
                created_at: created_at + Duration::minutes(offset),
            });
        }
    }
    forecasts.shuffle(rng);

    SyntheticQuestion {
        question: Question {
            id,
            created_at,
            resolved_at: Some(resolved_at),
            resolution: Some(if resolves_yes { Resolution::Yes } else { Resolution::No }),
        },
        forecasts,
    }
}

fn check_scores(id: i32, scores: &[ForecasterScore], violations: &mut Vec<String>) {
    for score in scores {
        if !score.absolute_score.is_finite() || !(0.0..=2.0).contains(&score.absolute_score) {
            violations.push(format!(
                "question {}: absolute score {} for forecaster {} out of range",
                id, score.absolute_score, score.forecaster_id
            ));
        }
        if let Some(relative) = score.relative_score {
            if !relative.is_finite() || relative.abs() > 2.0 {
                violations.push(format!(
                    "question {}: relative score {} for forecaster {} out of range",
                    id, relative, score.forecaster_id
                ));
            }
        }
    }
    if scores.len() == 1 && scores[0].relative_score.is_some() {
        violations.push(format!("question {}: lone forecaster got a relative score", id));
    }
}

fn check_question(synthetic: &SyntheticQuestion, score_resolution: usize) -> Result<StressReport> {
    let question = &synthetic.question;
    let scores = score_question(question, &synthetic.forecasts, score_resolution)
        .map_err(|e| anyhow!("question {}: {}", question.id, e))?;

    let mut report = StressReport {
        questions_scored: 1,
        forecaster_scores: scores.len(),
        ..StressReport::default()
    };
    check_scores(question.id, &scores, &mut report.violations);

    let closes_at: DateTime<Utc> = question.resolved_at.unwrap_or(question.created_at);
    if let Some(community) = community_forecast(&synthetic.forecasts, closes_at) {
        report.community_checks += 1;
        if !(community.probability > 0.0 && community.probability < 1.0) {
            report.violations.push(format!(
                "question {}: community forecast {} outside (0, 1)",
                question.id, community.probability
            ));
        }
    }

    Ok(report)
}

fn merge(mut a: StressReport, b: StressReport) -> StressReport {
    a.questions_scored += b.questions_scored;
    a.forecaster_scores += b.forecaster_scores;
    a.community_checks += b.community_checks;
    a.violations.extend(b.violations);
    a
}

/// Generate, score and verify `stress.num_questions` questions in parallel.
pub fn run_stress_test(config: &Config, stress: &StressConfig) -> Result<StressReport> {
    info!(
        "Generating {} synthetic questions (seed {})...",
        stress.num_questions, stress.seed
    );
    let mut rng = StdRng::seed_from_u64(stress.seed);
    let questions: Vec<SyntheticQuestion> = (0..stress.num_questions)
        .map(|id| generate_question(&mut rng, id as i32, stress))
        .collect();
    let total_forecasts: usize = questions.iter().map(|q| q.forecasts.len()).sum();
    info!("Generated {} forecasts", total_forecasts);

    info!("\n🚀 Scoring questions in parallel...");
    let start = Instant::now();
    let report = questions
        .par_iter()
        .map(|synthetic| check_question(synthetic, config.scoring.score_resolution))
        .try_reduce(StressReport::default, |a, b| Ok(merge(a, b)))?;
    let duration = start.elapsed();

    let qps = report.questions_scored as f64 / duration.as_secs_f64().max(f64::EPSILON);
    info!("\n🏁 Scoring finished in {:.2?}", duration);
    info!("   Scored {} questions", report.questions_scored);
    info!("   Produced {} forecaster scores", report.forecaster_scores);
    info!("   Performance: {:.2} Questions/Second", qps);

    if report.violations.is_empty() {
        info!("✅ All invariants hold");
    } else {
        for violation in report.violations.iter().take(20) {
            error!("❌ {}", violation);
        }
        error!("❌ {} invariant violations", report.violations.len());
    }

    Ok(report)
}
