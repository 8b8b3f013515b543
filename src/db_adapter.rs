//! Database adapter layer for clean numeric conversions
//! Keeps NUMERIC <-> f64 conversion and row extraction out of the scoring code

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::score_history::QuestionScore;
use crate::scoring_core::{Forecast, ForecasterScore, Question, Resolution};

/// Clean conversion functions between database Decimal and core f64 math
pub struct DbAdapter;

impl DbAdapter {
    /// Convert database Decimal to f64 for scoring math
    #[inline]
    pub fn decimal_to_f64(decimal: Decimal) -> Result<f64> {
        decimal
            .to_f64()
            .ok_or_else(|| anyhow!("Failed to convert Decimal to f64: {}", decimal))
    }

    /// Convert f64 result back to Decimal for database storage
    #[inline]
    pub fn f64_to_decimal(value: f64) -> Result<Decimal> {
        if !value.is_finite() {
            return Err(anyhow!("Cannot convert non-finite f64 to Decimal: {}", value));
        }
        Decimal::from_f64_retain(value)
            .ok_or_else(|| anyhow!("Failed to convert f64 to Decimal: {}", value))
    }

    /// Parse the nullable `resolution` column
    pub fn parse_resolution(value: Option<String>) -> Result<Option<Resolution>> {
        value
            .map(|raw| raw.parse::<Resolution>().map_err(|e| anyhow!(e)))
            .transpose()
    }

    /// Extract a forecast from a `forecasts` row
    pub fn extract_forecast(row: &PgRow) -> Result<Forecast> {
        Ok(Forecast {
            forecaster_id: row.try_get("user_id")?,
            probability: Self::decimal_to_f64(row.try_get("forecast")?)?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Extract a question from a `questions` row
    pub fn extract_question(row: &PgRow) -> Result<Question> {
        Ok(Question {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution: Self::parse_resolution(row.try_get("resolution")?)?,
        })
    }

    /// Extract a persisted score from a `question_scores` row
    pub fn extract_question_score(row: &PgRow) -> Result<QuestionScore> {
        let relative: Option<Decimal> = row.try_get("relative_score")?;
        Ok(QuestionScore {
            forecaster_id: row.try_get("user_id")?,
            question_id: row.try_get("question_id")?,
            absolute_score: Self::decimal_to_f64(row.try_get("absolute_score")?)?,
            relative_score: relative.map(Self::decimal_to_f64).transpose()?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Database update operations with clean conversions
impl DbAdapter {
    /// Record a question's resolution
    pub async fn mark_question_resolved(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        question_id: i32,
        resolution: Resolution,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE questions SET resolution = $1, resolved_at = $2 WHERE id = $3")
            .bind(resolution.as_str())
            .bind(resolved_at)
            .bind(question_id)
            .execute(tx.as_mut())
            .await?;
        Ok(())
    }

    /// Replace every score row of a question with the given cohort.
    ///
    /// Runs inside the caller's transaction so readers never see a cohort
    /// that is half old scores and half new ones.
    pub async fn replace_question_scores(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        question_id: i32,
        scores: &[ForecasterScore],
        scored_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("DELETE FROM question_scores WHERE question_id = $1")
            .bind(question_id)
            .execute(tx.as_mut())
            .await?;

        for score in scores {
            let relative = score.relative_score.map(Self::f64_to_decimal).transpose()?;
            sqlx::query(
                "INSERT INTO question_scores (question_id, user_id, absolute_score, relative_score, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(question_id)
            .bind(score.forecaster_id)
            .bind(Self::f64_to_decimal(score.absolute_score)?)
            .bind(relative)
            .bind(scored_at)
            .execute(tx.as_mut())
            .await?;
        }

        Ok(())
    }
}
