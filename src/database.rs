// Database connection and query functions
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Row};
use tracing::info;

use crate::db_adapter::DbAdapter;
use crate::score_history::QuestionScore;
use crate::scoring_core::{Forecast, Question};

// Create a connection pool to PostgreSQL
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("🔌 Connecting to PostgreSQL...");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10) // Connection pool size
        .connect(database_url)
        .await?;

    info!("✅ Connected to database!");
    Ok(pool)
}

// Create the tables the scoring service reads and writes
pub async fn setup_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id SERIAL PRIMARY KEY,
            username VARCHAR(50) UNIQUE NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            id SERIAL PRIMARY KEY,
            title TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            resolved_at TIMESTAMPTZ,
            resolution VARCHAR(16) CHECK (resolution IN ('YES', 'NO', 'AMBIGUOUS'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS forecasts (
            id SERIAL PRIMARY KEY,
            question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            forecast NUMERIC(6, 5) NOT NULL CHECK (forecast >= 0 AND forecast <= 1),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS question_scores (
            id SERIAL PRIMARY KEY,
            question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            absolute_score NUMERIC(20, 12) NOT NULL,
            relative_score NUMERIC(20, 12),
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (question_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_forecasts_question ON forecasts(question_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_question_scores_user ON question_scores(user_id)")
        .execute(pool)
        .await?;

    info!("✅ Scoring schema ready");
    Ok(())
}

pub async fn create_user(pool: &PgPool, username: &str) -> Result<i32> {
    let id: i32 = sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
        .bind(username)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn create_question(pool: &PgPool, title: &str, created_at: DateTime<Utc>) -> Result<i32> {
    let id: i32 = sqlx::query_scalar("INSERT INTO questions (title, created_at) VALUES ($1, $2) RETURNING id")
        .bind(title)
        .bind(created_at)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

// Record a forecast on an open question
pub async fn record_forecast(
    pool: &PgPool,
    question_id: i32,
    user_id: i32,
    probability: f64,
    created_at: DateTime<Utc>,
) -> Result<i32> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(anyhow!("Probability must be between 0 and 1"));
    }

    let question = fetch_question(pool, question_id)
        .await?
        .ok_or_else(|| anyhow!("Question {} not found", question_id))?;
    if question.resolution.is_some() {
        return Err(anyhow!("Question {} is already resolved", question_id));
    }

    let id: i32 = sqlx::query_scalar(
        "INSERT INTO forecasts (question_id, user_id, forecast, created_at) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(question_id)
    .bind(user_id)
    .bind(DbAdapter::f64_to_decimal(probability)?)
    .bind(created_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

const SELECT_QUESTION: &str =
    "SELECT id, created_at, resolved_at, resolution FROM questions WHERE id = $1";
const SELECT_QUESTION_FOR_UPDATE: &str =
    "SELECT id, created_at, resolved_at, resolution FROM questions WHERE id = $1 FOR UPDATE";

pub async fn fetch_question<'e, E>(executor: E, question_id: i32) -> Result<Option<Question>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(SELECT_QUESTION)
        .bind(question_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(DbAdapter::extract_question).transpose()
}

// Same as fetch_question, but holds a row lock until the transaction ends
pub async fn fetch_question_for_update(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    question_id: i32,
) -> Result<Option<Question>> {
    let row = sqlx::query(SELECT_QUESTION_FOR_UPDATE)
        .bind(question_id)
        .fetch_optional(tx.as_mut())
        .await?;

    row.as_ref().map(DbAdapter::extract_question).transpose()
}

// All forecasts on a question, oldest first
pub async fn fetch_question_forecasts<'e, E>(executor: E, question_id: i32) -> Result<Vec<Forecast>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT user_id, forecast, created_at FROM forecasts WHERE question_id = $1 ORDER BY created_at, id",
    )
    .bind(question_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(DbAdapter::extract_forecast).collect()
}

pub async fn fetch_question_scores(pool: &PgPool, question_id: i32) -> Result<Vec<QuestionScore>> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, question_id, absolute_score, relative_score, created_at
        FROM question_scores
        WHERE question_id = $1
        ORDER BY relative_score ASC NULLS LAST, user_id
        "#,
    )
    .bind(question_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(DbAdapter::extract_question_score).collect()
}

pub async fn fetch_user_scores(pool: &PgPool, user_id: i32) -> Result<Vec<QuestionScore>> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, question_id, absolute_score, relative_score, created_at
        FROM question_scores
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(DbAdapter::extract_question_score).collect()
}

// Every persisted score, for leaderboard ranking
pub async fn fetch_all_scores(pool: &PgPool) -> Result<Vec<QuestionScore>> {
    let rows = sqlx::query(
        "SELECT user_id, question_id, absolute_score, relative_score, created_at FROM question_scores",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(DbAdapter::extract_question_score).collect()
}

pub async fn fetch_username(pool: &PgPool, user_id: i32) -> Result<Option<String>> {
    let row = sqlx::query("SELECT username FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| row.get("username")))
}
