//! Community forecast: geometric mean of every forecaster's standing odds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use ts_rs::TS;

use crate::scoring_core::{Forecast, ForecasterId};

/// Certain forecasts are pulled this far in from 0 and 1 before taking odds.
pub const PROBABILITY_FLOOR: f64 = 0.0001;
pub const PROBABILITY_CEILING: f64 = 0.9999;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommunityForecast {
    pub probability: f64,
    /// Forecasters with a standing forecast at the requested instant.
    pub forecaster_count: usize,
}

#[inline]
fn nudge(probability: f64) -> f64 {
    if probability == 0.0 {
        PROBABILITY_FLOOR
    } else if probability == 1.0 {
        PROBABILITY_CEILING
    } else {
        probability
    }
}

#[inline]
fn to_odds(probability: f64) -> f64 {
    probability / (1.0 - probability)
}

/// Consensus probability at `at` across all forecasters on one question.
///
/// Returns `None` when nobody has forecast yet. A single standing forecast
/// degenerates to that forecaster's own (nudged) probability; hiding thin
/// consensus is the caller's decision.
pub fn community_forecast(forecasts: &[Forecast], at: DateTime<Utc>) -> Option<CommunityForecast> {
    let mut standing: BTreeMap<ForecasterId, &Forecast> = BTreeMap::new();
    for forecast in forecasts.iter().filter(|forecast| forecast.created_at <= at) {
        let is_latest = standing
            .get(&forecast.forecaster_id)
            .map_or(true, |current| current.created_at <= forecast.created_at);
        if is_latest {
            standing.insert(forecast.forecaster_id, forecast);
        }
    }

    if standing.is_empty() {
        return None;
    }

    let odds: Vec<f64> = standing
        .values()
        .map(|forecast| to_odds(nudge(forecast.probability)))
        .collect();
    let mean_odds = odds.iter().geometric_mean();

    Some(CommunityForecast {
        probability: mean_odds / (1.0 + mean_odds),
        forecaster_count: odds.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn forecast(forecaster_id: ForecasterId, probability: f64, at: i64) -> Forecast {
        Forecast {
            forecaster_id,
            probability,
            created_at: day(at),
        }
    }

    proptest! {
        #[test]
        fn unanimous_cohort_returns_shared_probability(
            p in 0.001f64..0.999,
            cohort in 1i32..20,
        ) {
            let forecasts: Vec<_> = (0..cohort).map(|id| forecast(id, p, 1)).collect();
            let community = community_forecast(&forecasts, day(2)).unwrap();
            prop_assert!((community.probability - p).abs() < 1e-9);
            prop_assert_eq!(community.forecaster_count, cohort as usize);
        }
    }

    #[test]
    fn even_split_is_a_coin_flip() {
        let forecasts = vec![forecast(1, 0.5, 0), forecast(2, 0.5, 0)];
        let community = community_forecast(&forecasts, day(1)).unwrap();
        assert!((community.probability - 0.5).abs() < 1e-12);
    }

    #[test]
    fn symmetric_odds_cancel() {
        let forecasts = vec![forecast(1, 0.8, 0), forecast(2, 0.2, 0)];
        let community = community_forecast(&forecasts, day(1)).unwrap();
        assert!((community.probability - 0.5).abs() < 1e-12);
    }

    #[test]
    fn certainty_is_nudged_off_the_boundary() {
        let yes = vec![forecast(1, 1.0, 0), forecast(2, 1.0, 0)];
        let community = community_forecast(&yes, day(1)).unwrap();
        assert!((community.probability - PROBABILITY_CEILING).abs() < 1e-9);

        let no = vec![forecast(1, 0.0, 0)];
        let community = community_forecast(&no, day(1)).unwrap();
        assert!((community.probability - PROBABILITY_FLOOR).abs() < 1e-9);

        let split = vec![forecast(1, 0.0, 0), forecast(2, 1.0, 0)];
        let community = community_forecast(&split, day(1)).unwrap();
        assert!(community.probability.is_finite());
        assert!((community.probability - 0.5).abs() < 1e-9);
    }

    #[test]
    fn only_standing_forecasts_count() {
        let forecasts = vec![
            forecast(1, 0.9, 1),
            forecast(2, 0.2, 3),
            forecast(1, 0.3, 5),
            forecast(3, 0.99, 6),
        ];
        assert_eq!(community_forecast(&forecasts, day(0)), None);

        let early = community_forecast(&forecasts, day(2)).unwrap();
        assert_eq!(early.forecaster_count, 1);
        assert!((early.probability - 0.9).abs() < 1e-9);

        // Standing at day 4: 0.9 and 0.2.
        let middle = community_forecast(&forecasts, day(4)).unwrap();
        assert_eq!(middle.forecaster_count, 2);
        let expected = (9.0f64 * 0.25).sqrt();
        assert!((middle.probability - expected / (1.0 + expected)).abs() < 1e-9);

        // Standing at day 7: 0.3, 0.2 and 0.99.
        let late = community_forecast(&forecasts, day(7)).unwrap();
        assert_eq!(late.forecaster_count, 3);
        let g = ((0.3f64 / 0.7) * 0.25 * 99.0).powf(1.0 / 3.0);
        assert!((late.probability - g / (1.0 + g)).abs() < 1e-9);
    }
}
