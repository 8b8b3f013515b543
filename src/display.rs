//! Rounding for scores and probabilities shown to users.

/// Format a percentage-scale value with 2 decimal places, or 3 when it sits
/// within 0.01 of either end of the scale.
pub fn format_score(value: f64) -> String {
    if value.abs() < 0.01 || (value - 100.0).abs() < 0.01 {
        format!("{:.3}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Format a probability in [0, 1] as a percentage string.
pub fn format_probability(probability: f64) -> String {
    format!("{}%", format_score(probability * 100.0))
}
