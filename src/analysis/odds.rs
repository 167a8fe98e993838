//! Odds conversions.
//!
//! Prices are stored as decimal odds. American odds only appear at the
//! edges (configuration, feed adapters) and are converted here.

/// Implied probability of a decimal price. Non-positive prices map to 0.
pub fn implied_probability(decimal_price: f64) -> f64 {
    if decimal_price > 0.0 && decimal_price.is_finite() {
        1.0 / decimal_price
    } else {
        0.0
    }
}

/// Convert American odds (+150, -120) to a decimal price.
pub fn american_to_decimal(american: i32) -> f64 {
    let a = american as f64;
    if american > 0 {
        1.0 + a / 100.0
    } else if american < 0 {
        1.0 + 100.0 / a.abs()
    } else {
        // "0" is not a real quote; treat as even money
        2.0
    }
}

/// Convert a decimal price back to American odds (rounded to the nearest point).
pub fn decimal_to_american(decimal_price: f64) -> Option<i32> {
    if !(decimal_price > 1.0) || !decimal_price.is_finite() {
        return None;
    }
    let american = if decimal_price >= 2.0 {
        (decimal_price - 1.0) * 100.0
    } else {
        -100.0 / (decimal_price - 1.0)
    };
    Some(american.round() as i32)
}

/// Decimal price that implies the given probability.
pub fn decimal_from_probability(probability: f64) -> Option<f64> {
    if probability > 0.0 && probability <= 1.0 {
        Some(1.0 / probability)
    } else {
        None
    }
}

/// Population variance of a sample (0 for fewer than two points).
pub fn variance(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_probability() {
        assert!((implied_probability(2.0) - 0.5).abs() < 1e-12);
        assert!((implied_probability(2.5) - 0.4).abs() < 1e-12);
        assert_eq!(implied_probability(0.0), 0.0);
        assert_eq!(implied_probability(-1.5), 0.0);
    }

    #[test]
    fn test_american_to_decimal() {
        assert!((american_to_decimal(150) - 2.5).abs() < 1e-12);
        assert!((american_to_decimal(-200) - 1.5).abs() < 1e-12);
        assert!((american_to_decimal(100) - 2.0).abs() < 1e-12);
        // -110 is the standard vig line
        assert!((implied_probability(american_to_decimal(-110)) - 0.5238).abs() < 1e-4);
    }

    #[test]
    fn test_decimal_to_american() {
        assert_eq!(decimal_to_american(2.5), Some(150));
        assert_eq!(decimal_to_american(1.5), Some(-200));
        assert_eq!(decimal_to_american(1.0), None);
        assert_eq!(decimal_to_american(f64::NAN), None);
    }

    #[test]
    fn test_decimal_from_probability() {
        assert!((decimal_from_probability(0.4).unwrap() - 2.5).abs() < 1e-12);
        assert!(decimal_from_probability(0.0).is_none());
        assert!(decimal_from_probability(1.2).is_none());
    }

    #[test]
    fn test_variance() {
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(variance(&[0.5]), 0.0);
        assert!((variance(&[0.4, 0.6]) - 0.01).abs() < 1e-12);
    }
}
