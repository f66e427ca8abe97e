//! Pure scoring helpers shared by detectors and evidence replay
//!
//! Every confidence value an opportunity carries is produced by one of
//! these functions, so evidence bundles can recompute it without access to
//! the snapshot that produced them.

/// Confidence multiplier applied when no cost baseline backs an estimate
pub const NO_BASELINE_CONFIDENCE_FACTOR: f64 = 0.9;

/// Highest confidence an orphan-volume finding can reach
pub const ORPHAN_CONFIDENCE_CEILING: f64 = 0.95;

/// Confidence multiplier when the autoscaler did scale during the window
pub const SCALING_ACTIVITY_FACTOR: f64 = 0.8;

/// Clamp a value into [0, 1], mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Clamp a currency amount to a finite, non-negative value
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Statistical margin between a request and its p95 usage
///
/// `min(1, (request - usage_p95) / request)`, and 0 when usage meets or
/// exceeds the request (there is nothing to reclaim).
pub fn rightsizing_margin(request: f64, usage_p95: f64) -> f64 {
    if !(request.is_finite() && usage_p95.is_finite()) || request <= 0.0 {
        return 0.0;
    }
    if usage_p95 >= request {
        return 0.0;
    }
    clamp_unit((request - usage_p95) / request)
}

/// Margin of an observed value below a threshold, normalized by the threshold
pub fn below_threshold_margin(observed: f64, threshold: f64) -> f64 {
    if !(observed.is_finite() && threshold.is_finite()) || threshold <= 0.0 {
        return 0.0;
    }
    if observed >= threshold {
        return 0.0;
    }
    clamp_unit(1.0 - observed / threshold)
}

/// Confidence that an unattached volume is orphaned, growing with its age
pub fn orphan_age_confidence(age_days: u32, min_age_days: u32) -> f64 {
    if age_days <= min_age_days {
        return 0.0;
    }
    let span = f64::from(min_age_days.max(1)) * 2.0;
    clamp_unit(age_days as f64 / span).min(ORPHAN_CONFIDENCE_CEILING)
}

/// Lower a confidence when the savings estimate had no baseline behind it
pub fn apply_baseline_penalty(confidence: f64, baseline_present: bool) -> f64 {
    if baseline_present {
        clamp_unit(confidence)
    } else {
        clamp_unit(confidence * NO_BASELINE_CONFIDENCE_FACTOR)
    }
}

/// Linear proration of a resource delta against its cost share
pub fn prorate(resource_cost: f64, current: f64, proposed: f64) -> f64 {
    if !(current.is_finite() && proposed.is_finite()) || current <= 0.0 || proposed >= current {
        return 0.0;
    }
    non_negative(resource_cost * (current - proposed) / current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rightsizing_margin_scenario() {
        let margin = rightsizing_margin(2.0, 0.4);
        assert!((margin - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_rightsizing_margin_usage_over_request() {
        assert_eq!(rightsizing_margin(1.0, 1.5), 0.0);
        assert_eq!(rightsizing_margin(1.0, 1.0), 0.0);
        assert_eq!(rightsizing_margin(0.0, 0.1), 0.0);
    }

    #[test]
    fn test_rightsizing_margin_rejects_non_finite() {
        assert_eq!(rightsizing_margin(f64::NAN, 0.1), 0.0);
        assert_eq!(rightsizing_margin(1.0, f64::INFINITY), 0.0);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.3), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }

    #[test]
    fn test_orphan_age_confidence_capped() {
        assert_eq!(orphan_age_confidence(3, 7), 0.0);
        assert!(orphan_age_confidence(10, 7) > 0.5);
        assert_eq!(orphan_age_confidence(365, 7), ORPHAN_CONFIDENCE_CEILING);
    }

    #[test]
    fn test_orphan_age_confidence_extreme_thresholds() {
        assert_eq!(orphan_age_confidence(u32::MAX, u32::MAX), 0.0);
        let near_max = orphan_age_confidence(u32::MAX, u32::MAX - 1);
        assert!(near_max > 0.49 && near_max <= ORPHAN_CONFIDENCE_CEILING);
        assert_eq!(orphan_age_confidence(u32::MAX, 0), ORPHAN_CONFIDENCE_CEILING);
    }

    #[test]
    fn test_prorate() {
        assert!((prorate(100.0, 2.0, 0.6) - 70.0).abs() < 1e-9);
        assert_eq!(prorate(100.0, 2.0, 2.5), 0.0);
        assert_eq!(prorate(100.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_baseline_penalty() {
        assert!((apply_baseline_penalty(0.8, false) - 0.72).abs() < 1e-9);
        assert_eq!(apply_baseline_penalty(0.8, true), 0.8);
    }
}
