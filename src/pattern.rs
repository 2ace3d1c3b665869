//! Payout pattern classification
//!
//! Labels the value distribution of a transaction group. The checks run in
//! priority order and the first match wins:
//! uniform, geometric (or high-precision geometric), stepped, varied.
//! Fewer than two values is never an error, it resolves to `Unknown`.

use std::fmt;

/// Absolute tolerance for "all values equal"
const UNIFORM_TOLERANCE: f64 = 1e-15;
/// Ratio tolerance when the smallest value is above `WIDE_RATIO_FLOOR`
const WIDE_RATIO_TOLERANCE: f64 = 1e-8;
/// Ratio tolerance for small starting values
const TIGHT_RATIO_TOLERANCE: f64 = 1e-15;
const WIDE_RATIO_FLOOR: f64 = 0.1;
/// Difference tolerance for stepped sequences
const STEP_TOLERANCE: f64 = 1e-8;
/// More decimals than this turns a geometric match into high-precision
const HIGH_PRECISION_DIGITS: usize = 8;

/// Payout tiers observed on the monitored contracts, keyed by minimum value
const RANGE_BANDS: [(f64, f64, ValueRange); 3] = [
    (0.027, 0.045, ValueRange::Start),
    (0.05, 0.15, ValueRange::Middle),
    (0.15, 0.38, ValueRange::End),
];

/// Pattern label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Uniform,
    Geometric,
    HighPrecision,
    Stepped,
    Varied,
    Unknown,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Uniform => "uniform",
            PatternKind::Geometric => "geometric",
            PatternKind::HighPrecision => "high-precision",
            PatternKind::Stepped => "stepped",
            PatternKind::Varied => "varied",
            PatternKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payout tier of the smallest value in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRange {
    Start,
    Middle,
    End,
    Unknown,
}

impl ValueRange {
    /// Bucket a value into its tier. Gaps between bands fall through to `Unknown`.
    pub fn of(value: f64) -> Self {
        RANGE_BANDS
            .iter()
            .find(|(low, high, _)| value >= *low && value <= *high)
            .map(|(_, _, range)| *range)
            .unwrap_or(ValueRange::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueRange::Start => "start",
            ValueRange::Middle => "middle",
            ValueRange::End => "end",
            ValueRange::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a group's values
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: PatternKind,
    pub start_value: f64,
    pub end_value: f64,
    /// Most decimal digits carried by any value
    pub precision: usize,
    pub ratio: Option<f64>,
    pub increment: Option<f64>,
    pub range: ValueRange,
}

impl Classification {
    fn unknown(values: &[f64]) -> Self {
        let start = values.first().copied().unwrap_or(0.0);
        Self {
            kind: PatternKind::Unknown,
            start_value: start,
            end_value: start,
            precision: max_precision(values),
            ratio: None,
            increment: None,
            range: ValueRange::Unknown,
        }
    }

    /// Short human-readable phrase for alert text
    pub fn describe(&self) -> String {
        match self.kind {
            PatternKind::Uniform => format!("Uniform at {:.4}", self.start_value),
            PatternKind::Geometric => format!(
                "Geometric x{:.4} from {:.4} to {:.4}",
                self.ratio.unwrap_or_default(),
                self.start_value,
                self.end_value
            ),
            PatternKind::HighPrecision => format!(
                "High-precision geometric x{:.4} from {:.4} to {:.4} ({} decimals)",
                self.ratio.unwrap_or_default(),
                self.start_value,
                self.end_value,
                self.precision
            ),
            PatternKind::Stepped => format!(
                "Stepped +{:.4} from {:.4} to {:.4}",
                self.increment.unwrap_or_default(),
                self.start_value,
                self.end_value
            ),
            PatternKind::Varied => {
                format!("Varied from {:.4} to {:.4}", self.start_value, self.end_value)
            }
            PatternKind::Unknown => "Unknown pattern".to_string(),
        }
    }
}

/// Classify a sequence of non-negative values
pub fn classify(values: &[f64]) -> Classification {
    if values.len() < 2 {
        return Classification::unknown(values);
    }

    let precision = max_precision(values);

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let start_value = sorted[0];
    let end_value = sorted[sorted.len() - 1];
    let range = ValueRange::of(start_value);

    let base = Classification {
        kind: PatternKind::Varied,
        start_value,
        end_value,
        precision,
        ratio: None,
        increment: None,
        range,
    };

    let first = values[0];
    if values.iter().all(|v| (v - first).abs() <= UNIFORM_TOLERANCE) {
        return Classification {
            kind: PatternKind::Uniform,
            start_value: first,
            end_value: first,
            ..base
        };
    }

    if let Some(ratio) = common_ratio(&sorted) {
        let kind = if precision > HIGH_PRECISION_DIGITS {
            PatternKind::HighPrecision
        } else {
            PatternKind::Geometric
        };
        return Classification {
            kind,
            ratio: Some(ratio),
            ..base
        };
    }

    if let Some(increment) = common_increment(&sorted) {
        return Classification {
            kind: PatternKind::Stepped,
            increment: Some(increment),
            ..base
        };
    }

    base
}

fn common_ratio(sorted: &[f64]) -> Option<f64> {
    let ratio = sorted[1] / sorted[0];
    if !ratio.is_finite() {
        return None;
    }

    let tolerance = if sorted[0] > WIDE_RATIO_FLOOR {
        WIDE_RATIO_TOLERANCE
    } else {
        TIGHT_RATIO_TOLERANCE
    };

    sorted
        .windows(2)
        .all(|pair| (pair[1] / pair[0] - ratio).abs() <= tolerance)
        .then_some(ratio)
}

fn common_increment(sorted: &[f64]) -> Option<f64> {
    let increment = sorted[1] - sorted[0];
    sorted
        .windows(2)
        .all(|pair| ((pair[1] - pair[0]) - increment).abs() <= STEP_TOLERANCE)
        .then_some(increment)
}

/// Digits after the decimal point in the shortest round-trip representation
pub fn decimal_places(value: f64) -> usize {
    let repr = value.to_string();
    repr.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
}

fn max_precision(values: &[f64]) -> usize {
    values.iter().map(|v| decimal_places(*v)).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_degenerate_inputs_are_unknown() {
        assert_eq!(classify(&[]).kind, PatternKind::Unknown);
        for x in [0.0, 0.05, 1.5, 1e-12] {
            let c = classify(&[x]);
            assert_eq!(c.kind, PatternKind::Unknown);
            assert_eq!(c.range, ValueRange::Unknown);
        }
    }

    #[test]
    fn test_uniform() {
        let c = classify(&[0.05, 0.05, 0.05]);
        assert_eq!(c.kind, PatternKind::Uniform);
        assert_eq!(c.start_value, 0.05);
        assert_eq!(c.end_value, 0.05);
        assert_eq!(c.range, ValueRange::Middle);
    }

    #[test]
    fn test_geometric() {
        let c = classify(&[0.01, 0.02, 0.04, 0.08]);
        assert_eq!(c.kind, PatternKind::Geometric);
        assert!(approx(c.ratio.unwrap(), 2.0));
        assert_eq!(c.start_value, 0.01);
        assert_eq!(c.end_value, 0.08);
    }

    #[test]
    fn test_geometric_unordered_input() {
        let c = classify(&[0.08, 0.01, 0.04, 0.02]);
        assert_eq!(c.kind, PatternKind::Geometric);
        assert!(approx(c.ratio.unwrap(), 2.0));
    }

    #[test]
    fn test_high_precision_geometric() {
        let c = classify(&[0.0123456789, 0.0246913578]);
        assert_eq!(c.kind, PatternKind::HighPrecision);
        assert!(c.precision > 8);
        assert!(c.ratio.is_some());
    }

    #[test]
    fn test_stepped() {
        let c = classify(&[0.01, 0.02, 0.03, 0.04]);
        assert_eq!(c.kind, PatternKind::Stepped);
        assert!(approx(c.increment.unwrap(), 0.01));
        assert!(c.ratio.is_none());
    }

    #[test]
    fn test_varied() {
        let c = classify(&[0.01, 0.5, 0.02]);
        assert_eq!(c.kind, PatternKind::Varied);
        assert_eq!(c.start_value, 0.01);
        assert_eq!(c.end_value, 0.5);
    }

    #[test]
    fn test_zero_start_skips_geometric() {
        let c = classify(&[0.0, 0.5, 1.0]);
        assert_eq!(c.kind, PatternKind::Stepped);
    }

    #[test]
    fn test_range_bands() {
        assert_eq!(ValueRange::of(0.03), ValueRange::Start);
        assert_eq!(ValueRange::of(0.046), ValueRange::Unknown);
        assert_eq!(ValueRange::of(0.1), ValueRange::Middle);
        assert_eq!(ValueRange::of(0.15), ValueRange::Middle);
        assert_eq!(ValueRange::of(0.2), ValueRange::End);
        assert_eq!(ValueRange::of(0.5), ValueRange::Unknown);
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places(0.05), 2);
        assert_eq!(decimal_places(1.0), 0);
        assert_eq!(decimal_places(0.123456789), 9);
    }

    #[test]
    fn test_describe() {
        let c = classify(&[0.01, 0.02, 0.04, 0.08]);
        assert_eq!(c.describe(), "Geometric x2.0000 from 0.0100 to 0.0800");
        let c = classify(&[0.01, 0.02, 0.03]);
        assert_eq!(c.describe(), "Stepped +0.0100 from 0.0100 to 0.0300");
        assert_eq!(classify(&[]).describe(), "Unknown pattern");
    }
}
