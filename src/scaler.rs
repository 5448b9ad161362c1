//! Linear, inverted remap of raw capacitive-sensor readings to percent.
//!
//! The sensor reads low when wet and high when dry, so `min_raw` maps to
//! `max_scaled` and `max_raw` maps to zero. Values outside the calibrated raw
//! range are passed through unclamped.

use crate::config::{ConfigError, ScaleRange};

/// Validated scaler. Construction fails on an empty raw range so the
/// division in `scale` can never be by zero.
#[derive(Debug, Clone, Copy)]
pub struct Scaler {
    range: ScaleRange,
}

impl Scaler {
    pub fn new(range: ScaleRange) -> Result<Self, ConfigError> {
        // Compared as f64: distinct but huge i64 bounds can still collapse.
        if range.min_raw as f64 == range.max_raw as f64 {
            return Err(ConfigError::Invalid(format!(
                "cannot scale over an empty raw range ({}..{})",
                range.min_raw, range.max_raw
            )));
        }
        Ok(Self { range })
    }

    pub fn range(&self) -> ScaleRange {
        self.range
    }

    /// `max_scaled - ((raw - min_raw) / (max_raw - min_raw)) * max_scaled`
    ///
    /// `min_scaled` does not take part in the formula; the low end of the
    /// output is always zero.
    pub fn scale(&self, raw: i64) -> f64 {
        let r = &self.range;
        // Subtract in f64; any i64 reading is accepted and must not overflow.
        let fraction = (raw as f64 - r.min_raw as f64) / (r.max_raw as f64 - r.min_raw as f64);
        r.max_scaled - fraction * r.max_scaled
    }
}
