//! Closed numeric ranges used for time bounds.

use serde::Serialize;

/// A possibly-empty closed range of timestamps, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none()
    }

    pub fn reset(&mut self) {
        self.min = None;
        self.max = None;
    }

    /// Extend the range so that it includes `value`.
    pub fn add_value(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    /// Extend the range so that it includes all of `other`.
    pub fn add_range(&mut self, other: &Range) {
        if let Some(min) = other.min {
            self.add_value(min);
        }
        if let Some(max) = other.max {
            self.add_value(max);
        }
    }

    /// Width of the range, or zero when empty.
    pub fn duration(&self) -> f64 {
        match (self.min, self.max) {
            (Some(min), Some(max)) => max - min,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_range() {
        let range = Range::new();
        assert!(range.is_empty());
        assert_eq!(range.min, None);
        assert_eq!(range.max, None);
        assert_eq!(range.duration(), 0.0);
    }

    #[test]
    fn add_values_and_ranges() {
        let mut range = Range::new();
        range.add_value(3.0);
        range.add_value(1.0);
        assert_eq!(range.min, Some(1.0));
        assert_eq!(range.max, Some(3.0));

        let mut other = Range::new();
        other.add_value(9.0);
        range.add_range(&other);
        assert_eq!(range.max, Some(9.0));
        assert_eq!(range.duration(), 8.0);

        range.add_range(&Range::new());
        assert_eq!(range.min, Some(1.0));

        range.reset();
        assert!(range.is_empty());
    }
}
