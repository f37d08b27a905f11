//! Time series of numeric values owned by a process.

use crate::range::Range;
use serde::Serialize;

/// One named value tracked by a [`Counter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSeries {
    pub name: String,
    pub color_id: u32,
    /// One value per counter timestamp.
    pub values: Vec<f64>,
}

/// A counter with one or more series sampled at shared timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Counter {
    pub category: String,
    pub name: String,
    pub series: Vec<CounterSeries>,
    pub timestamps: Vec<f64>,
    #[serde(skip)]
    pub bounds: Range,
}

impl Counter {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_series(&mut self, name: impl Into<String>, color_id: u32) {
        self.series.push(CounterSeries {
            name: name.into(),
            color_id,
            values: Vec::new(),
        });
    }

    pub fn series_names(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|s| s.name.as_str())
    }

    pub fn num_series(&self) -> usize {
        self.series.len()
    }

    pub fn num_samples(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Record one value per series at `ts`. Series without a value get 0.
    pub fn add_sample(&mut self, ts: f64, values: impl IntoIterator<Item = f64>) {
        self.timestamps.push(ts);
        let mut values = values.into_iter();
        for series in &mut self.series {
            series.values.push(values.next().unwrap_or(0.0));
        }
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for &ts in &self.timestamps {
            self.bounds.add_value(ts);
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for ts in &mut self.timestamps {
            *ts += amount;
        }
        self.update_bounds();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_fill_every_series() {
        let mut counter = Counter::new("mem", "heap");
        counter.add_series("used", 1);
        counter.add_series("free", 2);
        counter.add_sample(1.0, [10.0, 20.0]);
        counter.add_sample(2.0, [11.0]);

        assert_eq!(counter.num_series(), 2);
        assert_eq!(counter.num_samples(), 2);
        assert_eq!(counter.series[0].values, vec![10.0, 11.0]);
        assert_eq!(counter.series[1].values, vec![20.0, 0.0]);
        assert_eq!(counter.series_names().collect::<Vec<_>>(), vec!["used", "free"]);

        counter.shift_timestamps_forward(-1.0);
        assert_eq!(counter.timestamps, vec![0.0, 1.0]);
        assert_eq!(counter.bounds.max, Some(1.0));
    }
}
