//! Time intervals on a thread, CPU or process.

use crate::color::string_color_id;
use serde::Serialize;

/// Ordered argument payload attached to slices, samples and async slices.
pub type Args = serde_json::Map<String, serde_json::Value>;

/// Suffix appended to every piece of a split slice except the first.
pub const CONTINUATION_SUFFIX: &str = " (cont.)";

/// A single interval of time with a title, category and arguments.
///
/// A slice is open while `duration` is `None`. [`SliceGroup`] closes it
/// exactly once, after which it is not modified except by a merge, which
/// works on copies.
///
/// [`SliceGroup`]: crate::SliceGroup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice {
    pub category: String,
    pub title: String,
    pub color_id: u32,
    /// Start time in milliseconds.
    pub start: f64,
    /// Duration in milliseconds; `None` while the slice is still open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub args: Args,
    /// Set when the slice was force-closed at the end of an import.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub did_not_finish: bool,
}

impl Slice {
    /// Create an open slice whose color is derived from its title.
    pub fn new(category: impl Into<String>, title: impl Into<String>, start: f64, args: Args) -> Self {
        let title = title.into();
        Self {
            category: category.into(),
            color_id: string_color_id(&title),
            title,
            start,
            duration: None,
            args,
            did_not_finish: false,
        }
    }

    /// Create a closed slice.
    pub fn complete(
        category: impl Into<String>,
        title: impl Into<String>,
        start: f64,
        duration: f64,
        args: Args,
    ) -> Self {
        Self::new(category, title, start, args).with_duration(duration)
    }

    /// Create a zero-duration slice.
    pub fn instant(category: impl Into<String>, title: impl Into<String>, ts: f64, args: Args) -> Self {
        Self::complete(category, title, ts, 0.0, args)
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_color_id(mut self, color_id: u32) -> Self {
        self.color_id = color_id;
        self
    }

    pub fn is_open(&self) -> bool {
        self.duration.is_none()
    }

    /// End time; equal to `start` while the slice is open.
    pub fn end(&self) -> f64 {
        self.start + self.duration.unwrap_or(0.0)
    }

    pub fn shift(&mut self, amount: f64) {
        self.start += amount;
    }
}
