use crate::color::string_color_id;
use crate::slice::Args;
use serde::Serialize;

/// A point-in-time observation on a thread, such as a profiler tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub category: String,
    pub title: String,
    pub color_id: u32,
    pub start: f64,
    pub args: Args,
}

impl Sample {
    pub fn new(category: impl Into<String>, title: impl Into<String>, start: f64, args: Args) -> Self {
        let title = title.into();
        Self {
            category: category.into(),
            color_id: string_color_id(&title),
            title,
            start,
            args,
        }
    }
}
