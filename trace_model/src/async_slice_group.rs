use crate::range::Range;
use crate::slice::Slice;
use crate::thread::ThreadKey;
use serde::Serialize;

/// A slice whose start and end were matched by id rather than by nesting,
/// possibly on different threads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncSlice {
    #[serde(flatten)]
    pub slice: Slice,
    pub id: String,
    pub start_thread: ThreadKey,
    pub end_thread: ThreadKey,
    /// One piece per step between consecutive async events.
    pub sub_slices: Vec<Slice>,
}

impl AsyncSlice {
    pub fn start(&self) -> f64 {
        self.slice.start
    }

    pub fn end(&self) -> f64 {
        self.slice.end()
    }

    fn shift(&mut self, amount: f64) {
        self.slice.shift(amount);
        for sub in &mut self.sub_slices {
            sub.shift(amount);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AsyncSliceGroup {
    pub slices: Vec<AsyncSlice>,
    #[serde(skip)]
    pub bounds: Range,
}

impl AsyncSliceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, slice: AsyncSlice) {
        self.slices.push(slice);
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for slice in &self.slices {
            self.bounds.add_value(slice.start());
            self.bounds.add_value(slice.end());
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for slice in &mut self.slices {
            slice.shift(amount);
        }
        self.update_bounds();
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.slices
            .iter()
            .map(|s| s.slice.category.as_str())
            .filter(|c| !c.is_empty())
    }
}
