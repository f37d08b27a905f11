use crate::async_slice_group::AsyncSliceGroup;
use crate::range::Range;
use crate::sample::Sample;
use crate::slice::Slice;
use crate::slice_group::SliceGroup;
use crate::{ModelError, Result};
use serde::Serialize;

/// Identifies a thread across the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ThreadKey {
    pub pid: i64,
    pub tid: i64,
}

/// A thread and everything recorded on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub pid: i64,
    pub tid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sort_index: i64,
    /// Userland slices.
    pub slice_group: SliceGroup,
    /// Kernel slices, merged into `slice_group` at the end of an import.
    pub kernel_slice_group: SliceGroup,
    pub async_slice_group: AsyncSliceGroup,
    pub samples: Vec<Sample>,
    /// Scheduler states (running, sleeping, ...) derived from kernel traces.
    pub time_slices: Vec<Slice>,
    #[serde(skip)]
    pub bounds: Range,
}

impl Thread {
    pub fn new(pid: i64, tid: i64) -> Self {
        Self {
            pid,
            tid,
            name: None,
            sort_index: 0,
            slice_group: SliceGroup::new(),
            kernel_slice_group: SliceGroup::new(),
            async_slice_group: AsyncSliceGroup::new(),
            samples: Vec::new(),
            time_slices: Vec::new(),
            bounds: Range::new(),
        }
    }

    pub fn key(&self) -> ThreadKey {
        ThreadKey {
            pid: self.pid,
            tid: self.tid,
        }
    }

    pub fn user_friendly_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{}: {}", self.tid, name),
            None => self.tid.to_string(),
        }
    }

    /// Append a sample; samples must arrive in non-decreasing time order.
    pub fn add_sample(&mut self, sample: Sample) -> Result<&mut Sample> {
        if let Some(last) = self.samples.last() {
            if sample.start < last.start {
                return Err(ModelError::SampleOrderingViolation {
                    timestamp: sample.start,
                    last: last.start,
                });
            }
        }
        self.samples.push(sample);
        let last = self.samples.len() - 1;
        Ok(&mut self.samples[last])
    }

    pub fn is_empty(&self) -> bool {
        self.slice_group.is_empty()
            && self.slice_group.open_slice_count() == 0
            && self.kernel_slice_group.is_empty()
            && self.kernel_slice_group.open_slice_count() == 0
            && self.async_slice_group.is_empty()
            && self.samples.is_empty()
            && self.time_slices.is_empty()
    }

    pub fn auto_close_open_slices(&mut self, max_timestamp: f64) -> Result<()> {
        self.slice_group.auto_close_open_slices(Some(max_timestamp))?;
        self.kernel_slice_group.auto_close_open_slices(Some(max_timestamp))
    }

    /// Fold the kernel slices into the userland group. Kernel slices are
    /// the ones split when the two do not nest.
    pub fn merge_kernel_with_userland(&mut self) -> Result<()> {
        if self.kernel_slice_group.is_empty() {
            return Ok(());
        }
        self.slice_group = SliceGroup::merge(&self.slice_group, &self.kernel_slice_group)?;
        self.kernel_slice_group = SliceGroup::new();
        Ok(())
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        self.slice_group.shift_timestamps_forward(amount);
        self.kernel_slice_group.shift_timestamps_forward(amount);
        self.async_slice_group.shift_timestamps_forward(amount);
        for sample in &mut self.samples {
            sample.start += amount;
        }
        for slice in &mut self.time_slices {
            slice.shift(amount);
        }
        self.update_bounds();
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();

        self.slice_group.update_bounds();
        self.bounds.add_range(self.slice_group.bounds());
        self.kernel_slice_group.update_bounds();
        self.bounds.add_range(self.kernel_slice_group.bounds());
        self.async_slice_group.update_bounds();
        self.bounds.add_range(&self.async_slice_group.bounds);

        if let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.start);
        }
        if let (Some(first), Some(last)) = (self.time_slices.first(), self.time_slices.last()) {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.end());
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.slice_group
            .categories()
            .chain(self.kernel_slice_group.categories())
            .chain(self.async_slice_group.categories())
            .chain(self.samples.iter().map(|s| s.category.as_str()).filter(|c| !c.is_empty()))
    }
}
