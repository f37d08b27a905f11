//! Begin/end construction of nested slices and the kernel/userland merge.

use crate::range::Range;
use crate::slice::{Args, CONTINUATION_SUFFIX, Slice};
use crate::{ModelError, Result};
use serde::Serialize;

/// An ordered collection of slices belonging to one execution context.
///
/// Closed slices are kept ascending by end time; on equal ends the later
/// start comes first, so an enclosing slice follows everything it
/// contains. Slices that have been begun but not ended live on a separate
/// stack until they close.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SliceGroup {
    slices: Vec<Slice>,
    #[serde(skip)]
    open_slices: Vec<Slice>,
    #[serde(skip)]
    bounds: Range,
}

impl SliceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed slices, ascending by end time.
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    pub fn open_slice_count(&self) -> usize {
        self.open_slices.len()
    }

    /// The innermost slice that has been begun but not yet ended.
    pub fn most_recently_opened(&self) -> Option<&Slice> {
        self.open_slices.last()
    }

    pub fn most_recently_opened_mut(&mut self) -> Option<&mut Slice> {
        self.open_slices.last_mut()
    }

    /// Insert an already closed slice in end order. Slices with the same
    /// start and end keep their insertion order.
    pub fn push_slice(&mut self, slice: Slice) -> &mut Slice {
        debug_assert!(!slice.is_open());
        let (start, end) = (slice.start, slice.end());
        let index = self
            .slices
            .partition_point(|s| s.end() < end || (s.end() == end && s.start >= start));
        self.slices.insert(index, slice);
        &mut self.slices[index]
    }

    pub fn push_slices(&mut self, slices: impl IntoIterator<Item = Slice>) {
        for slice in slices {
            self.push_slice(slice);
        }
    }

    /// Insert a zero-duration slice.
    pub fn push_instant_event(&mut self, mut slice: Slice) -> &mut Slice {
        slice.duration = Some(0.0);
        self.push_slice(slice)
    }

    /// Whether a begin or end at `ts` keeps the open stack ordered.
    pub fn is_timestamp_valid_for_begin_or_end(&self, ts: f64) -> bool {
        self.open_slices.last().is_none_or(|top| ts >= top.start)
    }

    /// Open a new slice nested inside the currently open ones.
    pub fn begin_slice(
        &mut self,
        category: impl Into<String>,
        title: impl Into<String>,
        ts: f64,
        args: Args,
    ) -> Result<&mut Slice> {
        if let Some(top) = self.open_slices.last() {
            if ts < top.start {
                return Err(ModelError::OrderingViolation {
                    timestamp: ts,
                    open_start: top.start,
                });
            }
        }
        self.open_slices.push(Slice::new(category, title, ts, args));
        let last = self.open_slices.len() - 1;
        Ok(&mut self.open_slices[last])
    }

    /// Close the most recently opened slice at `ts` and return it.
    pub fn end_slice(&mut self, ts: f64) -> Result<&mut Slice> {
        let top = self.open_slices.last().ok_or(ModelError::UnbalancedEnd)?;
        if ts < top.start {
            return Err(ModelError::NegativeDuration {
                title: top.title.clone(),
                start: top.start,
                end: ts,
            });
        }
        let mut slice = self.open_slices.pop().ok_or(ModelError::UnbalancedEnd)?;
        slice.duration = Some(ts - slice.start);
        Ok(self.push_slice(slice))
    }

    /// Close every open slice at `max_timestamp`, or at the group's upper
    /// bound when none is given, marking each one as unfinished.
    pub fn auto_close_open_slices(&mut self, max_timestamp: Option<f64>) -> Result<()> {
        let max_timestamp = match max_timestamp {
            Some(ts) => ts,
            None => {
                self.update_bounds();
                match self.bounds.max {
                    Some(max) => max,
                    None => return Ok(()),
                }
            }
        };
        while !self.open_slices.is_empty() {
            let slice = self.end_slice(max_timestamp)?;
            slice.did_not_finish = true;
        }
        Ok(())
    }

    /// Shift every slice, open or closed, by `amount` milliseconds.
    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for slice in self.slices.iter_mut().chain(self.open_slices.iter_mut()) {
            slice.shift(amount);
        }
        self.update_bounds();
    }

    /// Recompute bounds from closed slices and the outermost and innermost
    /// open slice starts.
    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for slice in &self.slices {
            self.bounds.add_value(slice.start);
            self.bounds.add_value(slice.end());
        }
        if let (Some(first), Some(last)) = (self.open_slices.first(), self.open_slices.last()) {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.start);
        }
    }

    /// Drop all slices, closed and open.
    pub fn clear(&mut self) {
        self.slices.clear();
        self.open_slices.clear();
        self.bounds.reset();
    }

    /// Non-empty categories of the closed slices.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.slices
            .iter()
            .map(|s| s.category.as_str())
            .filter(|c| !c.is_empty())
    }

    /// Merge two groups recorded for the same thread into one correctly
    /// nested group.
    ///
    /// Slices of `group_a` are never split: when a slice of `group_b`
    /// straddles an `group_a` boundary it is cut into pieces at that
    /// boundary, and every piece after the first gets a " (cont.)" suffix.
    /// On equal end times the `group_a` slice encloses the `group_b` one.
    /// Neither input is modified.
    pub fn merge(group_a: &SliceGroup, group_b: &SliceGroup) -> Result<SliceGroup> {
        for (name, group) in [("A", group_a), ("B", group_b)] {
            if !group.open_slices.is_empty() {
                return Err(ModelError::UnmergeableOpenState {
                    group: name,
                    open: group.open_slices.len(),
                });
            }
        }

        let mut merger = Merger::with_capacity(group_a.len() + group_b.len());
        let mut rev_a = group_a.slices.iter().rev().peekable();
        let mut rev_b = group_b.slices.iter().rev().peekable();

        loop {
            let from_b = match (rev_a.peek(), rev_b.peek()) {
                (None, None) => break,
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => a.end() < b.end(),
            };
            let next = if from_b { rev_b.next() } else { rev_a.next() };
            let Some(next) = next.cloned() else { break };
            let end = next.end();

            merger.close_open_slices(Some(end));
            let index = merger.push(next);
            if from_b {
                merger.open_b.push(index);
            } else {
                merger.split_open_slices(end);
                merger.open_a.push(index);
            }
        }
        merger.close_open_slices(None);

        let mut slices = merger.result;
        slices.reverse();
        let mut merged = SliceGroup {
            slices,
            ..Default::default()
        };
        merged.update_bounds();
        Ok(merged)
    }
}

/// Working state of a merge. The result is built back to front; the open
/// stacks hold indices into it so split pieces can be truncated in place.
struct Merger {
    result: Vec<Slice>,
    open_a: Vec<usize>,
    open_b: Vec<usize>,
}

impl Merger {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            result: Vec::with_capacity(capacity),
            open_a: Vec::new(),
            open_b: Vec::new(),
        }
    }

    fn push(&mut self, slice: Slice) -> usize {
        self.result.push(slice);
        self.result.len() - 1
    }

    /// Pop open slices that start at or after `up_to` (all of them when
    /// `None`), later start first.
    fn close_open_slices(&mut self, up_to: Option<f64>) {
        let still_open = |start: Option<f64>| match (start, up_to) {
            (None, _) => true,
            (Some(start), Some(up_to)) => start < up_to,
            (Some(_), None) => false,
        };
        loop {
            let start_a = self.open_a.last().map(|&i| self.result[i].start);
            let start_b = self.open_b.last().map(|&i| self.result[i].start);
            if start_a.is_none() && start_b.is_none() {
                return;
            }
            if still_open(start_a) && still_open(start_b) {
                return;
            }
            match (start_a, start_b) {
                (Some(a), None) => {
                    self.split_open_slices(a);
                    self.open_a.pop();
                }
                (Some(a), Some(b)) if a > b => {
                    self.split_open_slices(a);
                    self.open_a.pop();
                }
                _ => {
                    self.open_b.pop();
                }
            }
        }
    }

    /// Cut every open B slice that strictly contains `when`. The piece
    /// already in the result keeps the part after `when` and becomes a
    /// continuation; a new piece covering the part before is pushed and
    /// replaces it on the open stack.
    fn split_open_slices(&mut self, when: f64) {
        for i in 0..self.open_b.len() {
            let index = self.open_b[i];
            let old = &mut self.result[index];
            let old_end = old.end();
            if when <= old.start || when >= old_end {
                continue;
            }
            let mut head = old.clone();
            head.duration = Some(when - head.start);

            old.start = when;
            old.duration = Some(old_end - when);
            old.title.push_str(CONTINUATION_SUFFIX);

            self.open_b[i] = self.push(head);
        }
    }
}
