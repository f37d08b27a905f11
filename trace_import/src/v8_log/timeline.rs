//! Turns the call stacks of successive ticks into nested intervals.

use trace_model::color::string_color_id;
use trace_model::{Args, Slice, SliceGroup};

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    name: String,
    start: f64,
    end: f64,
    children: Vec<Frame>,
}

/// A frame stays open while every consecutive tick has it at the same
/// depth under the same parents.
#[derive(Debug, Clone, Default)]
pub struct StackTimeline {
    roots: Vec<Frame>,
    last_tick: Option<f64>,
}

impl StackTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the stack of a tick at `ts`, outermost frame first.
    pub fn add_tick(&mut self, ts: f64, frames: impl IntoIterator<Item = String>) {
        let previous = self.last_tick.replace(ts);
        let mut level = &mut self.roots;
        for name in frames {
            let continues = matches!(level.last(), Some(frame) if frame.name == name && Some(frame.end) == previous);
            if !continues {
                level.push(Frame {
                    name,
                    start: ts,
                    end: ts,
                    children: Vec::new(),
                });
            }
            let Some(frame) = level.last_mut() else {
                break;
            };
            frame.end = ts;
            level = &mut frame.children;
        }
    }

    /// Push every interval onto `group`. Children go first so that a
    /// parent with the same extent still ends up enclosing them.
    pub fn push_slices(&self, group: &mut SliceGroup) {
        fn push(frames: &[Frame], group: &mut SliceGroup) {
            for frame in frames {
                push(&frame.children, group);
                let slice = Slice::complete("v8", frame.name.as_str(), frame.start, frame.end - frame.start, Args::new())
                    .with_color_id(string_color_id(&frame.name));
                group.push_slice(slice);
            }
        }
        push(&self.roots, group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn consecutive_frames_are_extended() {
        let mut timeline = StackTimeline::new();
        timeline.add_tick(1.0, frames(&["a", "b"]));
        timeline.add_tick(2.0, frames(&["a", "b"]));
        timeline.add_tick(3.0, frames(&["a"]));
        timeline.add_tick(4.0, frames(&["a", "b"]));
        timeline.add_tick(5.0, frames(&["c"]));

        let mut group = SliceGroup::new();
        timeline.push_slices(&mut group);
        let slices: Vec<(&str, f64, Option<f64>)> = group
            .slices()
            .iter()
            .map(|s| (s.title.as_str(), s.start, s.duration))
            .collect();
        assert_eq!(
            slices,
            vec![
                ("b", 1.0, Some(1.0)),
                ("b", 4.0, Some(0.0)),
                ("a", 1.0, Some(3.0)),
                ("c", 5.0, Some(0.0)),
            ]
        );
    }
}
