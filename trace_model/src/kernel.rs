//! Per-CPU scheduling data recorded by kernel traces.

use crate::range::Range;
use crate::slice::Slice;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Cpu {
    pub number: u32,
    /// What ran on this CPU, in time order.
    pub slices: Vec<Slice>,
    #[serde(skip)]
    pub bounds: Range,
}

impl Cpu {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        if let (Some(first), Some(last)) = (self.slices.first(), self.slices.last()) {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.end());
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for slice in &mut self.slices {
            slice.shift(amount);
        }
        self.update_bounds();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kernel {
    pub cpus: BTreeMap<u32, Cpu>,
    #[serde(skip)]
    pub bounds: Range,
}

impl Kernel {
    pub fn get_or_create_cpu(&mut self, number: u32) -> &mut Cpu {
        self.cpus.entry(number).or_insert_with(|| Cpu::new(number))
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.values().all(|cpu| cpu.slices.is_empty())
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for cpu in self.cpus.values_mut() {
            cpu.update_bounds();
            self.bounds.add_range(&cpu.bounds);
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for cpu in self.cpus.values_mut() {
            cpu.shift_timestamps_forward(amount);
        }
        self.update_bounds();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Args;

    #[test]
    fn cpu_bounds() {
        let mut kernel = Kernel::default();
        assert!(kernel.is_empty());
        let cpu = kernel.get_or_create_cpu(1);
        cpu.slices.push(Slice::complete("", "a", 1.0, 2.0, Args::new()));
        cpu.slices.push(Slice::complete("", "b", 4.0, 1.0, Args::new()));
        kernel.update_bounds();
        assert!(!kernel.is_empty());
        assert_eq!(kernel.bounds.min, Some(1.0));
        assert_eq!(kernel.bounds.max, Some(5.0));

        kernel.shift_timestamps_forward(-1.0);
        assert_eq!(kernel.cpus[&1].slices[1].start, 3.0);
        assert_eq!(kernel.bounds.min, Some(0.0));
    }
}
