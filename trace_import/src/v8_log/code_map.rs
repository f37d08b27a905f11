//! Address to code lookup for V8 ticks.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    pub size: u64,
    pub name: String,
}

impl CodeEntry {
    pub fn new(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            name: name.into(),
        }
    }
}

/// Non-overlapping code ranges keyed by start address.
#[derive(Debug, Clone, Default)]
struct RangeMap {
    entries: BTreeMap<u64, CodeEntry>,
}

impl RangeMap {
    /// Insert `entry` at `start`, dropping anything it overlaps.
    fn insert(&mut self, start: u64, entry: CodeEntry) {
        let end = start.saturating_add(entry.size);
        let covered: Vec<u64> = self
            .entries
            .range(..end)
            .filter(|&(&other, e)| other.saturating_add(e.size) > start)
            .map(|(&other, _)| other)
            .collect();
        for other in covered {
            self.entries.remove(&other);
        }
        self.entries.insert(start, entry);
    }

    fn find(&self, address: u64) -> Option<&CodeEntry> {
        let (&start, entry) = self.entries.range(..=address).next_back()?;
        (address < start.saturating_add(entry.size)).then_some(entry)
    }
}

/// Dynamically generated code, which can move and be collected, in front
/// of the static code of loaded libraries.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    dynamic: RangeMap,
    libraries: RangeMap,
}

impl CodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code(&mut self, start: u64, entry: CodeEntry) {
        self.dynamic.insert(start, entry);
    }

    pub fn move_code(&mut self, from: u64, to: u64) {
        if let Some(entry) = self.dynamic.entries.remove(&from) {
            self.dynamic.insert(to, entry);
        }
    }

    pub fn delete_code(&mut self, start: u64) {
        self.dynamic.entries.remove(&start);
    }

    pub fn add_library(&mut self, start: u64, entry: CodeEntry) {
        self.libraries.insert(start, entry);
    }

    pub fn find_entry(&self, address: u64) -> Option<&CodeEntry> {
        self.dynamic.find(address).or_else(|| self.libraries.find(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(map: &CodeMap, address: u64) -> Option<&str> {
        map.find_entry(address).map(|e| e.name.as_str())
    }

    #[test]
    fn dynamic_code_shadows_libraries() {
        let mut map = CodeMap::new();
        map.add_library(0x1000, CodeEntry::new(0x1000, "libv8.so"));
        map.add_code(0x1800, CodeEntry::new(0x10, "Foo"));

        assert_eq!(name(&map, 0x1808), Some("Foo"));
        assert_eq!(name(&map, 0x1810), Some("libv8.so"));
        assert_eq!(name(&map, 0x0fff), None);
        assert_eq!(name(&map, 0x2000), None);
    }

    #[test]
    fn move_and_delete() {
        let mut map = CodeMap::new();
        map.add_code(0x100, CodeEntry::new(0x10, "Foo"));
        map.move_code(0x100, 0x200);
        assert_eq!(name(&map, 0x100), None);
        assert_eq!(name(&map, 0x20f), Some("Foo"));

        map.move_code(0x999, 0x300);
        assert_eq!(name(&map, 0x300), None);

        map.delete_code(0x200);
        assert_eq!(name(&map, 0x200), None);
    }

    #[test]
    fn new_code_replaces_overlapped_code() {
        let mut map = CodeMap::new();
        map.add_code(0x100, CodeEntry::new(0x20, "Old"));
        map.add_code(0x130, CodeEntry::new(0x10, "Neighbor"));
        map.add_code(0x110, CodeEntry::new(0x10, "New"));

        assert_eq!(name(&map, 0x100), None);
        assert_eq!(name(&map, 0x115), Some("New"));
        assert_eq!(name(&map, 0x135), Some("Neighbor"));
    }
}
