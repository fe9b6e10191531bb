use std::collections::BTreeMap;
use std::sync::Arc;

use petal_core::TplValue;

/// Loop-state record bound under the repeat dictionary while its loop
/// is active.
#[derive(Debug, Clone)]
pub struct RepeatItem {
    pub index: usize,
    pub length: usize,
    items: Arc<Vec<TplValue>>,
}

impl RepeatItem {
    pub fn new(index: usize, items: Arc<Vec<TplValue>>) -> Self {
        Self {
            index,
            length: items.len(),
            items,
        }
    }

    pub fn number(&self) -> i64 {
        self.index as i64 + 1
    }

    pub fn start(&self) -> bool {
        self.index == 0
    }

    pub fn end(&self) -> bool {
        self.index + 1 == self.length
    }

    pub fn even(&self) -> bool {
        self.index % 2 == 0
    }

    pub fn odd(&self) -> bool {
        self.index % 2 == 1
    }

    pub fn parity(&self) -> &'static str {
        if self.even() {
            "even"
        } else {
            "odd"
        }
    }

    /// True when the current item starts a group: its value under the
    /// optional key path differs from the previous item's.
    pub fn first(&self, key_path: &str) -> bool {
        if self.index == 0 {
            return true;
        }
        let current = group_key(&self.items[self.index], key_path);
        let previous = group_key(&self.items[self.index - 1], key_path);
        current != previous
    }

    /// True when the current item ends a group.
    pub fn last(&self, key_path: &str) -> bool {
        if self.index + 1 >= self.length {
            return true;
        }
        let current = group_key(&self.items[self.index], key_path);
        let next = group_key(&self.items[self.index + 1], key_path);
        current != next
    }

    pub fn letter(&self) -> String {
        let mut index = self.index;
        let mut out = String::new();
        loop {
            let (rest, digit) = (index / 26, index % 26);
            out.insert(0, (b'a' + digit as u8) as char);
            if rest == 0 {
                return out;
            }
            index = rest - 1;
        }
    }

    pub fn letter_upper(&self) -> String {
        self.letter().to_uppercase()
    }

    pub fn roman_upper(&self) -> String {
        const VALUES: [(i64, &str); 13] = [
            (1000, "M"),
            (900, "CM"),
            (500, "D"),
            (400, "CD"),
            (100, "C"),
            (90, "XC"),
            (50, "L"),
            (40, "XL"),
            (10, "X"),
            (9, "IX"),
            (5, "V"),
            (4, "IV"),
            (1, "I"),
        ];
        let mut number = self.number();
        let mut out = String::new();
        for (value, numeral) in VALUES {
            while number >= value {
                out.push_str(numeral);
                number -= value;
            }
        }
        out
    }

    pub fn roman(&self) -> String {
        self.roman_upper().to_lowercase()
    }
}

fn group_key(item: &TplValue, key_path: &str) -> TplValue {
    if key_path.is_empty() {
        return item.clone();
    }
    let mut current = item.clone();
    for part in key_path.split('.') {
        let TplValue::Map(map) = current else {
            return TplValue::None;
        };
        current = map.get(part).cloned().unwrap_or(TplValue::None);
    }
    current
}

/// Mapping from loop-variable name to the active loop record. Entries
/// exist only while their loop runs; a nested loop shadows an outer
/// entry only on name collision and restores it afterwards.
#[derive(Debug, Clone, Default)]
pub struct RepeatDict {
    entries: BTreeMap<String, RepeatItem>,
}

impl RepeatDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a record, returning the shadowed outer record if any.
    pub fn enter(&mut self, name: &str, item: RepeatItem) -> Option<RepeatItem> {
        self.entries.insert(name.to_string(), item)
    }

    /// Remove the binding on loop exit, restoring a shadowed record.
    pub fn exit(&mut self, name: &str, shadowed: Option<RepeatItem>) {
        match shadowed {
            Some(previous) => {
                self.entries.insert(name.to_string(), previous);
            }
            None => {
                self.entries.remove(name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RepeatItem> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RepeatItem)> {
        self.entries.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
