//! file: core/src/ir/lower/names.rs
//! description: unique name issuing for one conversion.
//!
//! A `NameGenerator` is created by the driver and threaded by `&mut` through
//! every builder of a conversion, so all graph levels draw from one pool and
//! two conversions in the same process never share state.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct NameGenerator {
    counters: HashMap<String, usize>,
    instances: HashMap<String, usize>,
    used: HashSet<String>,
}

impl NameGenerator {
    pub fn new() -> Self {
        NameGenerator::default()
    }

    /// Issue `{base}_{n}` with the smallest per-base counter not yet taken.
    pub fn fresh(&mut self, base: &str) -> String {
        let counter = self.counters.entry(base.to_string()).or_insert(0);
        loop {
            let candidate = format!("{}_{}", base, *counter);
            *counter += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Issue a name for one occurrence of a logical instance (e.g. a
    /// sub-module call site). The first occurrence gets `base` itself when it
    /// is free; later ones get `{base}_{k}` with k counting occurrences.
    pub fn instance(&mut self, base: &str) -> String {
        let seen = self.instances.entry(base.to_string()).or_insert(0);
        *seen += 1;
        let mut k = *seen;
        let mut candidate = if k == 1 { base.to_string() } else { format!("{}_{}", base, k) };
        while !self.used.insert(candidate.clone()) {
            k += 1;
            candidate = format!("{}_{}", base, k);
        }
        if let Some(seen) = self.instances.get_mut(base) {
            *seen = k;
        }
        candidate
    }

    /// Mark an externally chosen name as taken. Returns false if it already was.
    pub fn reserve(&mut self, name: &str) -> bool {
        self.used.insert(name.to_string())
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }
}
