//! Iteration and duplicate-call guard for one tool-calling loop invocation.
//!
//! The guard is created fresh at every loop entry; nothing it counts
//! outlives the invocation.

use std::collections::{HashMap, HashSet};

/// Response returned when the loop runs out of iterations.
pub const ITERATION_LIMIT_RESPONSE: &str = "I'm sorry, but I tried too many operations while working on \
your request and had to stop. Please try again with a simpler or more specific request.";

/// Tool-result text for a call suppressed by the duplicate guard.
pub fn loop_detected_message(tool_name: &str, count: u32) -> String {
    format!(
        "LOOP DETECTED: {tool_name} has been called {count} times with identical input. \
Do not call it again; answer the user with the information you already have."
    )
}

/// Deduplication key of a tool call: name plus input JSON with sorted keys.
pub fn call_signature(tool_name: &str, input: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical(input, &mut canonical);
    format!("{tool_name}:{canonical}")
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Result of entering the tool-use branch once more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationCheck {
    Continue,
    /// Two iterations left before the limit
    Warn,
    Exceeded,
}

/// Result of recording one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCheck {
    Proceed,
    LoopDetected { count: u32 },
}

/// Counts iterations and identical tool calls.
#[derive(Debug)]
pub struct CallGuard {
    max_iterations: u32,
    max_duplicate_calls: u32,
    iterations: u32,
    counts: HashMap<String, u32>,
}

impl CallGuard {
    pub fn new(max_iterations: u32, max_duplicate_calls: u32) -> Self {
        Self {
            max_iterations,
            max_duplicate_calls,
            iterations: 0,
            counts: HashMap::new(),
        }
    }

    /// Count one pass through the tool-use branch.
    pub fn begin_iteration(&mut self) -> IterationCheck {
        self.iterations += 1;
        if self.iterations > self.max_iterations {
            IterationCheck::Exceeded
        } else if self.max_iterations.checked_sub(2) == Some(self.iterations) {
            IterationCheck::Warn
        } else {
            IterationCheck::Continue
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Count one tool call. Counting continues past the threshold.
    pub fn record_call(&mut self, tool_name: &str, input: &serde_json::Value) -> CallCheck {
        let count = self
            .counts
            .entry(call_signature(tool_name, input))
            .or_insert(0);
        *count += 1;
        if *count > self.max_duplicate_calls {
            CallCheck::LoopDetected { count: *count }
        } else {
            CallCheck::Proceed
        }
    }
}

/// Insertion-ordered set of names.
#[derive(Debug, Clone, Default)]
pub struct OrderedNameSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedNameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the name was not present.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.seen.contains(name) {
            return false;
        }
        self.seen.insert(name.to_string());
        self.order.push(name.to_string());
        true
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}
