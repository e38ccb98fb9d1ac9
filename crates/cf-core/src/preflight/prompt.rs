//! Input provider contract for interactive credential fallback.
//!
//! The core never talks to a terminal. When the front-end wants to rescue
//! a run with missing credentials it attaches an implementation of this
//! trait; otherwise preflight fails with the aggregated error. Secret
//! inputs must never be echoed, logged, or placed in process arguments by
//! the implementation.

use std::io;

/// Source of interactively supplied values.
pub trait InputProvider {
    /// Request one value. `label` names what is being asked for (an env
    /// key or `primary model`); `secret` demands non-echoing entry.
    fn provide(&self, label: &str, secret: bool) -> io::Result<String>;
}

/// Canned answers keyed by label, for tests and scripted runs.
#[cfg(any(test, feature = "test-utils"))]
pub struct ScriptedInput {
    answers: std::collections::HashMap<String, String>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ScriptedInput {
    pub fn new(answers: &[(&str, &str)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl InputProvider for ScriptedInput {
    fn provide(&self, label: &str, _secret: bool) -> io::Result<String> {
        self.answers.get(label).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no scripted answer for {label}"))
        })
    }
}
