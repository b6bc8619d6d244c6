//! Prompt marker type.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Global counter for marker generation.
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique prompt string installed as `PS1` on a character stream.
///
/// Markers combine a process-wide counter with a random UUID, so they are
/// unique within the process and unlikely to appear in command output.
/// They are alphanumeric, which keeps them safe to embed unquoted in
/// shell text. The value is generated internally and never taken from
/// user input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptMarker(String);

impl PromptMarker {
    /// Create a new unique marker.
    pub fn new() -> Self {
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("PS{:08x}{}", seq, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for PromptMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PromptMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uniqueness() {
        let mut markers = HashSet::new();
        for _ in 0..10_000 {
            let marker = PromptMarker::new();
            assert!(markers.insert(marker.clone()), "Duplicate marker: {}", marker);
        }
    }

    #[test]
    fn test_alphanumeric() {
        let marker = PromptMarker::new();
        assert!(marker.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(marker.as_str().starts_with("PS"));
        assert_eq!(marker.as_str().len(), 2 + 8 + 32);
    }

    #[test]
    fn test_display_matches_bytes() {
        let marker = PromptMarker::new();
        assert_eq!(marker.to_string().as_bytes(), marker.as_bytes());
    }
}
