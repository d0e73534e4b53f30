//! Invalidation records
//!
//! Bulk invalidation is best effort: a tag group may be only partly
//! removed if the store fails midway. The events produced here say which
//! keys were attempted and how many deletions failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Manual invalidation by key
    Manual,

    /// Invalidated by tag match
    TagMatch { tag: String },

    /// Metadata record whose data had already expired
    Orphaned,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
            InvalidationReason::Orphaned => write!(f, "orphaned record"),
        }
    }
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,

    /// Deletions that failed while processing this event
    pub failures: usize,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            failures: 0,
            context: None,
        }
    }

    pub fn with_failures(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }
}

/// Result of a multi-tag invalidation
#[derive(Debug, Clone, Default)]
pub struct InvalidationOutcome {
    pub events: Vec<InvalidationEvent>,
}

impl InvalidationOutcome {
    /// Total failed deletions across all events
    pub fn failures(&self) -> usize {
        self.events.iter().map(|e| e.failures).sum()
    }

    /// Every deletion succeeded
    pub fn is_complete(&self) -> bool {
        self.failures() == 0
    }

    /// Keys touched across all events
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.events.iter().flat_map(|e| e.keys.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_reason_display() {
        assert_eq!(InvalidationReason::Manual.to_string(), "manual invalidation");

        let reason = InvalidationReason::TagMatch {
            tag: "projects".to_string(),
        };
        assert!(reason.to_string().contains("projects"));
    }

    #[test]
    fn test_invalidation_event() {
        let event = InvalidationEvent::new(
            InvalidationReason::Manual,
            vec!["key1".to_string(), "key2".to_string()],
        )
        .with_failures(1)
        .with_context("test context".to_string());

        assert_eq!(event.keys.len(), 2);
        assert_eq!(event.failures, 1);
        assert_eq!(event.context, Some("test context".to_string()));
    }

    #[test]
    fn test_outcome_aggregation() {
        let outcome = InvalidationOutcome {
            events: vec![
                InvalidationEvent::new(
                    InvalidationReason::TagMatch { tag: "a".to_string() },
                    vec!["k1".to_string()],
                ),
                InvalidationEvent::new(
                    InvalidationReason::TagMatch { tag: "b".to_string() },
                    vec!["k2".to_string(), "k3".to_string()],
                )
                .with_failures(2),
            ],
        };

        assert_eq!(outcome.failures(), 2);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.keys().collect::<Vec<_>>(), vec!["k1", "k2", "k3"]);
        assert!(InvalidationOutcome::default().is_complete());
    }
}
