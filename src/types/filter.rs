use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::Message;

/// Predicate a consumer supplies at greet time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFilter {
    /// Accept every message
    #[default]
    All,
    /// Accept only messages whose type is in the set
    Types(BTreeSet<String>),
}

impl MessageFilter {
    /// Build a type filter from any list of type names
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MessageFilter::Types(types.into_iter().map(Into::into).collect())
    }

    /// Check whether a message passes the filter
    ///
    /// Untyped messages never match a type filter.
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MessageFilter::All => true,
            MessageFilter::Types(types) => message
                .message_type
                .as_ref()
                .map(|t| types.contains(t))
                .unwrap_or(false),
        }
    }

    /// Type names to push down to the message source, `None` for no filter
    pub fn type_list(&self) -> Option<Vec<String>> {
        match self {
            MessageFilter::All => None,
            MessageFilter::Types(types) => Some(types.iter().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_matches_everything() {
        let filter = MessageFilter::All;
        assert!(filter.matches(&Message::new(1, "a")));
        assert!(filter.matches(&Message::new(2, "b").with_type("Order")));
        assert_eq!(filter.type_list(), None);
    }

    #[test]
    fn test_type_filter() {
        let filter = MessageFilter::types(["Order", "Refund"]);
        assert!(filter.matches(&Message::new(1, "a").with_type("Order")));
        assert!(!filter.matches(&Message::new(2, "b").with_type("Shipment")));
        assert!(!filter.matches(&Message::new(3, "c")));
        assert_eq!(
            filter.type_list(),
            Some(vec!["Order".to_string(), "Refund".to_string()])
        );
    }
}
