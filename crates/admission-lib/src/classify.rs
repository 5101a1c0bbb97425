//! Mapping of transport actions and REST paths to action types

use crate::models::ActionType;

/// Default transport action prefixes
const DEFAULT_ACTION_RULES: &[(&str, ActionType)] = &[
    ("indices:data/read/search", ActionType::Search),
    ("indices:data/read/msearch", ActionType::Search),
    ("indices:data/write/bulk", ActionType::Indexing),
    ("indices:data/write/index", ActionType::Indexing),
];

/// Default REST path endings
const DEFAULT_PATH_RULES: &[(&str, ActionType)] = &[
    ("/_search", ActionType::Search),
    ("/_msearch", ActionType::Search),
    ("/_bulk", ActionType::Indexing),
    ("/_doc", ActionType::Indexing),
];

/// Decides which action type, if any, a request is admitted as.
///
/// Actions are matched by prefix, REST paths by their last segments.
#[derive(Debug, Clone)]
pub struct ActionClassifier {
    action_rules: Vec<(String, ActionType)>,
}

impl Default for ActionClassifier {
    fn default() -> Self {
        Self {
            action_rules: DEFAULT_ACTION_RULES
                .iter()
                .map(|(prefix, t)| (prefix.to_string(), *t))
                .collect(),
        }
    }
}

impl ActionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action prefix rule; later rules lose to earlier ones
    pub fn with_rule(mut self, prefix: impl Into<String>, action_type: ActionType) -> Self {
        self.action_rules.push((prefix.into(), action_type));
        self
    }

    pub fn classify_action(&self, action: &str) -> Option<ActionType> {
        self.action_rules
            .iter()
            .find(|(prefix, _)| action.starts_with(prefix.as_str()))
            .map(|(_, t)| *t)
    }

    /// Classify a REST path such as `/logs/_search` or `/logs/_doc/1`
    pub fn classify_uri(&self, uri: &str) -> Option<ActionType> {
        let path = uri.split('?').next().unwrap_or_default().trim_end_matches('/');
        DEFAULT_PATH_RULES
            .iter()
            .find(|(suffix, _)| {
                path.ends_with(suffix) || path.contains(&format!("{suffix}/"))
            })
            .map(|(_, t)| *t)
    }
}
