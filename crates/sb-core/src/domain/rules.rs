//! Subscription rules: SQL filter plus optional SQL action.

use serde::{Deserialize, Serialize};

/// Name of the rule every new subscription starts with.
pub const DEFAULT_RULE_NAME: &str = "$Default";

/// Filter expression that matches every message.
pub const TRUE_FILTER: &str = "1=1";

/// A filter/action pair attached to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub filter: String,
    pub action: Option<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: filter.into(),
            action: None,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// The broker's implicit pass-through rule.
    #[must_use]
    pub fn default_rule() -> Self {
        Self::new(DEFAULT_RULE_NAME, TRUE_FILTER)
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_RULE_NAME
    }

    /// Filter to put on the broker; action-only rules match everything.
    #[must_use]
    pub fn effective_filter(&self) -> &str {
        if self.filter.trim().is_empty() {
            TRUE_FILTER
        } else {
            &self.filter
        }
    }
}

/// Ordered rules keyed by name, built up from directive fragments.
///
/// Fragments for the same name are joined with a single space, in the
/// order they were supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter fragment to `rule_name`, creating the rule if needed.
    pub fn add_filter(&mut self, rule_name: &str, fragment: &str) {
        let rule = self.entry(rule_name);
        append_fragment(&mut rule.filter, fragment);
    }

    /// Append an action fragment to `rule_name`, creating the rule if needed.
    pub fn add_action(&mut self, rule_name: &str, fragment: &str) {
        let rule = self.entry(rule_name);
        let action = rule.action.get_or_insert_with(String::new);
        append_fragment(action, fragment);
    }

    /// Apply `name:filter[:action]`. Returns false if the directive was ignored.
    ///
    /// Everything after the second separator belongs to the action.
    pub fn apply_directive(&mut self, directive: &str) -> bool {
        let mut parts = directive.splitn(3, ':');
        let (Some(name), Some(filter)) = (parts.next(), parts.next()) else {
            return false;
        };
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.add_filter(name, filter);
        if let Some(action) = parts.next() {
            self.add_action(name, action);
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn entry(&mut self, rule_name: &str) -> &mut Rule {
        let index = match self.rules.iter().position(|rule| rule.name == rule_name) {
            Some(index) => index,
            None => {
                self.rules.push(Rule::new(rule_name, ""));
                self.rules.len() - 1
            }
        };
        &mut self.rules[index]
    }
}

impl IntoIterator for RuleSet {
    type Item = Rule;
    type IntoIter = std::vec::IntoIter<Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.into_iter()
    }
}

fn append_fragment(target: &mut String, fragment: &str) {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(fragment);
}
