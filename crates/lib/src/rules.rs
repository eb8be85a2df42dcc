//! Conditional allow/disallow rules for platform-dependent resources.
//!
//! A rule set is an ordered list; the last rule whose condition matches
//! the current platform (an absent condition always matches) determines
//! the outcome. An empty rule set allows; a non-empty set where nothing
//! matched disallows.

use modsync_platform::{Arch, Os, Platform};
use serde::{Deserialize, Serialize};

/// The outcome of evaluating a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  Allow,
  Disallow,
}

/// Platform condition attached to a rule. Absent fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsCondition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<Os>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub arch: Option<Arch>,
}

impl OsCondition {
  pub fn matches(&self, platform: &Platform) -> bool {
    self.name.is_none_or(|name| name == platform.os) && self.arch.is_none_or(|arch| arch == platform.arch)
  }
}

/// One conditional statement in a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
  pub action: Action,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub os: Option<OsCondition>,
}

impl Rule {
  fn applies(&self, platform: &Platform) -> bool {
    self.os.as_ref().is_none_or(|condition| condition.matches(platform))
  }
}

/// Evaluate an ordered rule set against a platform. Last match wins.
pub fn evaluate(rules: &[Rule], platform: &Platform) -> Action {
  if rules.is_empty() {
    return Action::Allow;
  }

  let mut action = None;
  for rule in rules {
    if rule.applies(platform) {
      action = Some(rule.action);
    }
  }

  action.unwrap_or(Action::Disallow)
}
