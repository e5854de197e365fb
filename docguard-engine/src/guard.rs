//! Route guard: action-level allow/deny before any document is touched

use std::collections::BTreeMap;

use docguard_api::Action;

use crate::error::{AccessResult, EvaluationError};
use crate::rule::{Rule, RuleContext};

/// One rule per guarded action; unspecified actions deny
#[derive(Debug, Clone, Default)]
pub struct ActionRules {
    pub list: Rule,
    pub read: Rule,
    pub create: Rule,
    pub update: Rule,
    pub delete: Rule,
}

impl ActionRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same rule for every action
    pub fn all(rule: impl Into<Rule>) -> Self {
        let rule = rule.into();
        Self {
            list: rule.clone(),
            read: rule.clone(),
            create: rule.clone(),
            update: rule.clone(),
            delete: rule,
        }
    }

    pub fn list(mut self, rule: impl Into<Rule>) -> Self {
        self.list = rule.into();
        self
    }

    pub fn read(mut self, rule: impl Into<Rule>) -> Self {
        self.read = rule.into();
        self
    }

    pub fn create(mut self, rule: impl Into<Rule>) -> Self {
        self.create = rule.into();
        self
    }

    pub fn update(mut self, rule: impl Into<Rule>) -> Self {
        self.update = rule.into();
        self
    }

    pub fn delete(mut self, rule: impl Into<Rule>) -> Self {
        self.delete = rule.into();
        self
    }

    /// Rule governing `action` (count and distinct use list)
    pub fn rule(&self, action: Action) -> &Rule {
        match action.guard_action() {
            Action::Read => &self.read,
            Action::Create => &self.create,
            Action::Update => &self.update,
            Action::Delete => &self.delete,
            _ => &self.list,
        }
    }
}

/// Guard rules of a collection plus per-sub-collection overrides.
///
/// Sub-collection guards are one level deep and replace, rather than
/// combine with, the collection's own rules.
#[derive(Debug, Clone, Default)]
pub struct RouteGuardConfig {
    pub rules: ActionRules,
    pub subs: BTreeMap<String, ActionRules>,
}

impl RouteGuardConfig {
    pub fn new(rules: ActionRules) -> Self {
        Self {
            rules,
            subs: BTreeMap::new(),
        }
    }

    pub fn sub(mut self, name: impl Into<String>, rules: ActionRules) -> Self {
        self.subs.insert(name.into(), rules);
        self
    }

    /// Evaluate the guard. An unknown sub-collection denies.
    pub async fn check(
        &self,
        action: Action,
        sub_collection: Option<&str>,
        ctx: &RuleContext<'_>,
    ) -> AccessResult<bool> {
        let rules = match sub_collection {
            None => &self.rules,
            Some(name) => match self.subs.get(name) {
                Some(rules) => rules,
                None => return Ok(false),
            },
        };

        let action = action.guard_action();
        rules.rule(action).evaluate(ctx).await.map_err(|e| {
            let location = match sub_collection {
                Some(sub) => format!("route guard '{}' of sub-collection '{}'", action, sub),
                None => format!("route guard '{}'", action),
            };
            EvaluationError::new(location, e).into()
        })
    }
}
