//! Action-scoped authorization rules.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use super::matching::{MatchAll, MatchAny, MatchNone, ValueMatch};
use crate::context::Subject;

/// Declared JSON shape for a function role, carried by the
/// `core.function.roles` configuration key.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionRoleSpec {
    pub action: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, rename = "match")]
    pub strategy: MatchKind,
}

/// Named match strategy in a role declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    #[default]
    Any,
    All,
    None,
}

impl MatchKind {
    pub fn strategy(self) -> Arc<dyn ValueMatch> {
        match self {
            Self::Any => Arc::new(MatchAny),
            Self::All => Arc::new(MatchAll),
            Self::None => Arc::new(MatchNone),
        }
    }
}

/// Permission rule binding an action name to a required role set and a
/// matching strategy.
#[derive(Debug, Clone)]
pub struct FunctionRole {
    action: String,
    roles: HashSet<String>,
    strategy: Arc<dyn ValueMatch>,
}

impl FunctionRole {
    pub fn new(
        action: &str,
        roles: impl IntoIterator<Item = impl Into<String>>,
        strategy: Arc<dyn ValueMatch>,
    ) -> Self {
        Self {
            action: action.to_ascii_lowercase(),
            roles: roles.into_iter().map(Into::into).collect(),
            strategy,
        }
    }

    pub fn from_spec(spec: FunctionRoleSpec) -> Self {
        Self::new(&spec.action, spec.roles, spec.strategy.strategy())
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    /// Returns false (not an error) when `action` is not the bound action;
    /// otherwise delegates to the strategy.
    pub fn authorize(&self, action: &str, subject: &Subject) -> bool {
        if !action.eq_ignore_ascii_case(&self.action) {
            return false;
        }
        self.strategy.is_match(subject.roles(), &self.roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_actions_are_refused_without_an_error() {
        let role = FunctionRole::new("process", ["admin"], Arc::new(MatchAny));
        let subject = Subject::new("anonymous");
        assert!(!role.authorize("save", &subject));
    }

    #[test]
    fn action_comparison_ignores_case() {
        let role = FunctionRole::new("Process", ["admin"], Arc::new(MatchAny));
        let subject = Subject::with_roles("ops", ["admin"]);
        assert!(role.authorize("PROCESS", &subject));
    }

    #[test]
    fn strategy_decides_the_bound_action() {
        let role = FunctionRole::new("process", ["admin", "auditor"], Arc::new(MatchAll));
        let partial = Subject::with_roles("ops", ["admin"]);
        assert!(!role.authorize("process", &partial));

        let full = Subject::with_roles("ops", ["admin", "auditor", "extra"]);
        assert!(role.authorize("process", &full));
    }

    #[test]
    fn specs_deserialize_with_defaults() {
        let spec: FunctionRoleSpec =
            serde_json::from_str(r#"{"action": "Save", "roles": ["writer"]}"#).unwrap();
        assert_eq!(spec.strategy, MatchKind::Any);
        let role = FunctionRole::from_spec(spec);
        assert_eq!(role.action(), "save");
    }

    #[test]
    fn match_none_specs_deny_listed_roles() {
        let spec: FunctionRoleSpec = serde_json::from_str(
            r#"{"action": "process", "roles": ["banned"], "match": "none"}"#,
        )
        .unwrap();
        let role = FunctionRole::from_spec(spec);
        assert!(role.authorize("process", &Subject::with_roles("u", ["reader"])));
        assert!(!role.authorize("process", &Subject::with_roles("u", ["banned"])));
    }
}
