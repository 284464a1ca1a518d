//! Role-set comparison strategies.

use std::collections::HashSet;
use std::fmt;

/// Policy deciding whether a subject's role assertion satisfies the role set
/// required by a rule.
pub trait ValueMatch: fmt::Debug + Send + Sync {
    fn is_match(&self, assertion: &HashSet<String>, values: &HashSet<String>) -> bool;
}

/// True when the assertion and the required set intersect.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatchAny;

impl ValueMatch for MatchAny {
    fn is_match(&self, assertion: &HashSet<String>, values: &HashSet<String>) -> bool {
        values.iter().any(|value| assertion.contains(value))
    }
}

/// True when the assertion holds every required role. Iterates the required
/// set, not the assertion: a subject carrying extra roles still matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatchAll;

impl ValueMatch for MatchAll {
    fn is_match(&self, assertion: &HashSet<String>, values: &HashSet<String>) -> bool {
        values.iter().all(|value| assertion.contains(value))
    }
}

/// True when the assertion and the required set do not intersect.
#[derive(Debug, Default, Clone, Copy)]
pub struct MatchNone;

impl ValueMatch for MatchNone {
    fn is_match(&self, assertion: &HashSet<String>, values: &HashSet<String>) -> bool {
        values.iter().all(|value| !assertion.contains(value))
    }
}
