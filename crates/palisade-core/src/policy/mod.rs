//! Access control policy engine
//!
//! Decides whether a request target may be invoked at all, independent of
//! per-plugin grants. Each request kind (getter/action/mutation) carries an
//! ordered blacklist and whitelist of target patterns: exact strings, a
//! trailing-wildcard prefix (`"db/*"`), or the single-entry list `["*"]`
//! meaning every target of that kind.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The three request kinds a plugin can issue against host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Getter,
    Action,
    Mutation,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Getter => "getter",
            Self::Action => "action",
            Self::Mutation => "mutation",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind pattern lists.
pub type PatternLists = HashMap<RequestKind, Vec<String>>;

/// Static allow/deny rules evaluated for every bridge request.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    blacklist: PatternLists,
    whitelist: PatternLists,
}

impl AccessPolicy {
    pub fn new(blacklist: PatternLists, whitelist: PatternLists) -> Self {
        Self {
            blacklist,
            whitelist,
        }
    }

    /// A policy that denies everything. Useful as a hardened baseline to
    /// whitelist exceptions onto.
    pub fn deny_all() -> Self {
        let mut blacklist = PatternLists::new();
        for kind in [RequestKind::Getter, RequestKind::Action, RequestKind::Mutation] {
            blacklist.insert(kind, vec!["*".to_string()]);
        }
        Self::new(blacklist, PatternLists::new())
    }

    /// Whether the target passes the allow/deny rule for its kind.
    ///
    /// A kind whose blacklist is exactly `["*"]` is deny-all with
    /// whitelisted exceptions; otherwise specific blacklist entries deny and
    /// everything else is allowed.
    pub fn allows(&self, kind: RequestKind, target: &str) -> bool {
        let blacklist = self.blacklist.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
        let whitelist = self.whitelist.get(&kind).map(Vec::as_slice).unwrap_or(&[]);

        let wildcard_deny = is_wildcard_only(blacklist);
        let wildcard_allow = is_wildcard_only(whitelist);

        let whitelisted = whitelist.iter().any(|p| p == target)
            || (!wildcard_allow && whitelist.iter().any(|p| prefix_matches(p, target)));
        let blacklisted = blacklist.iter().any(|p| p == target)
            || (!wildcard_deny && blacklist.iter().any(|p| prefix_matches(p, target)));

        !((wildcard_deny && !whitelisted) || blacklisted)
    }

    /// Evaluate the policy, failing with `AccessDenied` on a denied target.
    pub fn assert_allowed(&self, kind: RequestKind, target: &str) -> Result<()> {
        if self.allows(kind, target) {
            Ok(())
        } else {
            Err(Error::AccessDenied(kind.as_str().to_string(), target.to_string()))
        }
    }
}

impl Default for AccessPolicy {
    /// Deny-all with the plugin database surface whitelisted: `db/*`
    /// actions and the `db/tables`/`db/entries` getters. Host-state targets
    /// need an operator-supplied policy on top of per-plugin grants.
    fn default() -> Self {
        let mut whitelist = PatternLists::new();
        whitelist.insert(RequestKind::Action, vec!["db/*".to_string()]);
        whitelist.insert(
            RequestKind::Getter,
            vec!["db/tables".to_string(), "db/entries".to_string()],
        );

        let mut policy = Self::deny_all();
        policy.whitelist = whitelist;
        policy
    }
}

fn is_wildcard_only(patterns: &[String]) -> bool {
    patterns.len() == 1 && patterns[0] == "*"
}

/// Trailing-wildcard prefix match: `"foo/*"` matches any target starting
/// with `"foo/"`. Exact patterns never prefix-match.
fn prefix_matches(pattern: &str, target: &str) -> bool {
    pattern
        .strip_suffix('*')
        .is_some_and(|prefix| !prefix.is_empty() && target.starts_with(prefix))
}
