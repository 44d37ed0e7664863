//! Fixture lifetimes, widest first.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How long a fixture value lives
///
/// Ordered by breadth: `Session > Package > Module > Class > Function`.
/// A fixture may depend only on fixtures of the same or a wider scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Session,
    Package,
    Module,
    Class,
    Function,
}

impl Scope {
    pub const ALL: [Scope; 5] = [
        Scope::Session,
        Scope::Package,
        Scope::Module,
        Scope::Class,
        Scope::Function,
    ];

    fn depth(self) -> u8 {
        match self {
            Scope::Session => 0,
            Scope::Package => 1,
            Scope::Module => 2,
            Scope::Class => 3,
            Scope::Function => 4,
        }
    }

    /// True if a value of scope `self` outlives every value of scope `other`
    pub fn is_wider_than(self, other: Scope) -> bool {
        self.depth() < other.depth()
    }

    /// True if `self` lives at least as long as `other`
    pub fn contains(self, other: Scope) -> bool {
        self.depth() <= other.depth()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Session => "session",
            Scope::Package => "package",
            Scope::Module => "module",
            Scope::Class => "class",
            Scope::Function => "function",
        }
    }
}

impl PartialOrd for Scope {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// `Session` is the greatest scope
impl Ord for Scope {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.depth().cmp(&self.depth())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
