use std::fmt;
use uuid::Uuid;

/// Process-unique token that replaces the executable path in a forwarded
/// command line.
///
/// Only used for diagnostics and to tell "no arguments" apart from
/// "arguments present"; it carries no authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceIdentity(Uuid);

impl InstanceIdentity {
    pub fn generate() -> Self {
        InstanceIdentity(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
