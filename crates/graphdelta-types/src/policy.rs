use std::fmt;

use serde::{Deserialize, Serialize};

/// Controls whether and how traversal recurses into reference-typed members.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceHandling {
    /// Any member whose type is not immutable is rejected up front.
    Throw,
    /// Recurse fully; re-entering an instance already on the current path is a
    /// loop error.
    #[default]
    Structural,
    /// Recurse fully; a revisit links to the existing node and stops there.
    StructuralWithLoops,
    /// Compare and track references by identity, never recurse.
    ReferencesOnly,
}

impl ReferenceHandling {
    /// Returns `true` if traversal recurses into reference-typed members.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Structural | Self::StructuralWithLoops)
    }

    /// Returns `true` if re-entering an instance on the current path is fatal.
    pub fn rejects_loops(self) -> bool {
        matches!(self, Self::Structural)
    }
}

impl fmt::Display for ReferenceHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Throw => "throw",
            Self::Structural => "structural",
            Self::StructuralWithLoops => "structural-with-loops",
            Self::ReferencesOnly => "references-only",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_structural() {
        assert_eq!(ReferenceHandling::default(), ReferenceHandling::Structural);
    }

    #[test]
    fn structural_variants() {
        assert!(ReferenceHandling::Structural.is_structural());
        assert!(ReferenceHandling::StructuralWithLoops.is_structural());
        assert!(!ReferenceHandling::ReferencesOnly.is_structural());
        assert!(!ReferenceHandling::Throw.is_structural());
        assert!(ReferenceHandling::Structural.rejects_loops());
        assert!(!ReferenceHandling::StructuralWithLoops.rejects_loops());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&ReferenceHandling::StructuralWithLoops).unwrap();
        assert_eq!(json, "\"structural-with-loops\"");
        let back: ReferenceHandling = serde_json::from_str("\"references-only\"").unwrap();
        assert_eq!(back, ReferenceHandling::ReferencesOnly);
    }
}
