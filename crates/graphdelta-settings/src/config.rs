use serde::{Deserialize, Serialize};

use graphdelta_types::{ReferenceHandling, Visibility};

/// Which member visibilities take part in traversal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisibilityFilter {
    /// Public members only.
    #[default]
    Public,
    /// Public and private members.
    All,
}

impl VisibilityFilter {
    pub fn admits(self, visibility: Visibility) -> bool {
        match self {
            Self::Public => visibility == Visibility::Public,
            Self::All => true,
        }
    }
}

/// Declarative settings, loadable from TOML or JSON.
///
/// Members are named `Type.member`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Policy for recursing into reference-typed members.
    pub reference_handling: ReferenceHandling,
    /// Member visibilities that take part.
    pub visibility: VisibilityFilter,
    /// Members excluded from comparison and tracking.
    pub ignored_members: Vec<String>,
    /// Types whose declared members are all excluded.
    pub ignored_types: Vec<String>,
    /// Types compared by equality and never recursed into.
    pub immutable_types: Vec<String>,
}

impl SettingsConfig {
    /// Default configuration with a different reference-handling policy.
    pub fn with_reference_handling(reference_handling: ReferenceHandling) -> Self {
        Self {
            reference_handling,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = SettingsConfig::default();
        assert_eq!(c.reference_handling, ReferenceHandling::Structural);
        assert_eq!(c.visibility, VisibilityFilter::Public);
        assert!(c.ignored_members.is_empty());
        assert!(c.immutable_types.is_empty());
    }

    #[test]
    fn loads_partial_toml() {
        let c: SettingsConfig = toml::from_str(
            r#"
            reference_handling = "structural-with-loops"
            ignored_members = ["Person.age"]
            "#,
        )
        .unwrap();
        assert_eq!(c.reference_handling, ReferenceHandling::StructuralWithLoops);
        assert_eq!(c.ignored_members, vec!["Person.age".to_string()]);
        assert_eq!(c.visibility, VisibilityFilter::Public);
    }

    #[test]
    fn visibility_filter() {
        assert!(VisibilityFilter::Public.admits(Visibility::Public));
        assert!(!VisibilityFilter::Public.admits(Visibility::Private));
        assert!(VisibilityFilter::All.admits(Visibility::Private));
    }

    #[test]
    fn json_roundtrip() {
        let c = SettingsConfig {
            immutable_types: vec!["Point".into()],
            ..SettingsConfig::with_reference_handling(ReferenceHandling::Throw)
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: SettingsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
