//! The [`Settings`] object consulted by the diff and tracking engines.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use graphdelta_types::{
    scalar, MemberInfo, Object, Path, ReferenceHandling, TypeInfo, Value,
};

use crate::config::{SettingsConfig, VisibilityFilter};
use crate::error::{SettingsError, SettingsResult};

/// Custom equality for values of one type.
pub type Comparer = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Per-type lookups, computed on first use.
struct TypeEntry {
    // Keeps the descriptor alive so its address stays a valid key.
    _type_info: Arc<TypeInfo>,
    selected: Arc<[Arc<MemberInfo>]>,
    resolved: HashMap<String, Option<Arc<MemberInfo>>>,
}

/// Resolved traversal settings.
///
/// Built once per configuration and shared by every traversal that uses it.
pub struct Settings {
    config: SettingsConfig,
    ignored_members: HashSet<String>,
    ignored_types: HashSet<String>,
    immutable_types: HashSet<String>,
    comparers: HashMap<String, Comparer>,
    types: RwLock<HashMap<usize, TypeEntry>>,
}

impl Settings {
    pub fn from_config(config: SettingsConfig) -> Self {
        Self {
            ignored_members: config.ignored_members.iter().cloned().collect(),
            ignored_types: config.ignored_types.iter().cloned().collect(),
            immutable_types: config.immutable_types.iter().cloned().collect(),
            comparers: HashMap::new(),
            types: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn config(&self) -> &SettingsConfig {
        &self.config
    }

    pub fn reference_handling(&self) -> ReferenceHandling {
        self.config.reference_handling
    }

    pub fn is_ignoring_declaring_type(&self, type_name: &str) -> bool {
        self.ignored_types.contains(type_name)
    }

    /// Returns `true` if the member is excluded explicitly, through its
    /// declaring type, or by the visibility filter.
    pub fn is_ignoring_member(&self, member: &MemberInfo) -> bool {
        self.is_ignoring_declaring_type(member.declaring_type())
            || !self.config.visibility.admits(member.visibility())
            || self.ignored_members.contains(&member.qualified_name())
    }

    /// Scalars and declared immutable types are compared by equality and
    /// never recursed into.
    pub fn is_immutable(&self, type_name: &str) -> bool {
        scalar::is_scalar(type_name) || self.immutable_types.contains(type_name)
    }

    pub fn comparer(&self, type_name: &str) -> Option<&Comparer> {
        self.comparers.get(type_name)
    }

    /// Leaf equality: a registered comparer for the value type, otherwise
    /// value equality for scalars and identity for references.
    pub fn equal_values(&self, x: &Value, y: &Value) -> bool {
        if x.type_name() == y.type_name() {
            if let Some(compare) = self.comparer(x.type_name()) {
                return compare(x, y);
            }
        }
        x == y
    }

    /// The uniform member accessor.
    pub fn get_value(&self, instance: &Object, member: &MemberInfo) -> SettingsResult<Value> {
        Ok(instance.get(member)?)
    }

    /// Members of `type_info` that take part in traversal, in declaration order.
    pub fn members(&self, type_info: &Arc<TypeInfo>) -> Arc<[Arc<MemberInfo>]> {
        let key = type_key(type_info);
        if let Some(entry) = self.read_types().get(&key) {
            return Arc::clone(&entry.selected);
        }
        let mut types = self.write_types();
        let entry = types.entry(key).or_insert_with(|| self.entry_for(type_info));
        Arc::clone(&entry.selected)
    }

    /// Resolve a member from a raw notification name.
    ///
    /// Returns `None` for names the type does not declare. Results, including
    /// misses, are cached per type.
    pub fn resolve_member(&self, type_info: &Arc<TypeInfo>, name: &str) -> Option<Arc<MemberInfo>> {
        let key = type_key(type_info);
        if let Some(hit) = self
            .read_types()
            .get(&key)
            .and_then(|entry| entry.resolved.get(name))
        {
            return hit.clone();
        }
        let resolved = type_info.member(name).cloned();
        trace!(type_name = type_info.name(), member = name, found = resolved.is_some(), "resolved member");
        let mut types = self.write_types();
        let entry = types.entry(key).or_insert_with(|| self.entry_for(type_info));
        entry.resolved.insert(name.to_string(), resolved.clone());
        resolved
    }

    // ---------------------------------------------------------------
    // Support checks
    // ---------------------------------------------------------------

    /// Fails under [`ReferenceHandling::Throw`] for members whose declared
    /// type is not immutable.
    pub fn ensure_supported(&self, member: &MemberInfo, path: &Path) -> SettingsResult<()> {
        let policy = self.reference_handling();
        if policy == ReferenceHandling::Throw && !self.is_immutable(member.value_type()) {
            return Err(SettingsError::UnsupportedMember {
                member: member.qualified_name(),
                value_type: member.value_type().to_string(),
                policy,
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Fails under [`ReferenceHandling::Throw`] for collections and arrays
    /// whose declared item type is not immutable.
    pub fn ensure_supported_items(&self, type_info: &TypeInfo, path: &Path) -> SettingsResult<()> {
        let policy = self.reference_handling();
        match type_info.item_type() {
            Some(item_type) if policy == ReferenceHandling::Throw && !self.is_immutable(item_type) => {
                Err(SettingsError::UnsupportedItems {
                    collection: type_info.name().to_string(),
                    item_type: item_type.to_string(),
                    policy,
                    path: path.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Fails for mutable types whose instances cannot raise change
    /// notifications.
    pub fn ensure_trackable(&self, type_info: &TypeInfo, path: &Path) -> SettingsResult<()> {
        if type_info.notifies() || self.is_immutable(type_info.name()) {
            Ok(())
        } else {
            Err(SettingsError::NotTrackable {
                type_name: type_info.name().to_string(),
                path: path.to_string(),
            })
        }
    }

    fn entry_for(&self, type_info: &Arc<TypeInfo>) -> TypeEntry {
        let selected: Vec<Arc<MemberInfo>> = type_info
            .members()
            .iter()
            .filter(|m| !self.is_ignoring_member(m))
            .cloned()
            .collect();
        TypeEntry {
            _type_info: Arc::clone(type_info),
            selected: selected.into(),
            resolved: HashMap::new(),
        }
    }

    fn read_types(&self) -> std::sync::RwLockReadGuard<'_, HashMap<usize, TypeEntry>> {
        self.types.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_types(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<usize, TypeEntry>> {
        self.types.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(SettingsConfig::default())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("config", &self.config)
            .field("comparers", &self.comparers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn type_key(type_info: &Arc<TypeInfo>) -> usize {
    Arc::as_ptr(type_info) as usize
}

/// Fluent construction of [`Settings`], including custom comparers that a
/// declarative [`SettingsConfig`] cannot express.
#[derive(Default)]
pub struct SettingsBuilder {
    config: SettingsConfig,
    comparers: HashMap<String, Comparer>,
}

impl SettingsBuilder {
    pub fn from_config(config: SettingsConfig) -> Self {
        Self {
            config,
            comparers: HashMap::new(),
        }
    }

    pub fn reference_handling(mut self, policy: ReferenceHandling) -> Self {
        self.config.reference_handling = policy;
        self
    }

    pub fn visibility(mut self, visibility: VisibilityFilter) -> Self {
        self.config.visibility = visibility;
        self
    }

    pub fn ignore_member(mut self, declaring_type: &str, name: &str) -> Self {
        self.config
            .ignored_members
            .push(format!("{declaring_type}.{name}"));
        self
    }

    pub fn ignore_type(mut self, type_name: impl Into<String>) -> Self {
        self.config.ignored_types.push(type_name.into());
        self
    }

    pub fn immutable(mut self, type_name: impl Into<String>) -> Self {
        self.config.immutable_types.push(type_name.into());
        self
    }

    /// Compare values of `type_name` with `compare` instead of equality.
    pub fn compare_with<F>(mut self, type_name: impl Into<String>, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.comparers.insert(type_name.into(), Arc::new(compare));
        self
    }

    pub fn build(self) -> Arc<Settings> {
        let mut settings = Settings::from_config(self.config);
        settings.comparers = self.comparers;
        Arc::new(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdelta_types::Visibility;

    fn person() -> Arc<TypeInfo> {
        TypeInfo::object("Person")
            .member("name", scalar::STRING)
            .member("age", scalar::INT)
            .member("friend", "Person")
            .private_member("secret", scalar::STRING)
            .build()
    }

    fn names(members: &[Arc<MemberInfo>]) -> Vec<&str> {
        members.iter().map(|m| m.name()).collect()
    }

    #[test]
    fn selects_public_members_by_default() {
        let settings = Settings::default();
        assert_eq!(names(&settings.members(&person())), ["name", "age", "friend"]);
    }

    #[test]
    fn visibility_all_includes_private_members() {
        let settings = Settings::builder().visibility(VisibilityFilter::All).build();
        let ty = person();
        let members = settings.members(&ty);
        assert_eq!(members.len(), 4);
        assert_eq!(members[3].visibility(), Visibility::Private);
    }

    #[test]
    fn ignored_members_and_types_are_excluded() {
        let ty = person();
        let settings = Settings::builder().ignore_member("Person", "age").build();
        assert_eq!(names(&settings.members(&ty)), ["name", "friend"]);
        assert!(settings.is_ignoring_member(ty.member("age").unwrap()));

        let settings = Settings::builder().ignore_type("Person").build();
        assert!(settings.members(&ty).is_empty());
        assert!(settings.is_ignoring_declaring_type("Person"));
    }

    #[test]
    fn member_selection_is_cached_per_type() {
        let settings = Settings::default();
        let ty = person();
        let a = settings.members(&ty);
        let b = settings.members(&ty);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn resolve_member_caches_hits_and_misses() {
        let settings = Settings::default();
        let ty = person();
        let hit = settings.resolve_member(&ty, "age").unwrap();
        assert!(Arc::ptr_eq(&hit, ty.member("age").unwrap()));
        assert!(settings.resolve_member(&ty, "nope").is_none());
        assert!(settings.resolve_member(&ty, "nope").is_none());
    }

    #[test]
    fn immutability() {
        let settings = Settings::builder().immutable("Point").build();
        assert!(settings.is_immutable(scalar::INT));
        assert!(settings.is_immutable("Point"));
        assert!(!settings.is_immutable("Person"));
        assert!(!settings.is_immutable(scalar::ANY));
    }

    #[test]
    fn throw_rejects_reference_members() {
        let ty = person();
        let settings = Settings::builder()
            .reference_handling(ReferenceHandling::Throw)
            .build();
        let path = Path::root("Person");

        assert!(settings.ensure_supported(ty.member("name").unwrap(), &path).is_ok());
        let err = settings
            .ensure_supported(ty.member("friend").unwrap(), &path)
            .unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedMember { ref member, .. } if member == "Person.friend"));
        assert!(err.to_string().contains("Person.friend"));

        let structural = Settings::default();
        assert!(structural.ensure_supported(ty.member("friend").unwrap(), &path).is_ok());
    }

    #[test]
    fn throw_rejects_mutable_items() {
        let settings = Settings::builder()
            .reference_handling(ReferenceHandling::Throw)
            .build();
        let path = Path::root("People");
        assert!(settings
            .ensure_supported_items(&TypeInfo::list("People", "Person"), &path)
            .is_err());
        assert!(settings
            .ensure_supported_items(&TypeInfo::list("Ints", scalar::INT), &path)
            .is_ok());
    }

    #[test]
    fn arrays_and_silent_types_are_not_trackable() {
        let settings = Settings::default();
        let path = Path::root("Grid");
        assert!(settings
            .ensure_trackable(&TypeInfo::array("Grid", scalar::INT, 2), &path)
            .is_err());
        assert!(settings.ensure_trackable(&person(), &path).is_ok());

        let frozen = Settings::builder().immutable("Grid").build();
        assert!(frozen
            .ensure_trackable(&TypeInfo::array("Grid", scalar::INT, 2), &path)
            .is_ok());
    }

    #[test]
    fn custom_comparer_applies_to_matching_types() {
        let settings = Settings::builder()
            .compare_with(scalar::FLOAT, |x, y| match (x, y) {
                (Value::Float(a), Value::Float(b)) => (a - b).abs() < 0.01,
                _ => false,
            })
            .build();
        assert!(settings.equal_values(&Value::Float(1.0), &Value::Float(1.001)));
        assert!(!settings.equal_values(&Value::Float(1.0), &Value::Float(1.1)));
        assert!(!settings.equal_values(&Value::Float(1.0), &Value::Int(1)));
        assert!(settings.equal_values(&Value::from("a"), &Value::from("a")));
    }

    #[test]
    fn accessor_reads_members() {
        let ty = person();
        let obj = Object::with_values(&ty, [("age", 3)]).unwrap();
        let settings = Settings::default();
        assert_eq!(settings.get_value(&obj, ty.member("age").unwrap()).unwrap(), Value::Int(3));
    }
}
