//! Qualifiers: structural markers used to tell apart beans of the same type.
//!
//! Two qualifiers are equal when their names and member values are equal.
//! Every bean implicitly carries `@Any`; a bean with no other qualifier
//! (besides `@Named`) also carries `@Default`.

use std::collections::{BTreeMap, BTreeSet};

const ANY: &str = "Any";
const DEFAULT: &str = "Default";
const NAMED: &str = "Named";

/// A qualifier value: a name plus optional members
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier {
    name: String,
    members: BTreeMap<String, String>,
}

impl Qualifier {
    /// Create a qualifier without members
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    /// The built-in `@Any` qualifier
    pub fn any() -> Self {
        Self::new(ANY)
    }

    /// The built-in `@Default` qualifier
    pub fn default_qualifier() -> Self {
        Self::new(DEFAULT)
    }

    /// The built-in `@Named(value)` qualifier
    pub fn named(value: impl Into<String>) -> Self {
        Self::new(NAMED).with_member("value", value.into())
    }

    /// Add a member value
    pub fn with_member(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.members.insert(key.into(), value.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member(&self, key: &str) -> Option<&str> {
        self.members.get(key).map(String::as_str)
    }

    pub fn is_any(&self) -> bool {
        self.name == ANY && self.members.is_empty()
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT && self.members.is_empty()
    }

    pub fn is_named(&self) -> bool {
        self.name == NAMED
    }
}

impl std::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.members.is_empty() {
            let members = self
                .members
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "({})", members)?;
        }
        Ok(())
    }
}

/// Ordered set of qualifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QualifierSet {
    qualifiers: BTreeSet<Qualifier>,
}

impl QualifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize the qualifiers declared by a bean: adds `@Any`, and
    /// `@Default` when nothing but `@Named` was declared.
    pub fn for_bean(declared: impl IntoIterator<Item = Qualifier>) -> Self {
        let mut set: BTreeSet<Qualifier> = declared.into_iter().collect();
        if set.iter().all(|q| q.is_named() || q.is_any()) {
            set.insert(Qualifier::default_qualifier());
        }
        set.insert(Qualifier::any());
        Self { qualifiers: set }
    }

    /// Normalize the qualifiers required at an injection point or lookup:
    /// an empty requirement means `@Default`.
    pub fn for_injection(required: impl IntoIterator<Item = Qualifier>) -> Self {
        let mut set: BTreeSet<Qualifier> = required.into_iter().collect();
        if set.is_empty() {
            set.insert(Qualifier::default_qualifier());
        }
        Self { qualifiers: set }
    }

    /// Normalize the qualifiers of a fired event; same rules as a bean
    pub fn for_event(fired: impl IntoIterator<Item = Qualifier>) -> Self {
        Self::for_bean(fired)
    }

    /// Qualifiers exactly as declared, without implicit members
    pub fn declared(qualifiers: impl IntoIterator<Item = Qualifier>) -> Self {
        Self {
            qualifiers: qualifiers.into_iter().collect(),
        }
    }

    /// True when every required qualifier is `@Any` or present in `self`
    pub fn satisfies(&self, required: &QualifierSet) -> bool {
        required
            .qualifiers
            .iter()
            .all(|q| q.is_any() || self.qualifiers.contains(q))
    }

    pub fn contains(&self, qualifier: &Qualifier) -> bool {
        self.qualifiers.contains(qualifier)
    }

    pub fn insert(&mut self, qualifier: Qualifier) -> bool {
        self.qualifiers.insert(qualifier)
    }

    /// Remove every qualifier with the given name
    pub fn remove_named(&mut self, name: &str) -> usize {
        let before = self.qualifiers.len();
        self.qualifiers.retain(|q| q.name() != name);
        before - self.qualifiers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Qualifier> {
        self.qualifiers.iter()
    }

    pub fn len(&self) -> usize {
        self.qualifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qualifiers.is_empty()
    }
}

impl std::fmt::Display for QualifierSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let items = self
            .qualifiers
            .iter()
            .map(|q| q.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{}}}", items)
    }
}

impl FromIterator<Qualifier> for QualifierSet {
    fn from_iter<I: IntoIterator<Item = Qualifier>>(iter: I) -> Self {
        Self::declared(iter)
    }
}
