//! Hydrated entities and their collections.
//!
//! Entities are shared through the session's identity map as [`EntityRef`]s,
//! so every query in a batch that reads the same row observes the same
//! instance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ormbatch_proto::Value;
use parking_lot::RwLock;

/// Identity of an entity inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    /// Mapped entity name.
    pub entity_name: String,
    /// Identifier.
    pub id: [u8; 16],
}

impl EntityKey {
    /// Create a key.
    pub fn new(entity_name: impl Into<String>, id: [u8; 16]) -> Self {
        Self {
            entity_name: entity_name.into(),
            id,
        }
    }

    /// Identifier as a bindable value.
    pub fn id_value(&self) -> Value {
        Value::Uuid(self.id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_name, hex::encode(self.id))
    }
}

/// Shared handle to a hydrated entity.
pub type EntityRef = Arc<Entity>;

/// A collection owned by an entity.
#[derive(Debug, Clone, Default)]
pub struct PersistentCollection {
    initialized: bool,
    items: Vec<EntityRef>,
}

impl PersistentCollection {
    /// A collection whose elements have not been loaded.
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// A loaded collection.
    pub fn initialized(items: Vec<EntityRef>) -> Self {
        Self {
            initialized: true,
            items,
        }
    }

    /// Whether the elements were loaded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Loaded elements (empty while uninitialized).
    pub fn items(&self) -> &[EntityRef] {
        &self.items
    }

    /// Number of loaded elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if no elements are loaded.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A hydrated entity instance.
pub struct Entity {
    key: EntityKey,
    properties: RwLock<BTreeMap<String, Value>>,
    collections: RwLock<BTreeMap<String, PersistentCollection>>,
    read_only: AtomicBool,
}

impl Entity {
    /// Create an entity with the given properties.
    pub fn new(key: EntityKey, properties: BTreeMap<String, Value>) -> Self {
        Self {
            key,
            properties: RwLock::new(properties),
            collections: RwLock::new(BTreeMap::new()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Identity of this entity.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Mapped entity name.
    pub fn entity_name(&self) -> &str {
        &self.key.entity_name
    }

    /// Property value, if present.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.read().get(name).cloned()
    }

    /// Snapshot of all properties.
    pub fn properties(&self) -> BTreeMap<String, Value> {
        self.properties.read().clone()
    }

    /// Set a property value.
    pub fn set_property(&self, name: impl Into<String>, value: Value) {
        self.properties.write().insert(name.into(), value);
    }

    /// Collection by role, if the entity owns one.
    pub fn collection(&self, role: &str) -> Option<PersistentCollection> {
        self.collections.read().get(role).cloned()
    }

    /// Install or replace a collection.
    pub fn set_collection(&self, role: impl Into<String>, collection: PersistentCollection) {
        self.collections.write().insert(role.into(), collection);
    }

    /// Whether the collection for `role` exists and is loaded.
    pub fn is_collection_initialized(&self, role: &str) -> bool {
        self.collections
            .read()
            .get(role)
            .map_or(false, PersistentCollection::is_initialized)
    }

    /// Whether changes to this entity are ignored by the session.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    /// Mark the entity read-only or modifiable.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("key", &self.key)
            .field("properties", &*self.properties.read())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> Entity {
        let mut props = BTreeMap::new();
        props.insert("Name".to_string(), Value::from("a"));
        Entity::new(EntityKey::new("EntityComplex", [1; 16]), props)
    }

    #[test]
    fn test_key_display() {
        let key = EntityKey::new("Cat", [0xab; 16]);
        assert_eq!(key.to_string(), format!("Cat#{}", "ab".repeat(16)));
        assert_eq!(key.id_value(), Value::Uuid([0xab; 16]));
    }

    #[test]
    fn test_properties() {
        let e = entity();
        assert_eq!(e.property("Name"), Some(Value::from("a")));
        e.set_property("Version", Value::Int32(3));
        assert_eq!(e.properties().len(), 2);
        assert_eq!(e.property("Missing"), None);
    }

    #[test]
    fn test_collections() {
        let e = entity();
        assert!(!e.is_collection_initialized("Children"));

        e.set_collection("Children", PersistentCollection::uninitialized());
        assert!(!e.is_collection_initialized("Children"));

        let child = Arc::new(entity());
        e.set_collection("Children", PersistentCollection::initialized(vec![child]));
        assert!(e.is_collection_initialized("Children"));
        assert_eq!(e.collection("Children").map(|c| c.len()), Some(1));
    }

    #[test]
    fn test_read_only_flag() {
        let e = entity();
        assert!(!e.is_read_only());
        e.set_read_only(true);
        assert!(e.is_read_only());
    }
}
