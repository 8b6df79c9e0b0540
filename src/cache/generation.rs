use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::CacheObject;
use crate::Id;

#[derive(Debug, Error, PartialEq, Eq)]
/// Two objects of the same load share a key
pub enum DuplicateKey {
    #[error("duplicate id {0}")]
    Id(Id),

    #[error("duplicate name '{0}'")]
    Name(String),

    #[error("duplicate uuid {0}")]
    Uuid(Uuid),
}

/// An immutable, fully indexed set of cached objects
///
/// A generation is built once from the result of a load and never modified afterwards. Objects
/// can be looked up by id, name or UUID, all three lookups resolving to the same shared
/// object.
#[derive(Debug)]
pub struct Generation<T> {
    by_id: BTreeMap<Id, Arc<T>>,
    by_name: HashMap<String, Arc<T>>,
    by_uuid: HashMap<Uuid, Arc<T>>,
}

impl<T> Default for Generation<T> {
    fn default() -> Self {
        Self {
            by_id: BTreeMap::new(),
            by_name: HashMap::new(),
            by_uuid: HashMap::new(),
        }
    }
}

impl<T: CacheObject> Generation<T> {
    /// Index the given objects
    ///
    /// Ids, names and UUIDs must be unique within the generation.
    pub fn new(objects: impl IntoIterator<Item = Arc<T>>) -> Result<Self, DuplicateKey> {
        let mut generation = Self::default();
        for obj in objects {
            let id = obj.id();
            if generation.by_id.contains_key(&id) {
                return Err(DuplicateKey::Id(id));
            }
            if generation.by_name.contains_key(obj.name()) {
                return Err(DuplicateKey::Name(obj.name().to_string()));
            }
            if let Some(uuid) = obj.uuid() {
                if generation.by_uuid.insert(uuid, obj.clone()).is_some() {
                    return Err(DuplicateKey::Uuid(uuid));
                }
            }
            generation.by_name.insert(obj.name().to_string(), obj.clone());
            generation.by_id.insert(id, obj);
        }
        Ok(generation)
    }

    pub fn get(&self, id: Id) -> Option<&Arc<T>> {
        self.by_id.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<T>> {
        self.by_name.get(name)
    }

    pub fn get_by_uuid(&self, uuid: &Uuid) -> Option<&Arc<T>> {
        self.by_uuid.get(uuid)
    }

    /// Iterate over the objects of the generation in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq)]
    struct Role {
        id: Id,
        name: &'static str,
        uuid: Option<Uuid>,
    }

    impl CacheObject for Role {
        fn id(&self) -> Id {
            self.id
        }

        fn name(&self) -> &str {
            self.name
        }

        fn uuid(&self) -> Option<Uuid> {
            self.uuid
        }
    }

    fn role(id: Id, name: &'static str) -> Arc<Role> {
        Arc::new(Role {
            id,
            name,
            uuid: Some(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())),
        })
    }

    #[test]
    fn it_resolves_every_key_to_the_same_object() {
        let generation = Generation::new([role(2, "Admin"), role(1, "Guest")]).unwrap();

        let by_id = generation.get(2).unwrap();
        let by_name = generation.get_by_name("Admin").unwrap();
        let by_uuid = generation
            .get_by_uuid(&Uuid::new_v5(&Uuid::NAMESPACE_OID, b"Admin"))
            .unwrap();

        assert!(Arc::ptr_eq(by_id, by_name));
        assert!(Arc::ptr_eq(by_id, by_uuid));
        assert_eq!(
            generation.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn it_rejects_duplicate_keys() {
        assert_eq!(
            Generation::new([role(1, "Admin"), role(1, "Guest")]).unwrap_err(),
            DuplicateKey::Id(1)
        );
        assert_eq!(
            Generation::new([role(1, "Admin"), role(2, "Admin")]).unwrap_err(),
            DuplicateKey::Name("Admin".to_string())
        );
    }

    #[test]
    fn it_allows_objects_without_uuid() {
        let generation = Generation::new([
            Arc::new(Role {
                id: 1,
                name: "a",
                uuid: None,
            }),
            Arc::new(Role {
                id: 2,
                name: "b",
                uuid: None,
            }),
        ])
        .unwrap();
        assert_eq!(generation.len(), 2);
        assert!(generation.get(3).is_none());
    }
}
