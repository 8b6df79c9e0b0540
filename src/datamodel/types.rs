use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::iter;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{Attribute, AttributeType, EventDefinition, LoadError, SqlTable};
use crate::admin;
use crate::cache::{CacheObject, Generation};
use crate::Id;

/// A data model type
///
/// Types form a single-inheritance hierarchy. A type exposes its own copy of every attribute
/// declared by itself or one of its ancestors.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    id: Id,
    uuid: Option<Uuid>,
    name: String,
    is_abstract: bool,
    parent: Option<Id>,
    /// nearest first
    ancestors: Vec<Id>,
    children: BTreeSet<Id>,
    attributes: BTreeMap<String, Attribute>,
    links: BTreeMap<String, Attribute>,
    tables: BTreeMap<Id, Arc<SqlTable>>,
    main_table: Option<Arc<SqlTable>>,
    properties: BTreeMap<String, String>,
    store_id: Option<i64>,
    cache_expr: Option<String>,
    events: Vec<EventDefinition>,
    access_sets: BTreeSet<Id>,
    allowed_event_types: BTreeSet<Id>,
}

impl Type {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn parent_id(&self) -> Option<Id> {
        self.parent
    }

    /// Ids of all ancestors, the direct parent first
    pub fn ancestors(&self) -> &[Id] {
        &self.ancestors
    }

    /// Ids of all descendants at any depth
    pub fn child_types(&self) -> &BTreeSet<Id> {
        &self.children
    }

    /// Ids of the type and all of its descendants
    pub fn type_ids(&self) -> impl Iterator<Item = Id> + '_ {
        iter::once(self.id).chain(self.children.iter().copied())
    }

    /// Return true if the type is `other` or one of its descendants
    pub fn is_kind_of(&self, other: &Type) -> bool {
        self.is_kind_of_id(other.id)
    }

    pub fn is_kind_of_id(&self, other: Id) -> bool {
        self.id == other || self.ancestors.contains(&other)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// Link attributes of other types pointing to this type, keyed by `Owner\Attribute`
    pub fn links(&self) -> &BTreeMap<String, Attribute> {
        &self.links
    }

    pub fn link(&self, key: &str) -> Option<&Attribute> {
        self.links.get(key)
    }

    /// Every table storing part of an instance of this type, in id order
    pub fn tables(&self) -> impl Iterator<Item = &Arc<SqlTable>> {
        self.tables.values()
    }

    /// The table receiving the first insert of a new instance
    pub fn main_table(&self) -> Option<&Arc<SqlTable>> {
        self.main_table.as_ref()
    }

    /// Property value, inherited from the nearest ancestor defining it
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Store id of the type or of its nearest ancestor defining one
    pub fn store_id(&self) -> Option<i64> {
        self.store_id
    }

    pub fn cache_expr(&self) -> Option<&str> {
        self.cache_expr.as_deref()
    }

    /// Events of the type, ordered by index
    pub fn events(&self) -> &[EventDefinition] {
        &self.events
    }

    /// Access check events, ordered by index
    pub fn access_checks(&self) -> impl Iterator<Item = &EventDefinition> {
        self.events.iter().filter(|e| e.is_access_check())
    }

    pub fn access_sets(&self) -> &BTreeSet<Id> {
        &self.access_sets
    }

    /// Return true if events of the given type may be attached to instances of this type
    pub fn is_event_allowed(&self, event_type: Id) -> bool {
        self.allowed_event_types.contains(&event_type)
    }

    pub fn allowed_event_types(&self) -> &BTreeSet<Id> {
        &self.allowed_event_types
    }
}

impl CacheObject for Type {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }
}

impl Generation<Type> {
    pub fn parent_of(&self, ty: &Type) -> Option<&Arc<Type>> {
        ty.parent.and_then(|id| self.get(id))
    }

    /// Types whose direct parent is `ty`
    pub fn direct_children<'a>(&'a self, ty: &'a Type) -> impl Iterator<Item = &'a Arc<Type>> {
        self.iter().filter(move |t| t.parent == Some(ty.id))
    }
}

/// A `dm_type` row
#[derive(Debug, Clone, Default)]
pub struct TypeRow {
    pub id: Id,
    pub uuid: Option<Uuid>,
    pub name: String,
    pub parent: Option<Id>,
    pub is_abstract: bool,
    pub store_id: Option<i64>,
    pub cache_expr: Option<String>,
}

/// A `dm_attribute` row
#[derive(Debug, Clone)]
pub struct AttributeRow {
    pub id: Id,
    pub name: String,
    pub type_id: Id,
    pub table: Option<Id>,
    pub column: Option<String>,
    pub attribute_type: AttributeType,
    pub link: Option<Id>,
}

/// A property of a type or of an event definition
#[derive(Debug, Clone)]
pub struct PropertyRow {
    pub owner: Id,
    pub name: String,
    pub value: String,
}

/// An event definition attached to a type
#[derive(Debug, Clone, Default)]
pub struct EventRow {
    pub id: Id,
    pub owner: Id,
    pub name: String,
    pub event_type: Id,
    pub index: i64,
    pub program: Option<String>,
    pub method: Option<String>,
}

/// Everything a type generation is built from
#[derive(Debug, Clone, Default)]
pub struct TypeSource {
    pub types: Vec<TypeRow>,
    pub attributes: Vec<AttributeRow>,
    pub properties: Vec<PropertyRow>,
    pub events: Vec<EventRow>,
    /// (access set, type)
    pub access_sets: Vec<(Id, Id)>,
    /// (event type, type)
    pub allowed_events: Vec<(Id, Id)>,
}

/// Build the types of a generation
///
/// The result does not depend on the order of the source rows. Every reference between rows
/// is checked: parents and link targets must exist, attribute tables must be part of `tables`
/// and the hierarchy must be acyclic.
pub fn build_types(
    source: TypeSource,
    tables: &Generation<SqlTable>,
) -> Result<Vec<Arc<Type>>, LoadError> {
    let TypeSource {
        types,
        attributes,
        properties,
        events,
        access_sets,
        allowed_events,
    } = source;

    let mut rows = BTreeMap::new();
    for row in types {
        let id = row.id;
        if rows.insert(id, row).is_some() {
            return Err(LoadError::DuplicateId(id));
        }
    }

    for row in rows.values() {
        if let Some(parent) = row.parent {
            if !rows.contains_key(&parent) {
                return Err(LoadError::UnknownParent {
                    name: row.name.clone(),
                    parent,
                });
            }
        }
    }

    let mut ancestors: HashMap<Id, Vec<Id>> = HashMap::new();
    for (id, row) in &rows {
        let mut chain = Vec::new();
        let mut next = row.parent;
        while let Some(parent) = next {
            if parent == *id || chain.contains(&parent) {
                return Err(LoadError::CyclicHierarchy {
                    name: row.name.clone(),
                });
            }
            chain.push(parent);
            next = rows.get(&parent).and_then(|r| r.parent);
        }
        ancestors.insert(*id, chain);
    }

    let mut children: HashMap<Id, BTreeSet<Id>> = HashMap::new();
    for (id, chain) in &ancestors {
        for ancestor in chain {
            children.entry(*ancestor).or_default().insert(*id);
        }
    }

    let mut declared: HashMap<Id, Vec<Attribute>> = HashMap::new();
    for row in attributes {
        let Some(owner) = rows.get(&row.type_id) else {
            return Err(LoadError::UnknownType {
                attribute: row.name,
                type_id: row.type_id,
            });
        };
        let table = match row.table {
            Some(table) => Some(tables.get(table).cloned().ok_or_else(|| {
                LoadError::UnknownTable {
                    attribute: row.name.clone(),
                    ty: owner.name.clone(),
                    table,
                }
            })?),
            None => None,
        };
        if let Some(target) = row.link {
            if !rows.contains_key(&target) {
                return Err(LoadError::UnknownLinkTarget {
                    attribute: row.name,
                    target,
                });
            }
        }
        declared.entry(row.type_id).or_default().push(Attribute {
            id: row.id,
            name: row.name,
            type_id: row.type_id,
            declared_by: row.type_id,
            table,
            column: row.column,
            attribute_type: row.attribute_type,
            link: row.link,
        });
    }
    for attrs in declared.values_mut() {
        attrs.sort_by_key(|a| a.id);
    }

    // root first, so that the nearest declaration of a name wins
    let lineage = |id: Id| -> Vec<Id> {
        let mut lineage: Vec<Id> = ancestors.get(&id).into_iter().flatten().copied().collect();
        lineage.reverse();
        lineage.push(id);
        lineage
    };

    let mut effective: HashMap<Id, BTreeMap<String, Attribute>> = HashMap::new();
    let mut type_tables: HashMap<Id, BTreeMap<Id, Arc<SqlTable>>> = HashMap::new();
    let mut main_tables: HashMap<Id, Arc<SqlTable>> = HashMap::new();
    for id in rows.keys() {
        let mut attrs = BTreeMap::new();
        let mut stored_in = BTreeMap::new();
        for owner in lineage(*id) {
            for attr in declared.get(&owner).into_iter().flatten() {
                if let Some(table) = &attr.table {
                    if !main_tables.contains_key(id) {
                        main_tables.insert(*id, root_of(table));
                    }
                    let mut next = Some(table);
                    while let Some(table) = next {
                        stored_in.insert(table.id(), table.clone());
                        next = table.main_table();
                    }
                }
                attrs.insert(
                    attr.name.clone(),
                    Attribute {
                        type_id: *id,
                        ..attr.clone()
                    },
                );
            }
        }
        effective.insert(*id, attrs);
        type_tables.insert(*id, stored_in);
    }

    let mut links: HashMap<Id, BTreeMap<String, Attribute>> = HashMap::new();
    for (owner, attrs) in &effective {
        let Some(owner) = rows.get(owner) else {
            continue;
        };
        for attr in attrs.values() {
            let Some(target) = attr.link.filter(|_| attr.attribute_type == AttributeType::Link)
            else {
                continue;
            };
            let key = format!("{}\\{}", owner.name, attr.name);
            let targets = iter::once(target).chain(children.get(&target).into_iter().flatten().copied());
            for target in targets {
                links
                    .entry(target)
                    .or_default()
                    .insert(key.clone(), attr.clone());
            }
        }
    }

    let event_ids: HashSet<Id> = events.iter().map(|e| e.id).collect();
    let mut own_properties: HashMap<Id, BTreeMap<String, String>> = HashMap::new();
    let mut event_properties: HashMap<Id, BTreeMap<String, String>> = HashMap::new();
    for property in properties {
        let target = if rows.contains_key(&property.owner) {
            &mut own_properties
        } else if event_ids.contains(&property.owner) {
            &mut event_properties
        } else {
            continue;
        };
        target
            .entry(property.owner)
            .or_default()
            .insert(property.name, property.value);
    }

    let mut type_properties = HashMap::new();
    let mut store_ids = HashMap::new();
    for id in rows.keys() {
        let mut merged = BTreeMap::new();
        for owner in lineage(*id) {
            if let Some(props) = own_properties.get(&owner) {
                merged.extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        type_properties.insert(*id, merged);

        let store_id = iter::once(id)
            .chain(ancestors.get(id).into_iter().flatten())
            .find_map(|t| rows.get(t).and_then(|r| r.store_id));
        store_ids.insert(*id, store_id);
    }

    let access_check = rows
        .values()
        .find(|r| r.name == admin::types::ACCESS_CHECK_EVENT)
        .map(|r| r.id);
    let is_access_check = |event_type: Id| {
        access_check.is_some_and(|base| {
            event_type == base
                || ancestors
                    .get(&event_type)
                    .is_some_and(|chain| chain.contains(&base))
        })
    };

    let mut type_events: HashMap<Id, Vec<EventDefinition>> = HashMap::new();
    for event in events {
        if !rows.contains_key(&event.owner) {
            debug!(event = event.name, owner = event.owner, "skipping event of a non-type owner");
            continue;
        }
        type_events
            .entry(event.owner)
            .or_default()
            .push(EventDefinition {
                id: event.id,
                properties: event_properties.remove(&event.id).unwrap_or_default(),
                access_check: is_access_check(event.event_type),
                name: event.name,
                event_type: event.event_type,
                index: event.index,
                program: event.program,
                method: event.method,
            });
    }
    for events in type_events.values_mut() {
        events.sort_by_key(|e| (e.index, e.id));
    }

    let mut type_access_sets: HashMap<Id, BTreeSet<Id>> = HashMap::new();
    for (set, ty) in access_sets {
        type_access_sets.entry(ty).or_default().insert(set);
    }
    let mut type_allowed_events: HashMap<Id, BTreeSet<Id>> = HashMap::new();
    for (event_type, ty) in allowed_events {
        type_allowed_events.entry(ty).or_default().insert(event_type);
    }

    let mut result = Vec::with_capacity(rows.len());
    for (id, row) in rows {
        result.push(Arc::new(Type {
            id,
            uuid: row.uuid,
            name: row.name,
            is_abstract: row.is_abstract,
            parent: row.parent,
            ancestors: ancestors.remove(&id).unwrap_or_default(),
            children: children.remove(&id).unwrap_or_default(),
            attributes: effective.remove(&id).unwrap_or_default(),
            links: links.remove(&id).unwrap_or_default(),
            tables: type_tables.remove(&id).unwrap_or_default(),
            main_table: main_tables.remove(&id),
            properties: type_properties.remove(&id).unwrap_or_default(),
            store_id: store_ids.remove(&id).flatten(),
            cache_expr: row.cache_expr,
            events: type_events.remove(&id).unwrap_or_default(),
            access_sets: type_access_sets.remove(&id).unwrap_or_default(),
            allowed_event_types: type_allowed_events.remove(&id).unwrap_or_default(),
        }));
    }

    Ok(result)
}

fn root_of(table: &Arc<SqlTable>) -> Arc<SqlTable> {
    let mut current = table;
    while let Some(main) = current.main_table() {
        current = main;
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{build_tables, TableRow};
    use pretty_assertions::assert_eq;

    fn tables() -> Generation<SqlTable> {
        let rows = vec![
            TableRow {
                id: 1,
                name: "AbstractTable".to_string(),
                sql_table: "t_abstract".to_string(),
                id_column: "ID".to_string(),
                type_column: Some("TYPEID".to_string()),
                ..Default::default()
            },
            TableRow {
                id: 2,
                name: "DocumentTable".to_string(),
                sql_table: "t_document".to_string(),
                id_column: "ID".to_string(),
                main_table: Some(1),
                ..Default::default()
            },
        ];
        Generation::new(build_tables(rows, &[]).unwrap()).unwrap()
    }

    fn ty(id: Id, name: &str, parent: Option<Id>) -> TypeRow {
        TypeRow {
            id,
            name: name.to_string(),
            parent,
            ..Default::default()
        }
    }

    fn attr(id: Id, name: &str, type_id: Id, table: Id, link: Option<Id>) -> AttributeRow {
        AttributeRow {
            id,
            name: name.to_string(),
            type_id,
            table: Some(table),
            column: Some(name.to_uppercase()),
            attribute_type: if link.is_some() {
                AttributeType::Link
            } else {
                AttributeType::String
            },
            link,
        }
    }

    // Base -> Document -> Invoice, Base -> Contact
    fn source() -> TypeSource {
        TypeSource {
            types: vec![
                ty(1, "Base", None),
                ty(2, "Document", Some(1)),
                ty(3, "Invoice", Some(2)),
                ty(4, "Contact", Some(1)),
            ],
            attributes: vec![
                attr(10, "Name", 1, 1, None),
                attr(11, "Number", 2, 2, None),
                attr(12, "Contact", 2, 2, Some(4)),
                attr(13, "Total", 3, 2, None),
            ],
            properties: vec![
                PropertyRow {
                    owner: 1,
                    name: "Icon".to_string(),
                    value: "base.png".to_string(),
                },
                PropertyRow {
                    owner: 3,
                    name: "Icon".to_string(),
                    value: "invoice.png".to_string(),
                },
                PropertyRow {
                    owner: 1,
                    name: "Label".to_string(),
                    value: "Base".to_string(),
                },
            ],
            ..Default::default()
        }
    }

    fn by_name(types: &[Arc<Type>], name: &str) -> Arc<Type> {
        types
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .unwrap()
    }

    #[test]
    fn it_computes_the_full_child_closure() {
        let types = build_types(source(), &tables()).unwrap();
        let base = by_name(&types, "Base");
        let invoice = by_name(&types, "Invoice");

        assert_eq!(base.child_types(), &BTreeSet::from([2, 3, 4]));
        assert_eq!(invoice.ancestors(), &[2, 1]);
        assert!(invoice.is_kind_of(&base));
        assert!(!base.is_kind_of(&invoice));
    }

    #[test]
    fn it_matches_kinds_reflexively_and_only_along_the_hierarchy() {
        let types = build_types(source(), &tables()).unwrap();
        let base = by_name(&types, "Base");
        let invoice = by_name(&types, "Invoice");
        let contact = by_name(&types, "Contact");

        assert!(base.is_kind_of(&base));
        assert!(invoice.is_kind_of(&invoice));
        assert!(contact.is_kind_of(&base));
        assert!(!invoice.is_kind_of(&contact));
        assert!(!contact.is_kind_of(&invoice));
    }

    #[test]
    fn it_does_not_depend_on_row_order() {
        let expected = build_types(source(), &tables()).unwrap();

        let mut reversed = source();
        reversed.types.reverse();
        reversed.attributes.reverse();
        let mut rotated = source();
        rotated.types.rotate_left(2);
        rotated.attributes.rotate_left(1);

        for source in [reversed, rotated] {
            let mut types = build_types(source, &tables()).unwrap();
            types.sort_by_key(|t| t.id());
            assert_eq!(types, expected);
        }
    }

    #[test]
    fn it_copies_inherited_attributes_per_type() {
        let types = build_types(source(), &tables()).unwrap();
        let base = by_name(&types, "Base");
        let invoice = by_name(&types, "Invoice");

        let name = invoice.attribute("Name").unwrap();
        assert_eq!(name.type_id(), invoice.id());
        assert_eq!(name.declared_by(), base.id());
        assert!(name.is_inherited());
        assert_eq!(base.attribute("Name").unwrap().type_id(), base.id());

        assert!(invoice.attribute("Number").is_some());
        assert!(invoice.attribute("Total").is_some());
        assert!(base.attribute("Total").is_none());
    }

    #[test]
    fn it_collects_the_tables_of_a_type() {
        let types = build_types(source(), &tables()).unwrap();
        let invoice = by_name(&types, "Invoice");
        let base = by_name(&types, "Base");

        let tables: Vec<_> = invoice.tables().map(|t| t.id()).collect();
        assert_eq!(tables, vec![1, 2]);
        assert_eq!(invoice.main_table().unwrap().id(), 1);
        assert_eq!(base.tables().count(), 1);
    }

    #[test]
    fn it_registers_links_on_the_target_and_its_children() {
        let mut source = source();
        source.types.push(ty(5, "Company", Some(4)));
        let types = build_types(source, &tables()).unwrap();

        let contact = by_name(&types, "Contact");
        let company = by_name(&types, "Company");
        assert!(contact.link("Document\\Contact").is_some());
        assert!(company.link("Document\\Contact").is_some());
        // copies of the link attribute on subtypes are registered as well
        assert!(contact.link("Invoice\\Contact").is_some());
        assert!(by_name(&types, "Document").links().is_empty());
    }

    #[test]
    fn it_inherits_properties_and_store_ids() {
        let mut source = source();
        source.types[1].store_id = Some(7);
        let types = build_types(source, &tables()).unwrap();

        let invoice = by_name(&types, "Invoice");
        assert_eq!(invoice.property("Icon"), Some("invoice.png"));
        assert_eq!(invoice.property("Label"), Some("Base"));
        assert_eq!(by_name(&types, "Document").property("Icon"), Some("base.png"));
        assert_eq!(invoice.store_id(), Some(7));
        assert_eq!(by_name(&types, "Base").store_id(), None);
    }

    #[test]
    fn it_rejects_cyclic_hierarchies() {
        let mut source = source();
        source.types[0].parent = Some(3);
        assert!(matches!(
            build_types(source, &tables()),
            Err(LoadError::CyclicHierarchy { .. })
        ));

        let mut source = TypeSource::default();
        source.types.push(ty(1, "Selfish", Some(1)));
        assert!(matches!(
            build_types(source, &tables()),
            Err(LoadError::CyclicHierarchy { .. })
        ));
    }

    #[test]
    fn it_rejects_unknown_references() {
        let mut source = source();
        source.types.push(ty(9, "Orphan", Some(42)));
        assert!(matches!(
            build_types(source, &tables()),
            Err(LoadError::UnknownParent { parent: 42, .. })
        ));

        let mut source = self::source();
        source.attributes.push(attr(20, "Lost", 1, 99, None));
        assert!(matches!(
            build_types(source, &tables()),
            Err(LoadError::UnknownTable { table: 99, .. })
        ));
    }

    #[test]
    fn it_orders_events_and_flags_access_checks() {
        let mut source = source();
        source.types.push(ty(50, admin::types::EVENT_DEFINITION, None));
        source.types.push(ty(51, admin::types::ACCESS_CHECK_EVENT, Some(50)));
        source.types.push(ty(52, "Trigger", Some(50)));
        source.events = vec![
            EventRow {
                id: 61,
                owner: 3,
                name: "second".to_string(),
                event_type: 51,
                index: 2,
                ..Default::default()
            },
            EventRow {
                id: 60,
                owner: 3,
                name: "first".to_string(),
                event_type: 52,
                index: 1,
                ..Default::default()
            },
        ];
        source.properties.push(PropertyRow {
            owner: 61,
            name: "Mode".to_string(),
            value: "strict".to_string(),
        });

        let types = build_types(source, &tables()).unwrap();
        let invoice = by_name(&types, "Invoice");
        let names: Vec<_> = invoice.events().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["first", "second"]);

        let checks: Vec<_> = invoice.access_checks().collect();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].property("Mode"), Some("strict"));
        // event properties are not type properties
        assert_eq!(invoice.property("Mode"), None);
    }
}
