//! Declarative schemas of the kinds of update files
//!
//! A [Kind] tells the parser which tags of a definition hold attribute values, links and owned
//! entries, and tells the engine which type the root instance of the file belongs to.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Link;
use crate::admin::{attributes, types};

/// A tag holding the value of an attribute of the root instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Tag path relative to the definition, e.g. `database/sql-table`
    pub path: String,
    pub attribute: String,
    /// If set, the tag holds the name of an instance of this type, whose id is written
    pub reference: Option<String>,
}

impl Field {
    pub fn new(path: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            attribute: attribute.into(),
            reference: None,
        }
    }

    pub fn reference(
        path: impl Into<String>,
        attribute: impl Into<String>,
        ty: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            attribute: attribute.into(),
            reference: Some(ty.into()),
        }
    }
}

/// A tag declaring a link target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTag {
    pub path: String,
    pub link: Arc<Link>,
}

/// Rows owned by the root instance, e.g. the attributes of a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySchema {
    /// Tag path of one entry relative to the definition
    pub path: String,
    pub type_name: String,
    /// Attribute of the entry pointing to the owner
    pub owner_attribute: String,
    /// Attribute identifying an entry among the entries of the owner
    pub key_attribute: String,
    /// Fields with paths relative to the entry tag
    pub fields: Vec<Field>,
}

/// The schema of one kind of update file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kind {
    tag: String,
    type_name: String,
    search_attribute: Option<String>,
    fields: Vec<Field>,
    links: Vec<LinkTag>,
    entries: Option<EntrySchema>,
}

impl Kind {
    pub fn new(tag: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            type_name: type_name.into(),
            search_attribute: None,
            fields: Vec::new(),
            links: Vec::new(),
            entries: None,
        }
    }

    /// Find existing instances by this attribute instead of the configured default
    pub fn with_search_attribute(self, attribute: impl Into<String>) -> Self {
        let mut kind = self;
        kind.search_attribute = Some(attribute.into());
        kind
    }

    pub fn with_field(self, field: Field) -> Self {
        let mut kind = self;
        kind.fields.push(field);
        kind
    }

    /// Declare link targets under the given tag path
    ///
    /// The same link may be declared under several paths, the targets of every path are then
    /// reconciled together.
    pub fn with_link(self, path: impl Into<String>, link: Link) -> Self {
        let mut kind = self;
        let link = kind
            .links
            .iter()
            .map(|l| &l.link)
            .find(|l| ***l == link)
            .cloned()
            .unwrap_or_else(|| Arc::new(link));
        kind.links.push(LinkTag {
            path: path.into(),
            link,
        });
        kind
    }

    pub fn with_entries(self, entries: EntrySchema) -> Self {
        let mut kind = self;
        kind.entries = Some(entries);
        kind
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn search_attribute(&self) -> Option<&str> {
        self.search_attribute.as_deref()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, path: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.path == path)
    }

    pub fn link_tags(&self) -> &[LinkTag] {
        &self.links
    }

    pub fn link_tag(&self, path: &str) -> Option<&LinkTag> {
        self.links.iter().find(|l| l.path == path)
    }

    /// Distinct links of the kind in declaration order
    pub fn links(&self) -> Vec<&Arc<Link>> {
        let mut links: Vec<&Arc<Link>> = Vec::new();
        for tag in &self.links {
            if !links.iter().any(|l| Arc::ptr_eq(l, &tag.link)) {
                links.push(&tag.link);
            }
        }
        links
    }

    pub fn entries(&self) -> Option<&EntrySchema> {
        self.entries.as_ref()
    }

    /// Whether the tag path is a field, link or entry path or a prefix of one
    pub(super) fn knows_prefix(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.fields
            .iter()
            .map(|f| f.path.as_str())
            .chain(self.links.iter().map(|l| l.path.as_str()))
            .chain(self.entries.iter().map(|e| e.path.as_str()))
            .any(|p| p.starts_with(&prefix))
    }
}

/// Registry of kinds by root tag
#[derive(Clone)]
pub struct Kinds {
    kinds: HashMap<String, Arc<Kind>>,
}

impl fmt::Debug for Kinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.kinds.keys().collect();
        tags.sort();
        f.debug_struct("Kinds").field("kinds", &tags).finish()
    }
}

fn command(tag: &str, type_name: &str) -> Kind {
    Kind::new(tag, type_name)
        .with_link("icon", Link::new(types::UI_LINK_ICON, types::UI_IMAGE))
        .with_link(
            "target/form",
            Link::new(types::UI_LINK_TARGET_FORM, types::UI_FORM),
        )
        .with_link(
            "target/table",
            Link::new(types::UI_LINK_TARGET_TABLE, types::UI_TABLE),
        )
        .with_link(
            "target/search",
            Link::new(types::UI_LINK_TARGET_SEARCH, types::UI_SEARCH),
        )
        .with_link(
            "target/menu",
            Link::new(types::UI_LINK_TARGET_MENU, types::UI_MENU),
        )
        .with_link("access/role", ui_access())
        .with_link("access/group", ui_access())
}

fn menu(tag: &str, type_name: &str) -> Kind {
    command(tag, type_name).with_link(
        "childs/child",
        Link::new(types::UI_MENU2COMMAND, types::UI_COMMAND).ordered(),
    )
}

fn ui_access() -> Link {
    Link::new(types::UI_ACCESS, types::USER_ABSTRACT)
}

fn collection(tag: &str, type_name: &str) -> Kind {
    Kind::new(tag, type_name)
        .with_link("access/role", ui_access())
        .with_link("access/group", ui_access())
}

fn user(tag: &str, type_name: &str) -> Kind {
    Kind::new(tag, type_name).with_field(Field::new("status", attributes::STATUS))
}

fn access_set() -> Kind {
    let principals = Link::new(types::ACCESS_SET2USER, types::USER_ABSTRACT);
    Kind::new("access-set", types::ACCESS_SET)
        .with_link(
            "access-type",
            Link::new(types::ACCESS_SET2ACCESS_TYPE, types::ACCESS_TYPE),
        )
        .with_link(
            "type",
            Link::new(types::ACCESS_SET2TYPE, types::DATAMODEL_TYPE),
        )
        .with_link("role", principals.clone())
        .with_link("group", principals)
}

fn sql_table() -> Kind {
    Kind::new("datamodel-sqltable", types::DATAMODEL_SQLTABLE)
        .with_field(Field::new("database/sql-table", "SQLTable"))
        .with_field(Field::new("database/sql-column-id", "SQLColumnID"))
        .with_field(Field::new("database/sql-column-type", "SQLColumnType"))
        .with_field(Field::new("database/sql-newid-select", "SQLNewIDSelect"))
        .with_field(Field::new("database/read-only", "ReadOnly"))
        .with_field(Field::reference(
            "parent",
            "DMTableMain",
            types::DATAMODEL_SQLTABLE,
        ))
}

fn data_model_type() -> Kind {
    Kind::new("datamodel-type", types::DATAMODEL_TYPE)
        .with_field(Field::new("abstract", "Abstract"))
        .with_field(Field::new("store-id", "StoreId"))
        .with_field(Field::new("cache-expression", "CacheExpression"))
        .with_field(Field::reference(
            "parent",
            attributes::PARENT_TYPE,
            types::DATAMODEL_TYPE,
        ))
        .with_link(
            "event-for",
            Link::new(
                types::DATAMODEL_TYPE_EVENT_IS_ALLOWED_FOR,
                types::DATAMODEL_TYPE,
            ),
        )
        .with_entries(EntrySchema {
            path: "attribute".to_string(),
            type_name: types::DATAMODEL_ATTRIBUTE.to_string(),
            owner_attribute: "DataModelTypeLink".to_string(),
            key_attribute: attributes::NAME.to_string(),
            fields: vec![
                Field::new("name", attributes::NAME),
                Field::reference("sqltable", "SQLTable", types::DATAMODEL_SQLTABLE),
                Field::new("sqlcolumn", "SQLColumn"),
                Field::new("type", "AttributeType"),
                Field::reference("typelink", "TypeLink", types::DATAMODEL_TYPE),
            ],
        })
}

impl Default for Kinds {
    fn default() -> Self {
        Self::empty()
            .register(Kind::new("ui-image", types::UI_IMAGE))
            .register(command("ui-command", types::UI_COMMAND))
            .register(menu("ui-menu", types::UI_MENU))
            .register(menu("ui-search", types::UI_SEARCH))
            .register(collection("ui-form", types::UI_FORM))
            .register(collection("ui-table", types::UI_TABLE))
            .register(user("user-role", types::USER_ROLE))
            .register(user("user-group", types::USER_GROUP))
            .register(Kind::new("access-type", types::ACCESS_TYPE))
            .register(access_set())
            .register(sql_table())
            .register(data_model_type())
    }
}

impl Kinds {
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Add a kind, replacing any kind with the same root tag
    pub fn register(self, kind: Kind) -> Self {
        let mut kinds = self;
        kinds.kinds.insert(kind.tag.clone(), Arc::new(kind));
        kinds
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<Kind>> {
        self.kinds.get(tag)
    }
}
