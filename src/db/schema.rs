use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::StoreError;
use crate::datamodel::AttributeType;
use crate::Id;

const DDL: &str = r#"
CREATE TABLE cm_abstract (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    TYPEID INTEGER NOT NULL,
    UUID TEXT,
    NAME TEXT,
    REVISION TEXT
);
CREATE UNIQUE INDEX cm_abstract_uuid ON cm_abstract (UUID);
CREATE INDEX cm_abstract_name ON cm_abstract (TYPEID, NAME);

CREATE TABLE dm_type (
    ID INTEGER PRIMARY KEY,
    PARENTDMTYPE INTEGER,
    ABSTRACT INTEGER NOT NULL DEFAULT 0,
    STOREID INTEGER,
    CACHEEXPR TEXT
);

CREATE TABLE dm_table (
    ID INTEGER PRIMARY KEY,
    SQLTABLE TEXT,
    SQLCOLUMNID TEXT,
    SQLCOLUMNTYPE TEXT,
    SQLNEWIDSELECT TEXT,
    DMTABLEMAIN INTEGER,
    READONLY INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE dm_attribute (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    NAME TEXT NOT NULL,
    DMTYPEID INTEGER,
    DMTABLEID INTEGER,
    SQLCOLUMN TEXT,
    DMATTRIBUTETYPE TEXT,
    DMTYPELINK INTEGER
);

CREATE TABLE cm_property (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    ABSTRACT INTEGER NOT NULL,
    NAME TEXT NOT NULL,
    VALUE TEXT
);
CREATE INDEX cm_property_abstract ON cm_property (ABSTRACT);

CREATE TABLE cm_abstract2abstract (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    TYPEID INTEGER NOT NULL,
    FROMID INTEGER,
    TOID INTEGER
);
CREATE INDEX cm_abstract2abstract_from ON cm_abstract2abstract (TYPEID, FROMID);

CREATE TABLE cm_eventdef (
    ID INTEGER PRIMARY KEY,
    ABSTRACT INTEGER,
    INDEXPOS INTEGER,
    PROGRAM TEXT,
    METHOD TEXT
);

CREATE TABLE us_abstract (
    ID INTEGER PRIMARY KEY,
    STATUS INTEGER NOT NULL DEFAULT 1
);
"#;

const TYPE_TYPE: Id = 101;
const SQLTABLE_TYPE: Id = 102;

/// (id, name, sql table, type column, main table)
const TABLES: &[(Id, &str, &str, Option<&str>, Option<Id>)] = &[
    (1, "Admin_AbstractSQLTable", "cm_abstract", Some("TYPEID"), None),
    (2, "Admin_DataModel_TypeSQLTable", "dm_type", None, Some(1)),
    (3, "Admin_DataModel_SQLTableSQLTable", "dm_table", None, Some(1)),
    (4, "Admin_DataModel_AttributeSQLTable", "dm_attribute", None, None),
    (5, "Admin_Common_PropertySQLTable", "cm_property", None, None),
    (6, "Admin_Abstract2AbstractSQLTable", "cm_abstract2abstract", Some("TYPEID"), None),
    (7, "Admin_Event_DefinitionSQLTable", "cm_eventdef", None, Some(1)),
    (8, "Admin_User_AbstractSQLTable", "us_abstract", None, Some(1)),
];

/// (id, name, parent, abstract)
const TYPES: &[(Id, &str, Option<Id>, bool)] = &[
    (100, "Admin_Abstract", None, true),
    (101, "Admin_DataModel_Type", Some(100), false),
    (102, "Admin_DataModel_SQLTable", Some(100), false),
    (103, "Admin_DataModel_Attribute", None, false),
    (104, "Admin_Common_Property", None, false),
    (105, "Admin_Abstract2Abstract", None, true),
    (106, "Admin_Event_Definition", Some(100), false),
    (107, "Admin_DataModel_AccessCheckEvent", Some(106), false),
    (108, "Admin_UI_CommandExecuteEvent", Some(106), false),
    (110, "Admin_UI_Abstract", Some(100), true),
    (111, "Admin_UI_Command", Some(110), false),
    (112, "Admin_UI_Menu", Some(111), false),
    (113, "Admin_UI_Search", Some(112), false),
    (114, "Admin_UI_Collection", Some(110), true),
    (115, "Admin_UI_Form", Some(114), false),
    (116, "Admin_UI_Table", Some(114), false),
    (117, "Admin_UI_Image", Some(110), false),
    (120, "Admin_User_Abstract", Some(100), true),
    (121, "Admin_User_Role", Some(120), false),
    (122, "Admin_User_Group", Some(120), false),
    (125, "Admin_Access_AccessType", Some(100), false),
    (126, "Admin_Access_AccessSet", Some(100), false),
    (130, "Admin_UI_LinkIcon", Some(105), false),
    (131, "Admin_UI_LinkTargetForm", Some(105), false),
    (132, "Admin_UI_LinkTargetTable", Some(105), false),
    (133, "Admin_UI_LinkTargetSearch", Some(105), false),
    (134, "Admin_UI_LinkTargetMenu", Some(105), false),
    (135, "Admin_UI_Menu2Command", Some(105), false),
    (136, "Admin_UI_Access", Some(105), false),
    (137, "Admin_Access_AccessSet2Type", Some(105), false),
    (138, "Admin_Access_AccessSet2AccessType", Some(105), false),
    (139, "Admin_Access_AccessSet2UserAbstract", Some(105), false),
    (140, "Admin_DataModel_TypeEventIsAllowedFor", Some(105), false),
];

/// (declaring type, name, table, column, attribute type, link)
const ATTRIBUTES: &[(Id, &str, Id, &str, AttributeType, Option<Id>)] = &[
    (100, "ID", 1, "ID", AttributeType::Id, None),
    (100, "Type", 1, "TYPEID", AttributeType::Type, None),
    (100, "UUID", 1, "UUID", AttributeType::String, None),
    (100, "Name", 1, "NAME", AttributeType::String, None),
    (100, "Revision", 1, "REVISION", AttributeType::String, None),
    (101, "ParentType", 2, "PARENTDMTYPE", AttributeType::Link, Some(101)),
    (101, "Abstract", 2, "ABSTRACT", AttributeType::Boolean, None),
    (101, "StoreId", 2, "STOREID", AttributeType::Integer, None),
    (101, "CacheExpression", 2, "CACHEEXPR", AttributeType::String, None),
    (102, "SQLTable", 3, "SQLTABLE", AttributeType::String, None),
    (102, "SQLColumnID", 3, "SQLCOLUMNID", AttributeType::String, None),
    (102, "SQLColumnType", 3, "SQLCOLUMNTYPE", AttributeType::String, None),
    (102, "SQLNewIDSelect", 3, "SQLNEWIDSELECT", AttributeType::String, None),
    (102, "DMTableMain", 3, "DMTABLEMAIN", AttributeType::Link, Some(102)),
    (102, "ReadOnly", 3, "READONLY", AttributeType::Boolean, None),
    (103, "ID", 4, "ID", AttributeType::Id, None),
    (103, "Name", 4, "NAME", AttributeType::String, None),
    (103, "DataModelTypeLink", 4, "DMTYPEID", AttributeType::Link, Some(101)),
    (103, "SQLTable", 4, "DMTABLEID", AttributeType::Link, Some(102)),
    (103, "SQLColumn", 4, "SQLCOLUMN", AttributeType::String, None),
    (103, "AttributeType", 4, "DMATTRIBUTETYPE", AttributeType::String, None),
    (103, "TypeLink", 4, "DMTYPELINK", AttributeType::Link, Some(101)),
    (104, "ID", 5, "ID", AttributeType::Id, None),
    (104, "Abstract", 5, "ABSTRACT", AttributeType::Link, Some(100)),
    (104, "Name", 5, "NAME", AttributeType::String, None),
    (104, "Value", 5, "VALUE", AttributeType::String, None),
    (105, "ID", 6, "ID", AttributeType::Id, None),
    (105, "Type", 6, "TYPEID", AttributeType::Type, None),
    (105, "From", 6, "FROMID", AttributeType::Link, Some(100)),
    (105, "To", 6, "TOID", AttributeType::Link, Some(100)),
    (106, "Abstract", 7, "ABSTRACT", AttributeType::Link, Some(100)),
    (106, "IndexPosition", 7, "INDEXPOS", AttributeType::Integer, None),
    (106, "Program", 7, "PROGRAM", AttributeType::String, None),
    (106, "Method", 7, "METHOD", AttributeType::String, None),
    (120, "Status", 8, "STATUS", AttributeType::Boolean, None),
];

/// Deterministic UUID of a seeded admin object
pub fn seed_uuid(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

pub(super) fn exists(conn: &Connection) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'cm_abstract'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(super) fn create(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(DDL)?;

    let mut insert_abstract =
        conn.prepare("INSERT INTO cm_abstract (ID, TYPEID, UUID, NAME) VALUES (?1, ?2, ?3, ?4)")?;

    let mut insert_table = conn.prepare(
        "INSERT INTO dm_table (ID, SQLTABLE, SQLCOLUMNID, SQLCOLUMNTYPE, DMTABLEMAIN) \
         VALUES (?1, ?2, 'ID', ?3, ?4)",
    )?;
    for &(id, name, sql_table, type_column, main) in TABLES {
        insert_abstract.execute(params![id, SQLTABLE_TYPE, seed_uuid(name).to_string(), name])?;
        insert_table.execute(params![id, sql_table, type_column, main])?;
    }

    let mut insert_type =
        conn.prepare("INSERT INTO dm_type (ID, PARENTDMTYPE, ABSTRACT) VALUES (?1, ?2, ?3)")?;
    for &(id, name, parent, is_abstract) in TYPES {
        insert_abstract.execute(params![id, TYPE_TYPE, seed_uuid(name).to_string(), name])?;
        insert_type.execute(params![id, parent, is_abstract])?;
    }

    let mut insert_attribute = conn.prepare(
        "INSERT INTO dm_attribute (NAME, DMTYPEID, DMTABLEID, SQLCOLUMN, DMATTRIBUTETYPE, DMTYPELINK) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for &(ty, name, table, column, attribute_type, link) in ATTRIBUTES {
        insert_attribute.execute(params![name, ty, table, column, attribute_type.as_str(), link])?;
    }

    Ok(())
}
