//! Names of the core admin types and attributes
//!
//! These types are seeded by [`Database::bootstrap`](`crate::db::Database::bootstrap`) and are
//! the ones the installer and the loaders rely on.

/// Type names
pub mod types {
    pub const ABSTRACT: &str = "Admin_Abstract";

    pub const DATAMODEL_TYPE: &str = "Admin_DataModel_Type";
    pub const DATAMODEL_SQLTABLE: &str = "Admin_DataModel_SQLTable";
    pub const DATAMODEL_ATTRIBUTE: &str = "Admin_DataModel_Attribute";
    pub const DATAMODEL_TYPE_EVENT_IS_ALLOWED_FOR: &str = "Admin_DataModel_TypeEventIsAllowedFor";

    pub const COMMON_PROPERTY: &str = "Admin_Common_Property";
    pub const ABSTRACT2ABSTRACT: &str = "Admin_Abstract2Abstract";

    pub const EVENT_DEFINITION: &str = "Admin_Event_Definition";
    pub const ACCESS_CHECK_EVENT: &str = "Admin_DataModel_AccessCheckEvent";
    pub const UI_COMMAND_EXECUTE_EVENT: &str = "Admin_UI_CommandExecuteEvent";

    pub const UI_ABSTRACT: &str = "Admin_UI_Abstract";
    pub const UI_COMMAND: &str = "Admin_UI_Command";
    pub const UI_MENU: &str = "Admin_UI_Menu";
    pub const UI_SEARCH: &str = "Admin_UI_Search";
    pub const UI_COLLECTION: &str = "Admin_UI_Collection";
    pub const UI_FORM: &str = "Admin_UI_Form";
    pub const UI_TABLE: &str = "Admin_UI_Table";
    pub const UI_IMAGE: &str = "Admin_UI_Image";

    pub const UI_LINK_ICON: &str = "Admin_UI_LinkIcon";
    pub const UI_LINK_TARGET_FORM: &str = "Admin_UI_LinkTargetForm";
    pub const UI_LINK_TARGET_TABLE: &str = "Admin_UI_LinkTargetTable";
    pub const UI_LINK_TARGET_SEARCH: &str = "Admin_UI_LinkTargetSearch";
    pub const UI_LINK_TARGET_MENU: &str = "Admin_UI_LinkTargetMenu";
    pub const UI_MENU2COMMAND: &str = "Admin_UI_Menu2Command";
    pub const UI_ACCESS: &str = "Admin_UI_Access";

    pub const USER_ABSTRACT: &str = "Admin_User_Abstract";
    pub const USER_ROLE: &str = "Admin_User_Role";
    pub const USER_GROUP: &str = "Admin_User_Group";

    pub const ACCESS_TYPE: &str = "Admin_Access_AccessType";
    pub const ACCESS_SET: &str = "Admin_Access_AccessSet";
    pub const ACCESS_SET2TYPE: &str = "Admin_Access_AccessSet2Type";
    pub const ACCESS_SET2ACCESS_TYPE: &str = "Admin_Access_AccessSet2AccessType";
    pub const ACCESS_SET2USER: &str = "Admin_Access_AccessSet2UserAbstract";
}

/// Attribute names
pub mod attributes {
    pub const ID: &str = "ID";
    pub const TYPE: &str = "Type";
    pub const UUID: &str = "UUID";
    pub const NAME: &str = "Name";
    pub const REVISION: &str = "Revision";

    pub const FROM: &str = "From";
    pub const TO: &str = "To";

    pub const ABSTRACT: &str = "Abstract";
    pub const VALUE: &str = "Value";

    pub const INDEX_POSITION: &str = "IndexPosition";
    pub const PROGRAM: &str = "Program";
    pub const METHOD: &str = "Method";

    pub const PARENT_TYPE: &str = "ParentType";
    pub const STATUS: &str = "Status";
}
