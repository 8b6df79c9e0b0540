#![cfg_attr(docsrs, feature(doc_cfg))]
//! schemata is a data-model metadata cache and declarative installer for relational admin
//! schemas.
//!
//! The library keeps an in-memory object graph of the data model (types, attributes, SQL table
//! mappings, access sets) loaded from a backing store, and reconciles versioned XML object
//! definitions against the persisted rows of that store.
//!
//! # Data model
//!
//! A [DataModel](`datamodel::DataModel`) owns one [Cache](`cache::Cache`) per admin entity
//! (SQL tables, types, roles, groups, access types and access sets). Caches are loaded lazily on
//! first access, can be invalidated or reloaded explicitly, and publish every new generation
//! atomically: readers either see the previous generation or the new one, never a partially
//! built one. A failed reload keeps serving the previous generation.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schemata::db::Database;
//! use schemata::datamodel::DataModel;
//!
//! let db = Arc::new(Database::open_in_memory().unwrap());
//! db.bootstrap().unwrap();
//!
//! let model = DataModel::new(db);
//! let menu = model.types().get_by_name("Admin_UI_Menu").unwrap().unwrap();
//! let command = model.types().get_by_name("Admin_UI_Command").unwrap().unwrap();
//!
//! assert!(menu.is_kind_of(&command));
//! assert!(menu.attribute("Name").is_some());
//! ```
//!
//! Types form a single-inheritance hierarchy. Attributes are declared once, on the type that
//! owns them, and every descendant exposes its own copy of each inherited attribute. The set of
//! child types of a type always includes all of its descendants.
//!
//! # Installer
//!
//! An [Installer](`install::Installer`) reads update files, one per logical admin object, and
//! applies them against the database.
//!
//! ```xml
//! <ui-menu>
//!     <uuid>2fd9c8b6-5a9d-4c44-8a1b-0b4c2f3e9a11</uuid>
//!     <file-revision>3</file-revision>
//!     <definition>
//!         <version-expression>(version==latest)</version-expression>
//!         <name>Main_Menu</name>
//!         <childs>
//!             <child>Main_Open</child>
//!             <child>Main_Close</child>
//!         </childs>
//!         <property name="Label">Main Menu</property>
//!     </definition>
//! </ui-menu>
//! ```
//!
//! Each file holds one or more definitions scoped by a version expression. When applied, the
//! definitions selected for the current [VersionContext](`expr::VersionContext`) are written
//! to the database: the root row is found by UUID or created, scalar attributes are updated,
//! links to other objects are reconciled against the declared set (ordered links keep the
//! declared sequence), properties are replaced, and event definitions are upserted.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schemata::db::Database;
//! use schemata::datamodel::DataModel;
//! use schemata::expr::VersionContext;
//! use schemata::install::Installer;
//!
//! let db = Arc::new(Database::open_in_memory().unwrap());
//! db.bootstrap().unwrap();
//! let model = DataModel::new(db);
//!
//! let installer = Installer::new(&model);
//! let update = installer.read_file("menus/Main_Menu.xml").unwrap();
//! let report = installer.install(&[update], &VersionContext::latest(3)).unwrap();
//!
//! assert!(report.is_success());
//! ```
//!
//! # Logging
//!
//! The library uses the [tracing crate](https://crates.io/crates/tracing) for reporting. Cache
//! reloads, installations and applied updates are reported as spans. With the `logging` feature
//! enabled, [init_logging] installs a subscriber that turns those spans into
//! [log](https://crates.io/crates/log) records.

pub mod access;
pub mod admin;
pub mod cache;
pub mod datamodel;
pub mod db;
pub mod errors;
pub mod expr;
pub mod install;
pub mod update;

#[cfg(feature = "logging")]
mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::init as init_logging;

/// Numeric identifier of a persisted row
pub type Id = i64;
