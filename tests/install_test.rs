use pretty_assertions::assert_eq;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use schemata::datamodel::DataModel;
use schemata::db::{Database, Query, Value};
use schemata::expr::VersionContext;
use schemata::install::{InstallReport, Installer, Opts, Status};
use schemata::update::{Applied, Error, Field, Kind, Kinds};

fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(
            fmt::layer()
                .pretty()
                .with_target(false)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
        )
        .try_init()
        .unwrap_or(());
}

fn model() -> DataModel {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.bootstrap().unwrap();
    DataModel::new(db)
}

fn uuid(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

fn install_with(installer: &Installer<'_>, files: &[(&str, String)], ctx: &VersionContext) -> InstallReport {
    let updates: Vec<_> = files
        .iter()
        .map(|(label, xml)| installer.parse(label, xml).unwrap())
        .collect();
    installer.install(&updates, ctx).unwrap()
}

fn install(model: &DataModel, files: &[(&str, String)]) -> InstallReport {
    install_with(&Installer::new(model), files, &VersionContext::latest(1))
}

fn applied<'r>(report: &'r InstallReport, file: &str) -> &'r Applied {
    match &report.get(file).unwrap().status {
        Status::Applied(applied) => applied,
        other => panic!("{file} was not applied: {other:?}"),
    }
}

fn command(name: &str) -> String {
    format!(
        r#"<ui-command>
            <uuid>{}</uuid>
            <definition>
                <name>{name}</name>
            </definition>
        </ui-command>"#,
        uuid(name)
    )
}

fn menu(name: &str, mode: &str, children: &[&str]) -> String {
    let children: String = children
        .iter()
        .map(|c| format!("<child>{c}</child>"))
        .collect();
    format!(
        r#"<ui-menu>
            <uuid>{}</uuid>
            <file-revision>1</file-revision>
            <definition mode="{mode}">
                <name>{name}</name>
                <childs>{children}</childs>
            </definition>
        </ui-menu>"#,
        uuid(name)
    )
}

/// Link row ids and target names of the children of a menu, in row order
fn children(model: &DataModel, menu: &str) -> Vec<(i64, String)> {
    let conn = model.db().read().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT l.ID, c.NAME FROM cm_abstract2abstract l \
             JOIN cm_abstract t ON t.ID = l.TYPEID \
             JOIN cm_abstract m ON m.ID = l.FROMID \
             JOIN cm_abstract c ON c.ID = l.TOID \
             WHERE t.NAME = 'Admin_UI_Menu2Command' AND m.NAME = ?1 \
             ORDER BY l.ID",
        )
        .unwrap();
    let rows = stmt
        .query_map([menu], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

fn properties(model: &DataModel, owner: &str) -> Vec<(String, String)> {
    let conn = model.db().read().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT p.NAME, p.VALUE FROM cm_property p \
             JOIN cm_abstract a ON a.ID = p.ABSTRACT \
             WHERE a.NAME = ?1 ORDER BY p.NAME",
        )
        .unwrap();
    let rows = stmt
        .query_map([owner], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

/// Number of rows in the tables an update may write to
fn rows(model: &DataModel) -> Vec<i64> {
    let conn = model.db().read().unwrap();
    ["cm_abstract", "cm_property", "cm_abstract2abstract", "cm_eventdef"]
        .iter()
        .map(|table| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap()
        })
        .collect()
}

fn commands() -> Vec<(&'static str, String)> {
    vec![
        ("open.xml", command("Open")),
        ("save.xml", command("Save")),
        ("close.xml", command("Close")),
    ]
}

#[test]
fn it_installs_menus_idempotently() {
    init();
    let model = model();

    let mut files = commands();
    files.push(("main.xml", menu("Main", "replace", &["Open", "Save", "Close"])));

    let report = install(&model, &files);
    assert!(report.is_success());
    let main = applied(&report, "main.xml");
    assert_eq!(main.created, 1);
    assert_eq!(main.links.inserted, 3);

    let before = children(&model, "Main");
    let names: Vec<_> = before.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(names, vec!["Open", "Save", "Close"]);

    let report = install(&model, &files);
    assert!(report.is_success());
    let main = applied(&report, "main.xml");
    assert_eq!(main.created, 0);
    assert!(main.links.is_noop());
    assert_eq!(children(&model, "Main"), before);
}

#[test]
fn it_reorders_menu_children_in_place() {
    init();
    let model = model();

    let mut files = commands();
    files.push(("main.xml", menu("Main", "replace", &["Open", "Save", "Close"])));
    install(&model, &files);
    let before = children(&model, "Main");

    let mut files = commands();
    files.push(("main.xml", menu("Main", "replace", &["Save", "Open", "Close"])));
    let report = install(&model, &files);
    let main = applied(&report, "main.xml");
    assert_eq!(main.links.relinked, 2);
    assert_eq!(main.links.inserted, 0);
    assert_eq!(main.links.deleted, 0);

    let after = children(&model, "Main");
    let ids = |rows: &[(i64, String)]| rows.iter().map(|(id, _)| *id).collect::<Vec<_>>();
    assert_eq!(ids(&after), ids(&before));
    let names: Vec<_> = after.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(names, vec!["Save", "Open", "Close"]);
}

#[test]
fn it_only_deletes_links_in_replace_mode() {
    init();
    let model = model();

    let mut files = commands();
    files.push(("main.xml", menu("Main", "replace", &["Open", "Save", "Close"])));
    install(&model, &files);

    // undeclared children are kept after the declared ones
    let mut files = commands();
    files.push(("main.xml", menu("Main", "update", &["Close"])));
    let report = install(&model, &files);
    assert_eq!(applied(&report, "main.xml").links.deleted, 0);
    let names: Vec<_> = children(&model, "Main").into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, vec!["Close", "Open", "Save"]);

    let mut files = commands();
    files.push(("main.xml", menu("Main", "replace", &["Close"])));
    let report = install(&model, &files);
    assert_eq!(applied(&report, "main.xml").links.deleted, 2);
    let names: Vec<_> = children(&model, "Main").into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, vec!["Close"]);
}

#[test]
fn it_skips_unresolved_link_targets() {
    init();
    let model = model();

    let files = vec![
        ("open.xml", command("Open")),
        ("main.xml", menu("Main", "replace", &["Open", "Missing"])),
    ];
    let report = install(&model, &files);
    assert!(report.is_success());

    let main = applied(&report, "main.xml");
    assert_eq!(main.links.inserted, 1);
    assert_eq!(main.links.skipped, 1);
    let names: Vec<_> = children(&model, "Main").into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, vec!["Open"]);
}

#[test]
fn it_replaces_properties() {
    init();
    let model = model();
    let file = |props: &str| {
        format!(
            r#"<ui-command>
                <uuid>{}</uuid>
                <definition>
                    <name>Print</name>
                    {props}
                </definition>
            </ui-command>"#,
            uuid("Print")
        )
    };

    install(
        &model,
        &[(
            "print.xml",
            file(r#"<property name="X">1</property><property name="Y">2</property>"#),
        )],
    );
    assert_eq!(
        properties(&model, "Print"),
        vec![
            ("X".to_string(), "1".to_string()),
            ("Y".to_string(), "2".to_string())
        ]
    );

    install(
        &model,
        &[("print.xml", file(r#"<property name="X">1</property>"#))],
    );
    assert_eq!(
        properties(&model, "Print"),
        vec![("X".to_string(), "1".to_string())]
    );
}

#[test]
fn it_skips_files_without_selected_definitions() {
    init();
    let model = model();
    let xml = format!(
        r#"<ui-command>
            <uuid>{}</uuid>
            <definition>
                <version-expression>version==2</version-expression>
                <name>Later</name>
            </definition>
        </ui-command>"#,
        uuid("Later")
    );

    let before = rows(&model);
    let report = install(&model, &[("later.xml", xml)]);
    assert!(report.is_success());
    assert!(matches!(report.get("later.xml").unwrap().status, Status::Skipped));
    assert_eq!(rows(&model), before);

    let snapshot = model.snapshot().unwrap();
    let command = snapshot.type_by_name("Admin_UI_Command").unwrap();
    let conn = model.db().read().unwrap();
    assert!(Query::new(command)
        .filter("UUID", uuid("Later"))
        .execute(&conn)
        .unwrap()
        .is_empty());
}

#[test]
fn it_rolls_back_failed_files_only() {
    init();
    let model = model();
    let broken = format!(
        r#"<datamodel-type>
            <uuid>{}</uuid>
            <definition>
                <name>Broken</name>
                <store-id>7</store-id>
                <attribute>
                    <sqlcolumn>NAME</sqlcolumn>
                </attribute>
            </definition>
        </datamodel-type>"#,
        uuid("Broken")
    );

    let files = vec![("broken.xml", broken), ("print.xml", command("Print"))];
    let report = install(&model, &files);
    assert!(!report.is_success());

    let failures: Vec<_> = report.failures().map(|(f, _)| f.file.as_str()).collect();
    assert_eq!(failures, vec!["broken.xml"]);
    assert!(matches!(
        report.get("broken.xml").unwrap().status,
        Status::Failed(Error::MissingKey(_))
    ));
    assert_eq!(applied(&report, "print.xml").definitions, 1);

    // the root row was created in the first step, the values were rolled back
    let conn = model.db().read().unwrap();
    let store_id: Option<i64> = conn
        .query_row(
            "SELECT t.STOREID FROM dm_type t JOIN cm_abstract a ON a.ID = t.ID \
             WHERE a.NAME = 'Broken'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(store_id, None);
}

#[test]
fn it_stops_at_the_first_failure_with_fail_fast() {
    init();
    let model = model();
    let kinds = Kinds::default().register(Kind::new("gadget", "Gadget"));
    let installer = Installer::new(&model)
        .with_kinds(kinds)
        .with_opts(Opts::default().fail_fast(true));

    let gadget = format!(
        "<gadget><uuid>{}</uuid><definition/></gadget>",
        uuid("Gadget")
    );
    let files = vec![("gadget.xml", gadget), ("print.xml", command("Print"))];
    let report = install_with(&installer, &files, &VersionContext::latest(1));

    assert!(matches!(
        report.get("gadget.xml").unwrap().status,
        Status::Failed(Error::UnknownType(_))
    ));
    assert!(matches!(
        report.get("print.xml").unwrap().status,
        Status::NotAttempted
    ));
}

#[test]
fn it_installs_instances_of_installed_types() {
    init();
    let model = model();
    {
        let conn = model.db().transaction().unwrap();
        conn.execute_batch("CREATE TABLE wd_widget (ID INTEGER PRIMARY KEY, CAPTION TEXT)")
            .unwrap();
        conn.commit().unwrap();
    }

    let table = format!(
        r#"<datamodel-sqltable>
            <uuid>{}</uuid>
            <definition>
                <name>WidgetSQLTable</name>
                <database>
                    <sql-table>wd_widget</sql-table>
                    <sql-column-id>ID</sql-column-id>
                </database>
                <parent>Admin_AbstractSQLTable</parent>
            </definition>
        </datamodel-sqltable>"#,
        uuid("WidgetSQLTable")
    );
    let ty = format!(
        r#"<datamodel-type>
            <uuid>{}</uuid>
            <file-revision>1</file-revision>
            <definition>
                <name>Widget</name>
                <parent>Admin_UI_Command</parent>
                <attribute>
                    <name>Caption</name>
                    <sqltable>WidgetSQLTable</sqltable>
                    <sqlcolumn>CAPTION</sqlcolumn>
                    <type>String</type>
                </attribute>
                <trigger event="access-check" program="AccessSetCheck"/>
            </definition>
        </datamodel-type>"#,
        uuid("Widget")
    );

    // the type refers to the table declared after it
    let report = install(&model, &[("widget-type.xml", ty), ("widget-table.xml", table)]);
    assert!(report.is_success(), "{report:?}");
    let installed = applied(&report, "widget-type.xml");
    assert_eq!(installed.entries.inserted, 1);
    assert_eq!(installed.events.inserted, 1);

    let widget = model.types().get_by_name("Widget").unwrap().unwrap();
    let command = model.types().get_by_name("Admin_UI_Command").unwrap().unwrap();
    assert!(widget.is_kind_of(&command));
    assert_eq!(widget.uuid(), Some(uuid("Widget")));
    assert!(widget.attribute("Caption").is_some());

    let checks: Vec<_> = widget.access_checks().collect();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].name(), "Widget.Admin_DataModel_AccessCheckEvent.1");
    assert_eq!(checks[0].program(), Some("AccessSetCheck"));
    assert_eq!(checks[0].index(), 1);

    let kinds = Kinds::default()
        .register(Kind::new("widget", "Widget").with_field(Field::new("caption", "Caption")));
    let installer = Installer::new(&model).with_kinds(kinds);
    let file = |caption: &str| {
        format!(
            "<widget><uuid>{}</uuid><definition><caption>{caption}</caption></definition></widget>",
            uuid("Hello")
        )
    };

    let report = install_with(&installer, &[("hello.xml", file("Hello"))], &VersionContext::latest(1));
    let first = applied(&report, "hello.xml");
    assert_eq!(first.created, 1);
    let instance = first.instances[0];

    let report = install_with(&installer, &[("hello.xml", file("World"))], &VersionContext::latest(1));
    let second = applied(&report, "hello.xml");
    assert_eq!(second.created, 0);
    assert_eq!(second.instances, vec![instance]);

    let widget = model.types().get_by_name("Widget").unwrap().unwrap();
    let conn = model.db().read().unwrap();
    let rows = Query::new(&widget)
        .filter("UUID", uuid("Hello"))
        .select("Name")
        .select("Caption")
        .execute(&conn)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].instance(), instance);
    assert_eq!(rows[0].get("Name"), Some(&Value::Text("-".to_string())));
    assert_eq!(rows[0].get("Caption"), Some(&Value::Text("World".to_string())));
}
