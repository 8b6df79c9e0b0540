//! Reading of update files
//!
//! ```xml
//! <ui-command>
//!     <uuid>6a5e5c8e-0f4b-4c79-9a0a-2f1f8c0e3d21</uuid>
//!     <file-application>demo</file-application>
//!     <file-revision>2</file-revision>
//!     <definition>
//!         <version-expression>version >= 2</version-expression>
//!         <name>Demo_Open</name>
//!         <icon>Demo_Image</icon>
//!         <target>
//!             <form>Demo_Form</form>
//!         </target>
//!         <property name="Target">content</property>
//!         <trigger name="Demo_Open.Check" event="access-check" program="AccessSetCheck"/>
//!     </definition>
//! </ui-command>
//! ```
//!
//! The root tag selects the [Kind] of the file. Tags of a definition are matched by their path
//! relative to the definition tag against the fields, links and entries of the kind. Tags the
//! kind does not know are logged and ignored.

use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use thiserror::Error;
use tracing::{trace, warn};
use uuid::Uuid;

use super::{DefValue, Definition, Entry, EntrySchema, Field, Kind, Kinds, LinkInstance};
use super::{Event, Mode, Update};
use crate::admin::attributes;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read '{file}': {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid xml in '{file}': {source}")]
    Xml {
        file: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("'{file}' has no root element")]
    Empty { file: String },

    #[error("'{file}' ends before tag '{tag}' is closed")]
    Incomplete { file: String, tag: String },

    #[error("'{file}' has unknown update kind '{tag}'")]
    UnknownKind { file: String, tag: String },

    #[error("'{file}' does not declare a uuid")]
    MissingUuid { file: String },

    #[error("'{file}' declares invalid uuid '{value}'")]
    InvalidUuid { file: String, value: String },

    #[error("tag '{tag}' of '{file}' requires the attribute '{attribute}'")]
    MissingAttribute {
        file: String,
        tag: String,
        attribute: &'static str,
    },

    #[error("tag '{tag}' of '{file}' has invalid number '{value}'")]
    InvalidNumber {
        file: String,
        tag: String,
        value: String,
    },

    #[error("'{file}' declares unknown definition mode '{value}'")]
    InvalidMode { file: String, value: String },
}

/// An element of an update file with its text content and child elements
#[derive(Debug, Default)]
struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, quick_xml::Error> {
        let mut element = Element {
            tag: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn text(&self) -> String {
        self.text.trim().to_string()
    }
}

/// Read the element tree of a document
fn read_document(file: &str, xml: &str) -> Result<Element, ParseError> {
    let xml_error = |source: quick_xml::Error| ParseError::Xml {
        file: file.to_string(),
        source,
    };

    let mut reader = Reader::from_str(xml);
    let mut open: Vec<Element> = Vec::new();
    loop {
        let closed = match reader.read_event().map_err(xml_error)? {
            XmlEvent::Start(start) => {
                open.push(Element::open(&start).map_err(xml_error)?);
                continue;
            }
            XmlEvent::Empty(start) => Element::open(&start).map_err(xml_error)?,
            XmlEvent::End(_) => match open.pop() {
                Some(element) => element,
                None => return Err(ParseError::Empty { file: file.to_string() }),
            },
            XmlEvent::Text(text) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&text.unescape().map_err(xml_error)?);
                }
                continue;
            }
            XmlEvent::CData(data) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
                continue;
            }
            XmlEvent::Eof => {
                return Err(match open.pop() {
                    Some(element) => ParseError::Incomplete {
                        file: file.to_string(),
                        tag: element.tag,
                    },
                    None => ParseError::Empty { file: file.to_string() },
                })
            }
            _ => continue,
        };

        match open.last_mut() {
            Some(parent) => parent.children.push(closed),
            None => return Ok(closed),
        }
    }
}

fn join(path: &str, tag: &str) -> String {
    if path.is_empty() {
        tag.to_string()
    } else {
        format!("{path}/{tag}")
    }
}

fn field_value(field: &Field, raw: String) -> DefValue {
    match &field.reference {
        Some(type_name) => DefValue::Reference {
            type_name: type_name.clone(),
            name: raw,
        },
        None => DefValue::Text(raw),
    }
}

/// Reads the definitions of one file against its kind
struct Walker<'a> {
    file: &'a str,
    kind: &'a Kind,
}

impl Walker<'_> {
    fn required<'e>(
        &self,
        element: &'e Element,
        attribute: &'static str,
    ) -> Result<&'e str, ParseError> {
        element
            .attribute(attribute)
            .ok_or_else(|| ParseError::MissingAttribute {
                file: self.file.to_string(),
                tag: element.tag.clone(),
                attribute,
            })
    }

    fn number<T: std::str::FromStr>(&self, element: &Element, raw: &str) -> Result<T, ParseError> {
        raw.trim().parse().map_err(|_| ParseError::InvalidNumber {
            file: self.file.to_string(),
            tag: element.tag.clone(),
            value: raw.to_string(),
        })
    }

    fn definition(&self, element: &Element) -> Result<Definition, ParseError> {
        let mut def = Definition::new();
        match element.attribute("mode") {
            None | Some("replace") => {}
            Some("update") => def.mode = Mode::Update,
            Some(other) => {
                return Err(ParseError::InvalidMode {
                    file: self.file.to_string(),
                    value: other.to_string(),
                })
            }
        }
        self.walk(element, "", &mut def)?;
        Ok(def)
    }

    fn walk(&self, element: &Element, path: &str, def: &mut Definition) -> Result<(), ParseError> {
        for child in &element.children {
            let path = join(path, &child.tag);
            match path.as_str() {
                "version-expression" => def.expression = Some(child.text()),
                "name" => {
                    def.values
                        .insert(attributes::NAME.to_string(), DefValue::Text(child.text()));
                }
                "property" => {
                    let name = self.required(child, "name")?;
                    def.properties.insert(name.to_string(), child.text());
                }
                "trigger" => def.events.push(self.event(child)?),
                path => {
                    if let Some(field) = self.kind.field(path) {
                        def.values
                            .insert(field.attribute.clone(), field_value(field, child.text()));
                    } else if let Some(tag) = self.kind.link_tag(path) {
                        def.links
                            .entry(tag.link.link_type.clone())
                            .or_default()
                            .push(self.link(child)?);
                    } else if let Some(schema) = self.kind.entries().filter(|e| e.path == path) {
                        def.entries.push(self.entry(child, schema));
                    } else if self.kind.knows_prefix(path) {
                        self.walk(child, path, def)?;
                    } else {
                        warn!(file = self.file, tag = path, "ignoring unknown tag");
                    }
                }
            }
        }
        Ok(())
    }

    fn link(&self, element: &Element) -> Result<LinkInstance, ParseError> {
        let mut link = LinkInstance::new(element.text());
        for (name, value) in &element.attributes {
            match name.as_str() {
                "order" => link.order = Some(self.number(element, value)?),
                name => {
                    link.values.insert(name.to_string(), value.clone());
                }
            }
        }
        Ok(link)
    }

    fn entry(&self, element: &Element, schema: &EntrySchema) -> Entry {
        let mut entry = Entry::new();
        for child in &element.children {
            match schema.fields.iter().find(|f| f.path == child.tag) {
                Some(field) => {
                    entry
                        .values
                        .insert(field.attribute.clone(), field_value(field, child.text()));
                }
                None => warn!(
                    file = self.file,
                    tag = child.tag.as_str(),
                    "ignoring unknown entry tag"
                ),
            }
        }
        entry
    }

    fn event(&self, element: &Element) -> Result<Event, ParseError> {
        let mut event = Event::new(self.required(element, "event")?);
        event.name = element.attribute("name").map(str::to_string);
        event.program = element.attribute("program").map(str::to_string);
        event.method = element.attribute("method").map(str::to_string);
        if let Some(index) = element.attribute("index") {
            event.index = Some(self.number(element, index)?);
        }
        for child in &element.children {
            match child.tag.as_str() {
                "property" => {
                    let name = self.required(child, "name")?;
                    event.properties.insert(name.to_string(), child.text());
                }
                tag => warn!(file = self.file, tag, "ignoring unknown trigger tag"),
            }
        }
        Ok(event)
    }
}

pub(super) fn parse(file: &str, xml: &str, kinds: &Kinds) -> Result<Update, ParseError> {
    let root = read_document(file, xml)?;
    let kind = kinds.get(&root.tag).ok_or_else(|| ParseError::UnknownKind {
        file: file.to_string(),
        tag: root.tag.clone(),
    })?;
    let walker = Walker { file, kind };

    let mut uuid = None;
    let mut application = None;
    let mut revision = None;
    let mut definitions = Vec::new();
    for child in &root.children {
        match child.tag.as_str() {
            "uuid" => uuid = Some(child.text()),
            "file-application" => application = Some(child.text()),
            "file-revision" => revision = Some(child.text()),
            "definition" => definitions.push(walker.definition(child)?),
            tag => warn!(file, tag, "ignoring unknown tag"),
        }
    }

    let value = uuid.ok_or_else(|| ParseError::MissingUuid {
        file: file.to_string(),
    })?;
    let uuid = Uuid::parse_str(&value).map_err(|_| ParseError::InvalidUuid {
        file: file.to_string(),
        value,
    })?;

    let mut update = Update::new(file, kind.clone(), uuid);
    if let Some(application) = application {
        update = update.with_application(application);
    }
    if let Some(revision) = revision {
        update = update.with_revision(revision);
    }
    for def in definitions {
        update = update.with_definition(def);
    }
    trace!(
        file,
        kind = root.tag.as_str(),
        definitions = update.definitions().len(),
        "update parsed"
    );
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::types;
    use pretty_assertions::assert_eq;

    const MENU: &str = r#"
        <ui-menu>
            <uuid>2fd9c8b6-5a9d-4c44-8a1b-0b4c2f3e9a11</uuid>
            <file-application>demo</file-application>
            <file-revision>3</file-revision>
            <definition>
                <version-expression>(version==latest)</version-expression>
                <name>Main_Menu</name>
                <icon>Main_Image</icon>
                <childs>
                    <child>Main_Open</child>
                    <child order="1">Main_Close</child>
                </childs>
                <property name="Label">Main Menu</property>
                <trigger event="ui-execute" program="Open" index="2">
                    <property name="Mode">edit</property>
                </trigger>
                <colour>red</colour>
            </definition>
            <definition mode="update">
                <version-expression>version &lt; 3</version-expression>
            </definition>
        </ui-menu>
    "#;

    #[test]
    fn it_parses_a_menu() {
        let update = Update::parse("Main_Menu.xml", MENU, &Kinds::default()).unwrap();
        assert_eq!(update.label(), "Main_Menu.xml");
        assert_eq!(
            update.uuid().to_string(),
            "2fd9c8b6-5a9d-4c44-8a1b-0b4c2f3e9a11"
        );
        assert_eq!(update.application(), Some("demo"));
        assert_eq!(update.revision(), Some("3"));
        assert_eq!(update.kind().type_name(), types::UI_MENU);
        assert_eq!(update.definitions().len(), 2);

        let def = &update.definitions()[0];
        assert_eq!(def.expression.as_deref(), Some("(version==latest)"));
        assert_eq!(def.mode, Mode::Replace);
        assert_eq!(def.name(), Some("Main_Menu"));
        assert_eq!(
            def.links[types::UI_MENU2COMMAND],
            vec![
                LinkInstance::new("Main_Open"),
                LinkInstance::new("Main_Close").with_order(1)
            ]
        );
        assert_eq!(
            def.links[types::UI_LINK_ICON],
            vec![LinkInstance::new("Main_Image")]
        );
        assert_eq!(def.properties["Label"], "Main Menu");
        assert_eq!(
            def.events,
            vec![Event::new("ui-execute")
                .with_program("Open")
                .with_index(2)
                .with_property("Mode", "edit")]
        );

        let def = &update.definitions()[1];
        assert_eq!(def.mode, Mode::Update);
        assert_eq!(def.expression.as_deref(), Some("version < 3"));
    }

    #[test]
    fn it_parses_type_attributes() {
        let xml = r#"
            <datamodel-type>
                <uuid>c7d2d3c4-8a55-4d3f-9a8e-50d2d9c1a001</uuid>
                <definition>
                    <name>Widget</name>
                    <parent>Admin_UI_Command</parent>
                    <attribute>
                        <name>Colour</name>
                        <sqltable>Admin_AbstractSQLTable</sqltable>
                        <sqlcolumn>REVISION</sqlcolumn>
                        <type>String</type>
                    </attribute>
                </definition>
            </datamodel-type>
        "#;
        let update = Update::parse("Widget.xml", xml, &Kinds::default()).unwrap();
        let def = &update.definitions()[0];
        assert_eq!(def.expression, None);
        assert_eq!(
            def.values[attributes::PARENT_TYPE],
            DefValue::Reference {
                type_name: types::DATAMODEL_TYPE.to_string(),
                name: "Admin_UI_Command".to_string()
            }
        );
        assert_eq!(
            def.entries,
            vec![Entry::new()
                .with_value("Name", "Colour")
                .with_value(
                    "SQLTable",
                    DefValue::Reference {
                        type_name: types::DATAMODEL_SQLTABLE.to_string(),
                        name: "Admin_AbstractSQLTable".to_string()
                    }
                )
                .with_value("SQLColumn", "REVISION")
                .with_value("AttributeType", "String")]
        );
    }

    #[test]
    fn it_requires_a_valid_uuid() {
        let kinds = Kinds::default();
        assert!(matches!(
            Update::parse("a.xml", "<ui-image><definition/></ui-image>", &kinds),
            Err(ParseError::MissingUuid { .. })
        ));
        assert!(matches!(
            Update::parse("a.xml", "<ui-image><uuid>nope</uuid></ui-image>", &kinds),
            Err(ParseError::InvalidUuid { .. })
        ));
    }

    #[test]
    fn it_rejects_unknown_documents() {
        let kinds = Kinds::default();
        assert!(matches!(
            Update::parse("a.xml", "<spaceship/>", &kinds),
            Err(ParseError::UnknownKind { .. })
        ));
        assert!(matches!(
            Update::parse("a.xml", "<ui-image>", &kinds),
            Err(ParseError::Incomplete { .. })
        ));
        assert!(matches!(
            Update::parse("a.xml", "<ui-image></ui-menu>", &kinds),
            Err(ParseError::Xml { .. })
        ));
        assert!(matches!(
            Update::parse("a.xml", "  ", &kinds),
            Err(ParseError::Empty { .. })
        ));
        let bad_order = r#"
            <ui-menu>
                <uuid>2fd9c8b6-5a9d-4c44-8a1b-0b4c2f3e9a11</uuid>
                <definition><childs><child order="first">A</child></childs></definition>
            </ui-menu>
        "#;
        assert!(matches!(
            Update::parse("a.xml", bad_order, &kinds),
            Err(ParseError::InvalidNumber { .. })
        ));
    }
}
