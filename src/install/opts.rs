use serde::Deserialize;

use crate::admin::{attributes, types};
use crate::errors::SerializationError;

/// Installer configuration
///
/// Options can be set with the builder methods or read from a JSON document with
/// kebab-case keys, missing keys keep their default value.
///
/// ```rust
/// use schemata::install::Opts;
///
/// let opts = Opts::from_json(r#"{"fail-fast": true, "default-name": "unnamed"}"#).unwrap();
/// let same = Opts::default().fail_fast(true).default_name("unnamed");
/// assert_eq!(opts, same);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Opts {
    /// Only instances of this type have properties. Defaults to `Admin_Abstract`
    pub(crate) property_owner_type: String,
    /// The attribute root instances are searched by, unless the kind says otherwise.
    /// Defaults to `UUID`
    pub(crate) search_attribute: String,
    /// Name of created instances if the definition declares none. Defaults to `-`
    pub(crate) default_name: String,
    /// The attribute the file revision is written to. Defaults to `Revision`
    pub(crate) revision_attribute: String,
    /// Stop the installation at the first file that fails. Defaults to false
    pub(crate) fail_fast: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            property_owner_type: types::ABSTRACT.to_string(),
            search_attribute: attributes::UUID.to_string(),
            default_name: "-".to_string(),
            revision_attribute: attributes::REVISION.to_string(),
            fail_fast: false,
        }
    }
}

impl Opts {
    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn property_owner_type(self, type_name: impl Into<String>) -> Self {
        let mut opts = self;
        opts.property_owner_type = type_name.into();
        opts
    }

    pub fn search_attribute(self, attribute: impl Into<String>) -> Self {
        let mut opts = self;
        opts.search_attribute = attribute.into();
        opts
    }

    pub fn default_name(self, name: impl Into<String>) -> Self {
        let mut opts = self;
        opts.default_name = name.into();
        opts
    }

    pub fn revision_attribute(self, attribute: impl Into<String>) -> Self {
        let mut opts = self;
        opts.revision_attribute = attribute.into();
        opts
    }

    pub fn fail_fast(self, fail_fast: bool) -> Self {
        let mut opts = self;
        opts.fail_fast = fail_fast;
        opts
    }
}
