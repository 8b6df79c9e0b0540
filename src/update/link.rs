use std::collections::BTreeMap;

use crate::db::Instance;
use crate::Id;

/// A relationship from the root instance of an update to other instances
///
/// Link rows are instances of `link_type`, pointing to the owner through `parent_attribute`
/// and to the target, an instance of `child_type` or one of its descendants, through
/// `child_attribute`. The rows of an ordered link keep the declared sequence of its targets
/// in ascending row id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub link_type: String,
    pub parent_attribute: String,
    pub child_type: String,
    pub child_attribute: String,
    pub ordered: bool,
}

impl Link {
    /// A link stored in a `From`/`To` link table
    pub fn new(link_type: impl Into<String>, child_type: impl Into<String>) -> Self {
        Self {
            link_type: link_type.into(),
            parent_attribute: crate::admin::attributes::FROM.to_string(),
            child_type: child_type.into(),
            child_attribute: crate::admin::attributes::TO.to_string(),
            ordered: false,
        }
    }

    pub fn ordered(self) -> Self {
        let mut link = self;
        link.ordered = true;
        link
    }

    /// Swap the direction of the link, for links owned from the `To` side
    pub fn reversed(self) -> Self {
        let mut link = self;
        std::mem::swap(&mut link.parent_attribute, &mut link.child_attribute);
        link
    }
}

/// What reconciliation did with a declared link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Pending,
    /// The target could not be found, the link was skipped
    Unresolved,
    /// A link row to the target already existed and was kept
    Unchanged,
    /// The values of the existing link row were written
    Updated,
    /// An existing row was pointed to the target to keep the declared order
    Relinked,
    Inserted,
}

/// One declared link to a target, identified by name or UUID
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkInstance {
    pub name: String,
    /// 1-based position among the targets of an ordered link
    pub order: Option<usize>,
    /// Values of further attributes of the link row
    pub values: BTreeMap<String, String>,
    pub(crate) child_id: Option<Id>,
    pub(crate) row: Option<Instance>,
    pub(crate) state: LinkState,
}

impl LinkInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_order(self, order: usize) -> Self {
        let mut link = self;
        link.order = Some(order);
        link
    }

    pub fn with_value(self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        let mut link = self;
        link.values.insert(attribute.into(), value.into());
        link
    }

    /// Id of the resolved target
    pub fn child_id(&self) -> Option<Id> {
        self.child_id
    }

    /// The link row written for this link
    pub fn row(&self) -> Option<Instance> {
        self.row
    }

    pub fn oid(&self) -> Option<String> {
        self.row.map(|r| r.oid())
    }

    pub fn state(&self) -> LinkState {
        self.state
    }
}
