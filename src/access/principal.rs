use std::collections::BTreeSet;
use uuid::Uuid;

use crate::cache::CacheObject;
use crate::Id;

/// A role or group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub(crate) id: Id,
    pub(crate) uuid: Option<Uuid>,
    pub(crate) name: String,
    pub(crate) active: bool,
}

impl Principal {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl CacheObject for Principal {
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

/// The principals an access request is made on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    principals: BTreeSet<Id>,
}

impl Subject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a role or group to the subject
    pub fn with(self, principal: &Principal) -> Self {
        self.with_id(principal.id)
    }

    pub fn with_id(self, principal: Id) -> Self {
        let mut subject = self;
        subject.principals.insert(principal);
        subject
    }

    pub fn has(&self, principal: Id) -> bool {
        self.principals.contains(&principal)
    }

    pub fn principals(&self) -> &BTreeSet<Id> {
        &self.principals
    }
}
