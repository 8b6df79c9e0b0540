//! Access types, access sets and access checks
//!
//! Access to instances of a type is decided by the access check events attached to the type.
//! Every event names a program registered in [Programs]; programs are run in event order and
//! the result of the last one decides. A type without access check events grants access.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::cache::{CacheObject, Generation};
use crate::datamodel::{EventDefinition, Type};
use crate::db::Instance;
use crate::errors::InternalError;
use crate::Id;

mod principal;

pub use principal::*;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access check event '{event}' names unknown program '{program}'")]
    UnknownProgram { event: String, program: String },

    #[error("access check event '{0}' does not name a program")]
    MissingProgram(String),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// A kind of access, e.g. read, modify or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessType {
    pub(crate) id: Id,
    pub(crate) uuid: Option<Uuid>,
    pub(crate) name: String,
}

impl AccessType {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CacheObject for AccessType {
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

/// Grants a set of access types on a set of data model types to a set of principals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessSet {
    pub(crate) id: Id,
    pub(crate) uuid: Option<Uuid>,
    pub(crate) name: String,
    pub(crate) access_types: BTreeSet<Id>,
    pub(crate) types: BTreeSet<Id>,
    pub(crate) principals: BTreeSet<Id>,
}

impl AccessSet {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access_types(&self) -> &BTreeSet<Id> {
        &self.access_types
    }

    pub fn types(&self) -> &BTreeSet<Id> {
        &self.types
    }

    pub fn principals(&self) -> &BTreeSet<Id> {
        &self.principals
    }

    /// Return true if the set grants the access type to any of the subject principals
    pub fn grants(&self, access_type: Id, subject: &Subject) -> bool {
        self.access_types.contains(&access_type)
            && self.principals.iter().any(|p| subject.has(*p))
    }
}

impl CacheObject for AccessSet {
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

/// Input of an access check program
pub struct AccessRequest<'a> {
    pub ty: &'a Type,
    pub instance: Option<&'a Instance>,
    pub access_type: &'a AccessType,
    pub subject: &'a Subject,
    pub event: &'a EventDefinition,
    pub access_sets: &'a Generation<AccessSet>,
    /// Result of the previous check, `true` for the first one
    pub granted: bool,
}

/// A program deciding access to the instances of a type
pub trait AccessCheck: Send + Sync {
    fn check(&self, request: &AccessRequest<'_>) -> Result<bool, AccessError>;
}

impl<F> AccessCheck for F
where
    F: Fn(&AccessRequest<'_>) -> Result<bool, AccessError> + Send + Sync,
{
    fn check(&self, request: &AccessRequest<'_>) -> Result<bool, AccessError> {
        (self)(request)
    }
}

/// Grants access if one of the access sets assigned to the type grants it to the subject
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessSetCheck;

impl AccessCheck for AccessSetCheck {
    fn check(&self, request: &AccessRequest<'_>) -> Result<bool, AccessError> {
        Ok(request
            .ty
            .access_sets()
            .iter()
            .filter_map(|id| request.access_sets.get(*id))
            .any(|set| set.grants(request.access_type.id(), request.subject)))
    }
}

/// Registry of access check programs by name
#[derive(Clone)]
pub struct Programs {
    programs: HashMap<String, Arc<dyn AccessCheck>>,
}

impl fmt::Debug for Programs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.programs.keys().collect();
        names.sort();
        f.debug_struct("Programs").field("programs", &names).finish()
    }
}

impl Default for Programs {
    fn default() -> Self {
        Self::empty().register("AccessSetCheck", AccessSetCheck)
    }
}

impl Programs {
    pub fn empty() -> Self {
        Self {
            programs: HashMap::new(),
        }
    }

    pub fn register(self, name: impl Into<String>, check: impl AccessCheck + 'static) -> Self {
        let mut programs = self;
        programs.programs.insert(name.into(), Arc::new(check));
        programs
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AccessCheck>> {
        self.programs.get(name)
    }
}

/// Everything needed to decide access on behalf of a subject
pub struct AccessContext<'a> {
    programs: &'a Programs,
    access_sets: Arc<Generation<AccessSet>>,
    subject: &'a Subject,
}

impl<'a> AccessContext<'a> {
    pub fn new(
        programs: &'a Programs,
        access_sets: Arc<Generation<AccessSet>>,
        subject: &'a Subject,
    ) -> Self {
        Self {
            programs,
            access_sets,
            subject,
        }
    }

    pub fn subject(&self) -> &Subject {
        self.subject
    }
}

impl Type {
    /// Decide if the subject of the context has the given access to the type or an instance
    #[instrument(level = "trace", skip_all, fields(ty = self.name(), access = access_type.name()), ret, err)]
    pub fn has_access(
        &self,
        ctx: &AccessContext<'_>,
        instance: Option<&Instance>,
        access_type: &AccessType,
    ) -> Result<bool, AccessError> {
        let mut granted = true;
        for event in self.access_checks() {
            let program = event
                .program()
                .ok_or_else(|| AccessError::MissingProgram(event.name().to_string()))?;
            let check = ctx
                .programs
                .get(program)
                .ok_or_else(|| AccessError::UnknownProgram {
                    event: event.name().to_string(),
                    program: program.to_string(),
                })?;

            granted = check.check(&AccessRequest {
                ty: self,
                instance,
                access_type,
                subject: ctx.subject,
                event,
                access_sets: &ctx.access_sets,
                granted,
            })?;
        }
        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin;
    use crate::datamodel::{build_types, EventRow, TypeRow, TypeSource};

    fn read() -> AccessType {
        AccessType {
            id: 1,
            uuid: None,
            name: "read".to_string(),
        }
    }

    fn document(programs: &[&str]) -> Arc<Type> {
        let ty = |id, name: &str, parent| TypeRow {
            id,
            name: name.to_string(),
            parent,
            ..Default::default()
        };
        let source = TypeSource {
            types: vec![
                ty(50, admin::types::EVENT_DEFINITION, None),
                ty(51, admin::types::ACCESS_CHECK_EVENT, Some(50)),
                ty(100, "Document", None),
            ],
            events: programs
                .iter()
                .enumerate()
                .map(|(i, program)| EventRow {
                    id: 200 + i as Id,
                    owner: 100,
                    name: format!("check{i}"),
                    event_type: 51,
                    index: i as i64,
                    program: Some(program.to_string()),
                    method: None,
                })
                .collect(),
            access_sets: vec![(300, 100)],
            ..Default::default()
        };
        build_types(source, &Generation::default())
            .unwrap()
            .into_iter()
            .find(|t| t.name() == "Document")
            .unwrap()
    }

    fn allow(_: &AccessRequest<'_>) -> Result<bool, AccessError> {
        Ok(true)
    }

    fn deny(_: &AccessRequest<'_>) -> Result<bool, AccessError> {
        Ok(false)
    }

    fn keep(req: &AccessRequest<'_>) -> Result<bool, AccessError> {
        Ok(req.granted)
    }

    fn programs() -> Programs {
        Programs::default()
            .register("Allow", allow)
            .register("Deny", deny)
    }

    #[test]
    fn it_grants_access_without_checks() {
        let programs = programs();
        let subject = Subject::new();
        let ctx = AccessContext::new(&programs, Arc::new(Generation::default()), &subject);
        assert!(document(&[]).has_access(&ctx, None, &read()).unwrap());
    }

    #[test]
    fn it_lets_the_last_check_decide() {
        let programs = programs();
        let subject = Subject::new();
        let ctx = AccessContext::new(&programs, Arc::new(Generation::default()), &subject);

        assert!(document(&["Deny", "Allow"])
            .has_access(&ctx, None, &read())
            .unwrap());
        assert!(!document(&["Allow", "Deny"])
            .has_access(&ctx, None, &read())
            .unwrap());
    }

    #[test]
    fn it_passes_the_previous_result_to_the_next_check() {
        let programs = programs().register("Keep", keep);
        let subject = Subject::new();
        let ctx = AccessContext::new(&programs, Arc::new(Generation::default()), &subject);

        assert!(!document(&["Deny", "Keep"])
            .has_access(&ctx, None, &read())
            .unwrap());
    }

    #[test]
    fn it_fails_on_unknown_programs() {
        let programs = programs();
        let subject = Subject::new();
        let ctx = AccessContext::new(&programs, Arc::new(Generation::default()), &subject);

        let err = document(&["Allow", "Missing"])
            .has_access(&ctx, None, &read())
            .unwrap_err();
        assert!(matches!(err, AccessError::UnknownProgram { ref program, .. } if program == "Missing"));
    }

    #[test]
    fn it_checks_access_sets() {
        let programs = programs();
        let sets = Arc::new(
            Generation::new([Arc::new(AccessSet {
                id: 300,
                uuid: None,
                name: "Documents".to_string(),
                access_types: BTreeSet::from([1]),
                types: BTreeSet::from([100]),
                principals: BTreeSet::from([7]),
            })])
            .unwrap(),
        );

        let admin = Subject::new().with_id(7);
        let guest = Subject::new().with_id(8);
        let ty = document(&["AccessSetCheck"]);

        let ctx = AccessContext::new(&programs, sets.clone(), &admin);
        assert!(ty.has_access(&ctx, None, &read()).unwrap());

        let ctx = AccessContext::new(&programs, sets, &guest);
        assert!(!ty.has_access(&ctx, None, &read()).unwrap());
    }
}
