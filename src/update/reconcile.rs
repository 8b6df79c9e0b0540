use std::collections::{BTreeMap, HashSet};
use std::ops::AddAssign;
use tracing::{debug, instrument, trace, warn};

use super::apply::Session;
use super::{DefValue, Error, Link, LinkInstance, LinkState, Mode};
use crate::datamodel::Type;
use crate::db::{type_of, Edit, Insert, Instance, Query, Value};
use crate::Id;

/// Counters of the rows touched by a reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    /// Existing link rows pointed to another target to keep the declared order
    pub relinked: usize,
    pub deleted: usize,
    /// Declared links whose target could not be resolved
    pub skipped: usize,
}

impl ReconcileStats {
    /// Whether no row was written
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.relinked == 0 && self.deleted == 0
    }
}

impl AddAssign for ReconcileStats {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.relinked += other.relinked;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
    }
}

/// The result of reconciling one link of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub stats: ReconcileStats,
    /// The declared links with their resolved targets and rows
    pub links: Vec<LinkInstance>,
}

/// A persisted link row
#[derive(Debug, Clone, Copy)]
struct Existing {
    row: Instance,
    child: Id,
}

/// Read the persisted rows of the link from the owner
///
/// Rows whose link type or target type do not match the link anymore are left alone.
fn existing_links(
    session: &Session<'_>,
    owner: Instance,
    link: &Link,
    link_type: &Type,
    child_type: &Type,
) -> Result<Vec<Existing>, Error> {
    let rows = Query::new(link_type)
        .filter(link.parent_attribute.as_str(), owner.id())
        .select(link.child_attribute.as_str())
        .execute(session.conn)?;

    let mut existing = Vec::with_capacity(rows.len());
    for row in rows {
        if !session.instance_type(row.instance())?.is_kind_of(link_type) {
            debug!(row = %row.instance(), "ignoring link row of another link type");
            continue;
        }
        let Some(child) = row
            .get(&link.child_attribute)
            .and_then(Value::as_integer)
        else {
            debug!(row = %row.instance(), "ignoring link row without target");
            continue;
        };
        let child_kind = type_of(session.conn, child_type, child)?
            .and_then(|id| session.model.types().get(id));
        match child_kind {
            Some(ty) if ty.is_kind_of(child_type) => existing.push(Existing {
                row: row.instance(),
                child,
            }),
            _ => debug!(row = %row.instance(), child, "ignoring link row to another type"),
        }
    }
    Ok(existing)
}

/// Resolve the targets of the declared links
///
/// Unresolved, ambiguous and repeated targets are skipped.
fn resolve_targets(
    session: &Session<'_>,
    link: &Link,
    child_type: &Type,
    links: &mut [LinkInstance],
    stats: &mut ReconcileStats,
) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for declared in links.iter_mut() {
        let found = session.find_by_name(child_type, &declared.name)?;
        match found.as_slice() {
            [target] if seen.insert(target.id()) => {
                declared.child_id = Some(target.id());
            }
            [_] => {
                debug!(target = declared.name.as_str(), "target declared twice, skipping");
                declared.state = LinkState::Unresolved;
                stats.skipped += 1;
            }
            [] => {
                warn!(
                    link = link.link_type.as_str(),
                    target = declared.name.as_str(),
                    "link target not found, skipping"
                );
                declared.state = LinkState::Unresolved;
                stats.skipped += 1;
            }
            _ => {
                warn!(
                    link = link.link_type.as_str(),
                    target = declared.name.as_str(),
                    count = found.len(),
                    "link target is ambiguous, skipping"
                );
                declared.state = LinkState::Unresolved;
                stats.skipped += 1;
            }
        }
    }
    Ok(())
}

fn link_values(
    session: &Session<'_>,
    link_type: &Type,
    declared: &LinkInstance,
) -> Result<Vec<(String, Value)>, Error> {
    let values: BTreeMap<String, DefValue> = declared
        .values
        .iter()
        .map(|(k, v)| (k.clone(), DefValue::Text(v.clone())))
        .collect();
    session.resolve_values(link_type, &values)
}

fn insert_link(
    session: &Session<'_>,
    owner: Instance,
    link: &Link,
    link_type: &Type,
    child: Id,
    values: Vec<(String, Value)>,
) -> Result<Instance, Error> {
    let mut insert = Insert::new(link_type)
        .set(link.parent_attribute.as_str(), owner.id())
        .set(link.child_attribute.as_str(), child);
    for (attribute, value) in values {
        insert = insert.set(attribute, value);
    }
    Ok(insert.execute(session.conn)?)
}

fn edit_link(
    session: &Session<'_>,
    row: Instance,
    child: Option<(&Link, Id)>,
    values: Vec<(String, Value)>,
) -> Result<(), Error> {
    let ty = session.instance_type(row)?;
    let mut edit = Edit::new(ty, row.id());
    if let Some((link, child)) = child {
        edit = edit.set(link.child_attribute.as_str(), child);
    }
    for (attribute, value) in values {
        edit = edit.set(attribute, value);
    }
    edit.execute(session.conn)?;
    Ok(())
}

/// Make the persisted links of `owner` match the declared ones
///
/// `desired` is the full set of declared targets. Existing rows to a declared target are
/// kept, rows for new targets are inserted and, in [Mode::Replace], rows to targets that are
/// no longer declared are deleted.
///
/// The rows of an ordered link hold the declared sequence in ascending row id order. When the
/// sequence changes, existing rows are pointed to their new target rather than deleted and
/// inserted again. Declared links with an explicit `order` are placed at that position, which
/// makes the reconciliation of any link order sensitive.
#[instrument(
    name = "reconcile_links",
    level = "debug",
    skip_all,
    fields(link = link.link_type.as_str(), owner = %owner),
    err
)]
pub(crate) fn set_links(
    session: &Session<'_>,
    owner: Instance,
    link: &Link,
    desired: &[LinkInstance],
    mode: Mode,
) -> Result<LinkReport, Error> {
    let link_type = session.require_type(&link.link_type)?;
    let child_type = session.require_type(&link.child_type)?;

    let mut stats = ReconcileStats::default();
    let existing = existing_links(session, owner, link, link_type, child_type)?;
    let mut links = desired.to_vec();
    resolve_targets(session, link, child_type, &mut links, &mut stats)?;

    let ordered = link.ordered || links.iter().any(|l| l.order.is_some());
    if ordered {
        reconcile_ordered(session, owner, link, link_type, &existing, &mut links, mode, &mut stats)?;
    } else {
        reconcile_unordered(session, owner, link, link_type, &existing, &mut links, mode, &mut stats)?;
    }

    trace!(?stats, "links reconciled");
    Ok(LinkReport { stats, links })
}

#[allow(clippy::too_many_arguments)]
fn reconcile_unordered(
    session: &Session<'_>,
    owner: Instance,
    link: &Link,
    link_type: &Type,
    existing: &[Existing],
    links: &mut [LinkInstance],
    mode: Mode,
    stats: &mut ReconcileStats,
) -> Result<(), Error> {
    let mut matched = vec![false; existing.len()];
    for declared in links.iter_mut() {
        let Some(child) = declared.child_id else {
            continue;
        };
        let values = link_values(session, link_type, declared)?;
        let pos = existing
            .iter()
            .enumerate()
            .position(|(pos, e)| !matched[pos] && e.child == child);
        match pos {
            Some(pos) => {
                matched[pos] = true;
                declared.row = Some(existing[pos].row);
                if values.is_empty() {
                    declared.state = LinkState::Unchanged;
                } else {
                    edit_link(session, existing[pos].row, None, values)?;
                    declared.state = LinkState::Updated;
                    stats.updated += 1;
                }
            }
            None => {
                declared.row = Some(insert_link(
                    session, owner, link, link_type, child, values,
                )?);
                declared.state = LinkState::Inserted;
                stats.inserted += 1;
            }
        }
    }

    if mode == Mode::Replace {
        for (e, _) in existing.iter().zip(&matched).filter(|(_, m)| !**m) {
            session.delete_instance(e.row)?;
            stats.deleted += 1;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn reconcile_ordered(
    session: &Session<'_>,
    owner: Instance,
    link: &Link,
    link_type: &Type,
    existing: &[Existing],
    links: &mut [LinkInstance],
    mode: Mode,
    stats: &mut ReconcileStats,
) -> Result<(), Error> {
    // (target, index of the declared link)
    let mut sequence: Vec<(Id, Option<usize>)> = Vec::new();
    for (idx, declared) in links.iter().enumerate() {
        let Some(child) = declared.child_id else {
            continue;
        };
        match declared.order {
            Some(order) => {
                let at = order.saturating_sub(1).min(sequence.len());
                sequence.insert(at, (child, Some(idx)));
            }
            None => sequence.push((child, Some(idx))),
        }
    }
    if mode == Mode::Update {
        for e in existing {
            if !sequence.iter().any(|(child, _)| *child == e.child) {
                sequence.push((e.child, None));
            }
        }
    }

    for (pos, (child, idx)) in sequence.iter().enumerate() {
        let values = match idx {
            Some(idx) => link_values(session, link_type, &links[*idx])?,
            None => Vec::new(),
        };
        let (row, state) = match existing.get(pos) {
            Some(e) if e.child != *child => {
                edit_link(session, e.row, Some((link, *child)), values)?;
                stats.relinked += 1;
                (e.row, LinkState::Relinked)
            }
            Some(e) if !values.is_empty() => {
                edit_link(session, e.row, None, values)?;
                stats.updated += 1;
                (e.row, LinkState::Updated)
            }
            Some(e) => (e.row, LinkState::Unchanged),
            None => {
                let row = insert_link(session, owner, link, link_type, *child, values)?;
                stats.inserted += 1;
                (row, LinkState::Inserted)
            }
        };
        if let Some(idx) = idx {
            links[*idx].row = Some(row);
            links[*idx].state = state;
        }
    }

    if mode == Mode::Replace {
        for e in existing.iter().skip(sequence.len()) {
            session.delete_instance(e.row)?;
            stats.deleted += 1;
        }
    }
    Ok(())
}
