use std::collections::{BTreeSet, HashSet};

use crate::user::Role;

/// The identity performing an operation, resolved from a verified credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i32,
    pub role: Role,
}

impl Actor {
    pub fn new(id: i32, role: Role) -> Self {
        Self { id, role }
    }
}

/// Error type for assignment validation.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AssignmentError {
    /// An admin tried to create a task without any assignees.
    #[error("A task must be assigned to at least one user")]
    EmptyAssignees,
    /// A requested assignee does not exist in the user directory.
    #[error("Assignee with ID {0} not found")]
    UnknownAssignee(i32),
    /// The same assignee was requested more than once.
    #[error("Assignee with ID {0} is duplicated")]
    DuplicateAssignee(i32),
    /// A normal user tried to assign a task to someone other than themselves.
    #[error("A normal user can only assign a task to themselves")]
    ForbiddenAssignee,
}

/// Decides whether `actor` may assign a task to `requested` and normalizes
/// the result into the effective assignee set.
///
/// Admins may assign to any non-empty, duplicate-free list of existing users;
/// normal users may only assign to themselves (an empty request defaults to
/// self). `known` is the set of user IDs that exist in the user directory.
///
/// Pure validation, no side effects.
pub fn propose_assignment(
    actor: Actor,
    requested: &[i32],
    known: &HashSet<i32>,
) -> Result<BTreeSet<i32>, AssignmentError> {
    match actor.role {
        Role::Admin => {
            if requested.is_empty() {
                return Err(AssignmentError::EmptyAssignees);
            }
            if let Some(&unknown) = requested.iter().find(|id| !known.contains(id)) {
                return Err(AssignmentError::UnknownAssignee(unknown));
            }
            let mut assignees = BTreeSet::new();
            for &id in requested {
                if !assignees.insert(id) {
                    return Err(AssignmentError::DuplicateAssignee(id));
                }
            }
            Ok(assignees)
        }
        Role::Normal => match requested {
            [] => Ok(BTreeSet::from([actor.id])),
            [id] if *id == actor.id => Ok(BTreeSet::from([actor.id])),
            _ => Err(AssignmentError::ForbiddenAssignee),
        },
    }
}

/// Derives a task's overall status from its per-assignee completion flags.
///
/// A task is complete iff every assignee has marked their record done. The
/// fold is total and order independent; assignee sets are never empty once a
/// task exists.
pub fn aggregate_status(progress: impl IntoIterator<Item = bool>) -> bool {
    progress.into_iter().all(|is_done| is_done)
}

/// Returns whether `actor` may delete a task created by `assigned_by`.
/// Admins may delete any task; everyone else only their own.
pub fn authorize_delete(actor: Actor, assigned_by: i32) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Normal => actor.id == assigned_by,
    }
}
