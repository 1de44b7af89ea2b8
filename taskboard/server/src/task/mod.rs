use std::collections::{HashMap, HashSet};

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::*;

use crate::entities::*;
use crate::task::rules::{Actor, AssignmentError};

pub mod api;
pub mod rules;

/// State shared by the task endpoints.
#[derive(Clone)]
pub struct TaskState {
    pub db: std::sync::Arc<DatabaseConnection>,
}

/// A per-assignee completion record on a task, populated with the
/// assignee's display name.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct AssigneeProgress {
    user_id: i32,
    fullname: String,
    is_done: bool,
}

impl AssigneeProgress {
    pub fn new(user_id: i32, fullname: String, is_done: bool) -> Self {
        Self {
            user_id,
            fullname,
            is_done,
        }
    }

    /// Returns the ID of the assignee.
    pub fn user_id(&self) -> i32 {
        self.user_id
    }

    /// Returns the display name of the assignee.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Returns whether the assignee has marked their record done.
    pub fn is_done(&self) -> bool {
        self.is_done
    }
}

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Task {
    id: i32,
    title: String,
    status: bool,
    assigned_by: i32,
    assigned_by_name: String,
    created_at: DateTimeWithTimeZone,
    assignees: Vec<AssigneeProgress>,
}

impl Task {
    /// Returns the ID of the task.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the title of the task.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the derived overall status: true iff every assignee is done.
    pub fn status(&self) -> bool {
        self.status
    }

    /// Returns the ID of the user who assigned the task.
    pub fn assigned_by(&self) -> i32 {
        self.assigned_by
    }

    /// Returns the display name of the user who assigned the task.
    pub fn assigned_by_name(&self) -> &str {
        &self.assigned_by_name
    }

    /// Returns the creation timestamp of the task.
    pub fn created_at(&self) -> DateTimeWithTimeZone {
        self.created_at
    }

    /// Returns the per-assignee progress records.
    pub fn assignees(&self) -> &[AssigneeProgress] {
        &self.assignees
    }
}

/// Filters for listing tasks. All fields combine conjunctively.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    /// Only tasks assigned to this user.
    pub assignee: Option<i32>,
    /// Only tasks created within this day in the caller's local time.
    pub day: Option<NaiveDate>,
    /// The caller's UTC offset in minutes, used to anchor the day window.
    pub utc_offset_minutes: i32,
    /// Only tasks whose derived status is still incomplete.
    pub incomplete_only: bool,
    /// Narrows the returned assignee view to display names with this prefix.
    /// The stored assignee set is not affected.
    pub name_prefix: Option<String>,
}

/// Error type for TaskService operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    /// Represents a rejected assignment request.
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    /// Represents a progress update by a user without a progress record.
    #[error("User {user_id} is not assigned to task {task_id}")]
    NotAssigned { user_id: i32, task_id: i32 },
    /// Represents a task not found error.
    #[error("Task with ID {0} not found")]
    TaskNotFound(i32),
    /// Represents an assigning user that does not exist.
    #[error("User with ID {0} not found")]
    UserNotFound(i32),
    /// Represents a deletion attempt by an unauthorized actor.
    #[error("Only an admin or the task's creator can delete a task")]
    Forbidden,
    /// Represents a storage-level race on a progress update; callers may retry.
    #[error("Task was modified concurrently, retry the operation")]
    Conflict,
    /// Represents an unsupported UTC offset for the day-window filter.
    #[error("UTC offset of {0} minutes is out of range")]
    InvalidUtcOffset(i32),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub struct TaskService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl TaskService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> TaskService {
        TaskService { db }
    }

    /// Creates a new task assigned by `actor`.
    ///
    /// The requested assignee list is validated by the assignment rules; on
    /// success the task and one progress record per assignee (initially not
    /// done) are persisted in a single transaction, so a validated task is
    /// never lost and a failed one never partially written.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `Task` with its populated assignee
    /// view, or an error otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn create_task(
        &self,
        actor: Actor,
        title: String,
        requested_assignees: &[i32],
    ) -> Result<Task, TaskServiceError> {
        let creator = user::Entity::find_by_id(actor.id).one(self.db).await?;
        if creator.is_none() {
            return Err(TaskServiceError::UserNotFound(actor.id));
        }

        let known = self.find_existing_user_ids(requested_assignees).await?;
        let assignees = rules::propose_assignment(actor, requested_assignees, &known)?;

        let txn = self.db.begin().await?;
        let task_model = task::ActiveModel {
            title: ActiveValue::Set(title),
            status: ActiveValue::Set(false),
            assigned_by: ActiveValue::Set(actor.id),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let records = assignees.iter().map(|&user_id| task_assignee::ActiveModel {
            task_id: ActiveValue::Set(task_model.id),
            user_id: ActiveValue::Set(user_id),
            is_done: ActiveValue::Set(false),
            ..Default::default()
        });
        task_assignee::Entity::insert_many(records).exec(&txn).await?;
        txn.commit().await?;

        self.get_task(task_model.id).await
    }

    /// Marks `user_id`'s progress record on a task as done.
    ///
    /// Idempotent: marking an already-done record again is a no-op. The
    /// task's overall status is recomputed from all records inside the same
    /// transaction, with the task row locked so concurrent marks by
    /// different assignees cannot lose the final status update.
    ///
    /// # Returns
    ///
    /// A `Result` containing the updated `Task`, or an error otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn mark_done(&self, task_id: i32, user_id: i32) -> Result<Task, TaskServiceError> {
        let txn = self.db.begin().await?;

        let task_model = task::Entity::find_by_id(task_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(conflict_or_database)?
            .ok_or(TaskServiceError::TaskNotFound(task_id))?;

        let record = task_assignee::Entity::find()
            .filter(task_assignee::Column::TaskId.eq(task_id))
            .filter(task_assignee::Column::UserId.eq(user_id))
            .one(&txn)
            .await
            .map_err(conflict_or_database)?
            .ok_or(TaskServiceError::NotAssigned { user_id, task_id })?;

        if !record.is_done {
            let mut active_model: task_assignee::ActiveModel = record.into();
            active_model.is_done = ActiveValue::Set(true);
            active_model
                .update(&txn)
                .await
                .map_err(conflict_or_database)?;
        }

        let flags = task_assignee::Entity::find()
            .filter(task_assignee::Column::TaskId.eq(task_id))
            .all(&txn)
            .await
            .map_err(conflict_or_database)?
            .into_iter()
            .map(|row| row.is_done);
        let status = rules::aggregate_status(flags);

        if status != task_model.status {
            let mut active_model: task::ActiveModel = task_model.into();
            active_model.status = ActiveValue::Set(status);
            active_model
                .update(&txn)
                .await
                .map_err(conflict_or_database)?;
        }
        txn.commit().await.map_err(conflict_or_database)?;

        self.get_task(task_id).await
    }

    /// Deletes a task if `actor` is an admin or the task's creator.
    /// Progress records are removed with the task.
    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, actor: Actor, task_id: i32) -> Result<(), TaskServiceError> {
        let task_model = task::Entity::find_by_id(task_id)
            .one(self.db)
            .await?
            .ok_or(TaskServiceError::TaskNotFound(task_id))?;

        if !rules::authorize_delete(actor, task_model.assigned_by) {
            return Err(TaskServiceError::Forbidden);
        }

        task::Entity::delete_by_id(task_id).exec(self.db).await?;
        Ok(())
    }

    /// Retrieves a task by its ID with its populated assignee view.
    #[tracing::instrument(skip(self))]
    pub async fn get_task(&self, task_id: i32) -> Result<Task, TaskServiceError> {
        let task_model = task::Entity::find_by_id(task_id)
            .one(self.db)
            .await?
            .ok_or(TaskServiceError::TaskNotFound(task_id))?;
        let mut tasks = self.populate(vec![task_model]).await?;
        tasks
            .pop()
            .ok_or(TaskServiceError::TaskNotFound(task_id))
    }

    /// Lists tasks matching `filter`, newest first. Ties on the creation
    /// timestamp keep insertion order.
    #[tracing::instrument(skip(self))]
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskServiceError> {
        let mut query = task::Entity::find();

        if let Some(user_id) = filter.assignee {
            let task_ids: Vec<i32> = task_assignee::Entity::find()
                .filter(task_assignee::Column::UserId.eq(user_id))
                .all(self.db)
                .await?
                .into_iter()
                .map(|row| row.task_id)
                .collect();
            query = query.filter(task::Column::Id.is_in(task_ids));
        }

        if let Some(day) = filter.day {
            let (start, end) = day_window(day, filter.utc_offset_minutes)?;
            query = query.filter(task::Column::CreatedAt.between(start, end));
        }

        if filter.incomplete_only {
            query = query.filter(task::Column::Status.eq(false));
        }

        let models = query
            .order_by_desc(task::Column::CreatedAt)
            .order_by_asc(task::Column::Id)
            .all(self.db)
            .await?;

        let mut tasks = self.populate(models).await?;
        if let Some(prefix) = &filter.name_prefix {
            for item in &mut tasks {
                item.assignees
                    .retain(|assignee| assignee.fullname.starts_with(prefix.as_str()));
            }
        }
        Ok(tasks)
    }

    /// Builds populated `Task` views for the given models: assignee progress
    /// records joined with the display names of assignees and assigner.
    async fn populate(&self, models: Vec<task::Model>) -> Result<Vec<Task>, TaskServiceError> {
        if models.is_empty() {
            return Ok(Vec::new());
        }

        let task_ids: Vec<i32> = models.iter().map(|model| model.id).collect();
        let assignee_rows = task_assignee::Entity::find()
            .filter(task_assignee::Column::TaskId.is_in(task_ids))
            .order_by_asc(task_assignee::Column::UserId)
            .all(self.db)
            .await?;

        let mut user_ids: HashSet<i32> = assignee_rows.iter().map(|row| row.user_id).collect();
        user_ids.extend(models.iter().map(|model| model.assigned_by));
        let fullnames: HashMap<i32, String> = user::Entity::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(self.db)
            .await?
            .into_iter()
            .map(|model| (model.id, model.fullname))
            .collect();

        let mut progress_by_task: HashMap<i32, Vec<AssigneeProgress>> = HashMap::new();
        for row in assignee_rows {
            let fullname = fullnames.get(&row.user_id).cloned().unwrap_or_default();
            progress_by_task
                .entry(row.task_id)
                .or_default()
                .push(AssigneeProgress::new(row.user_id, fullname, row.is_done));
        }

        let tasks = models
            .into_iter()
            .map(|model| Task {
                id: model.id,
                title: model.title,
                status: model.status,
                assigned_by: model.assigned_by,
                assigned_by_name: fullnames
                    .get(&model.assigned_by)
                    .cloned()
                    .unwrap_or_default(),
                created_at: model.created_at,
                assignees: progress_by_task.remove(&model.id).unwrap_or_default(),
            })
            .collect();
        Ok(tasks)
    }

    /// Returns the subset of `ids` that exist in the user directory.
    async fn find_existing_user_ids(
        &self,
        ids: &[i32],
    ) -> Result<HashSet<i32>, TaskServiceError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let existing = user::Entity::find()
            .filter(user::Column::Id.is_in(ids.to_vec()))
            .all(self.db)
            .await?
            .into_iter()
            .map(|model| model.id)
            .collect();
        Ok(existing)
    }
}

/// Computes the `[00:00:00.000, 23:59:59.999]` window of `day` in the
/// caller's local time, expressed with that offset for the storage query.
fn day_window(
    day: NaiveDate,
    utc_offset_minutes: i32,
) -> Result<(DateTimeWithTimeZone, DateTimeWithTimeZone), TaskServiceError> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .ok_or(TaskServiceError::InvalidUtcOffset(utc_offset_minutes))?;
    let end_of_day =
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999).expect("23:59:59.999 is a valid time");

    let start = day
        .and_time(NaiveTime::MIN)
        .and_local_timezone(offset)
        .single()
        .ok_or(TaskServiceError::InvalidUtcOffset(utc_offset_minutes))?;
    let end = day
        .and_time(end_of_day)
        .and_local_timezone(offset)
        .single()
        .ok_or(TaskServiceError::InvalidUtcOffset(utc_offset_minutes))?;
    Ok((start, end))
}

/// Classifies a database error from the mark-done transaction: storage-level
/// serialization and deadlock failures become `Conflict` so callers can retry.
fn conflict_or_database(err: DbErr) -> TaskServiceError {
    let message = err.to_string();
    if message.contains("could not serialize access") || message.contains("deadlock detected") {
        TaskServiceError::Conflict
    } else {
        TaskServiceError::Database(err)
    }
}
