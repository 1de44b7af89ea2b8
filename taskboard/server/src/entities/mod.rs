pub mod task;
pub mod task_assignee;
pub mod user;
