use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

const FK_TASK_ASSIGNEES_TASK: &str = "fk-task_assignees-task_id-tasks";
const FK_TASK_ASSIGNEES_USER: &str = "fk-task_assignees-user_id-users";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TaskAssignees::Table)
                    .if_not_exists()
                    .col(pk_auto(TaskAssignees::Id))
                    .col(integer(TaskAssignees::TaskId))
                    .col(integer(TaskAssignees::UserId))
                    .col(boolean(TaskAssignees::IsDone).default(false))
                    .foreign_key(
                        ForeignKey::create()
                            .name(FK_TASK_ASSIGNEES_TASK)
                            .from(TaskAssignees::Table, TaskAssignees::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name(FK_TASK_ASSIGNEES_USER)
                            .from(TaskAssignees::Table, TaskAssignees::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // One progress record per (task, assignee).
        manager
            .create_index(
                Index::create()
                    .name("task_assignees_task_id_user_id_unique")
                    .table(TaskAssignees::Table)
                    .col(TaskAssignees::TaskId)
                    .col(TaskAssignees::UserId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TaskAssignees::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TaskAssignees {
    Table,
    Id,
    TaskId,
    UserId,
    IsDone,
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
