use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Instances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Instances::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Instances::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Instances::Port).integer().not_null())
                    .col(ColumnDef::new(Instances::Pid).integer().null())
                    .col(ColumnDef::new(Instances::Status).string_len(50).not_null())
                    .col(ColumnDef::new(Instances::Folder).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Instances::InstallPath)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Instances::MinMemory).string_len(50).null())
                    .col(ColumnDef::new(Instances::MaxMemory).string_len(50).null())
                    .col(
                        ColumnDef::new(Instances::IpAddress)
                            .string_len(50)
                            .not_null()
                            .default("localhost"),
                    )
                    .col(
                        ColumnDef::new(Instances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Instances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Uniqueness of name and port is enforced here; the lifecycle core only
        // pre-checks and relies on these indexes under concurrent creates.
        manager
            .create_index(
                Index::create()
                    .name("idx_instances_name_unique")
                    .table(Instances::Table)
                    .col(Instances::Name)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_instances_port_unique")
                    .table(Instances::Table)
                    .col(Instances::Port)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_instances_port_unique")
                    .table(Instances::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_instances_name_unique")
                    .table(Instances::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Instances::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Instances {
    Table,
    Id,
    Name,
    Port,
    Pid,
    Status,
    Folder,
    InstallPath,
    MinMemory,
    MaxMemory,
    IpAddress,
    CreatedAt,
    UpdatedAt,
}
