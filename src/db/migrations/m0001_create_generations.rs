use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Generations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Generations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Generations::UserId).string().null())
                    .col(ColumnDef::new(Generations::Style).string().not_null())
                    .col(ColumnDef::new(Generations::Config).json().not_null())
                    .col(ColumnDef::new(Generations::Images).json().null())
                    .col(ColumnDef::new(Generations::ArchivePath).string().null())
                    .col(
                        ColumnDef::new(Generations::Status)
                            .string_len(1)
                            .not_null()
                            .default("p"),
                    )
                    .col(
                        ColumnDef::new(Generations::Paid)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Generations::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(Generations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Generations::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_generations_user")
                    .table(Generations::Table)
                    .col(Generations::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Generations::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Generations {
    Table,
    Id,
    UserId,
    Style,
    Config,
    Images,
    ArchivePath,
    Status,
    Paid,
    ErrorMessage,
    CreatedAt,
    CompletedAt,
}
