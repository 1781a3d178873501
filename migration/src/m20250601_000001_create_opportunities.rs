use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create opportunities table
        manager
            .create_table(
                Table::create()
                    .table(Opportunities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Opportunities::Identifier)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Opportunities::Title).string().not_null())
                    .col(ColumnDef::new(Opportunities::Organization).string().not_null())
                    .col(ColumnDef::new(Opportunities::Amount).double())
                    .col(ColumnDef::new(Opportunities::AmountDisplay).string())
                    .col(ColumnDef::new(Opportunities::Deadline).string())
                    .col(ColumnDef::new(Opportunities::GeoTags).json().not_null())
                    .col(ColumnDef::new(Opportunities::TypeTags).json().not_null())
                    .col(ColumnDef::new(Opportunities::Description).text().not_null())
                    .col(ColumnDef::new(Opportunities::SourceUrl).string().not_null())
                    .col(ColumnDef::new(Opportunities::Provenance).string().not_null())
                    .col(
                        ColumnDef::new(Opportunities::IsUpdate)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Opportunities::MissionId).string())
                    .col(
                        ColumnDef::new(Opportunities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Opportunities::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_opportunities_source_url")
                    .table(Opportunities::Table)
                    .col(Opportunities::SourceUrl)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Opportunities::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Opportunities {
    Table,
    Identifier,
    Title,
    Organization,
    Amount,
    AmountDisplay,
    Deadline,
    GeoTags,
    TypeTags,
    Description,
    SourceUrl,
    Provenance,
    IsUpdate,
    MissionId,
    CreatedAt,
    UpdatedAt,
}
