use sea_orm_migration::prelude::*;

use crate::db::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Events2::Table)
                    .if_not_exists()
                    .col(text_key(Events2::InstanceId))
                    .col(text_key(Events2::AggregateType))
                    .col(text_key(Events2::AggregateId))
                    .col(text_key(Events2::EventType))
                    .col(ColumnDef::new(Events2::Sequence).big_integer().not_null())
                    .col(ColumnDef::new(Events2::Revision).small_integer().not_null())
                    .col(ColumnDef::new(Events2::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Events2::Payload).text())
                    .col(text_key(Events2::Creator))
                    .col(text_key(Events2::Owner))
                    .col(ColumnDef::new(Events2::Position).double().not_null())
                    .col(ColumnDef::new(Events2::InTxOrder).integer().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_events2")
                            .col(Events2::InstanceId)
                            .col(Events2::AggregateType)
                            .col(Events2::AggregateId)
                            .col(Events2::Sequence),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("events2_position_idx")
                    .table(Events2::Table)
                    .if_not_exists()
                    .unique()
                    .col(Events2::InstanceId)
                    .col(Events2::Position)
                    .col(Events2::InTxOrder)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("events2_event_type_idx")
                    .table(Events2::Table)
                    .if_not_exists()
                    .col(Events2::InstanceId)
                    .col(Events2::EventType)
                    .col(Events2::Position)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UniqueConstraints::Table)
                    .if_not_exists()
                    .col(text_key(UniqueConstraints::InstanceId))
                    .col(text_key(UniqueConstraints::UniqueType))
                    .col(text_key(UniqueConstraints::UniqueField))
                    .primary_key(
                        Index::create()
                            .name("pk_unique_constraints")
                            .col(UniqueConstraints::InstanceId)
                            .col(UniqueConstraints::UniqueType)
                            .col(UniqueConstraints::UniqueField),
                    )
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(UniqueConstraints::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Events2::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

fn text_key(col: impl Iden) -> ColumnDef {
    let mut col_def = ColumnDef::new(col);
    col_def.string_len(200).not_null();
    col_def
}
