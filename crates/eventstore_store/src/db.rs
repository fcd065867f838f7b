use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

#[derive(Iden, Clone, Copy)]
pub enum Events2 {
    Table,
    InstanceId,
    AggregateType,
    AggregateId,
    EventType,
    Sequence,
    Revision,
    CreatedAt,
    Payload,
    Creator,
    Owner,
    Position,
    InTxOrder,
}

#[derive(Iden, Clone, Copy)]
pub enum UniqueConstraints {
    Table,
    InstanceId,
    UniqueType,
    UniqueField,
}
