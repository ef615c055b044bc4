use sea_orm_migration::prelude::*;

/// Programmatic schema migrations for the durable order store.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240612_000001_create_orders::Migration),
            Box::new(m20240612_000002_create_payment_retry_jobs::Migration),
        ]
    }
}

mod m20240612_000001_create_orders {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240612_000001_create_orders"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::PaymentStatus)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::PaidAt).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Orders::PaymentMethod)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CustomerFirstName)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CustomerLastName)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CustomerEmail)
                                .string_len(254)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::CustomerPhone).string_len(32))
                        .col(ColumnDef::new(Orders::BillingAddress).text().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text())
                        .col(
                            ColumnDef::new(Orders::ShippingMethod)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingCost)
                                .decimal_len(16, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Items).text().not_null())
                        .col(
                            ColumnDef::new(Orders::Subtotal)
                                .decimal_len(16, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .decimal_len(16, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::PromoCode).string_len(64))
                        .col(
                            ColumnDef::new(Orders::CardFee)
                                .decimal_len(16, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal_len(16, 2).not_null())
                        .col(
                            ColumnDef::new(Orders::StockUpdated)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::CustomerEmailStatus)
                                .string_len(512)
                                .not_null()
                                .default("skipped"),
                        )
                        .col(
                            ColumnDef::new(Orders::AdminEmailStatus)
                                .string_len(512)
                                .not_null()
                                .default("skipped"),
                        )
                        .col(ColumnDef::new(Orders::Notes).text())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        CreatedAt,
        PaymentStatus,
        PaidAt,
        PaymentMethod,
        CustomerFirstName,
        CustomerLastName,
        CustomerEmail,
        CustomerPhone,
        BillingAddress,
        ShippingAddress,
        ShippingMethod,
        ShippingCost,
        Items,
        Subtotal,
        DiscountAmount,
        PromoCode,
        CardFee,
        Total,
        StockUpdated,
        CustomerEmailStatus,
        AdminEmailStatus,
        Notes,
    }
}

mod m20240612_000002_create_payment_retry_jobs {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240612_000002_create_payment_retry_jobs"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentRetryJobs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentRetryJobs::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentRetryJobs::Session)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentRetryJobs::Attempts)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentRetryJobs::NextRunAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentRetryJobs::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentRetryJobs::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentRetryJobs::LastError).text())
                        .col(
                            ColumnDef::new(PaymentRetryJobs::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentRetryJobs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentRetryJobs {
        Table,
        Id,
        Session,
        Attempts,
        NextRunAt,
        CreatedAt,
        UpdatedAt,
        LastError,
        Status,
    }
}
