use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_account_tables::Migration),
            Box::new(m20240101_000002_create_catalog_tables::Migration),
            Box::new(m20240101_000003_create_order_tables::Migration),
            Box::new(m20240101_000004_create_settlement_tables::Migration),
        ]
    }
}

mod m20240101_000001_create_account_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_account_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Accounts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Accounts::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Accounts::Email)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Accounts::Username)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Accounts::PasswordHash).string().not_null())
                        .col(ColumnDef::new(Accounts::Role).string_len(20).not_null())
                        .col(ColumnDef::new(Accounts::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Accounts::ResetTokenHash).string().null())
                        .col(
                            ColumnDef::new(Accounts::ResetTokenExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Accounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Customers::AccountId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Customers::FullName).string().not_null())
                        .col(ColumnDef::new(Customers::Phone).string().null())
                        .col(ColumnDef::new(Customers::Address).string().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_customers_account_id")
                                .from(Customers::Table, Customers::AccountId)
                                .to(Accounts::Table, Accounts::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Enterprises::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Enterprises::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Enterprises::AccountId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Enterprises::Name).string().not_null())
                        .col(ColumnDef::new(Enterprises::Address).string().not_null())
                        .col(ColumnDef::new(Enterprises::Phone).string().not_null())
                        .col(
                            ColumnDef::new(Enterprises::CommissionRate)
                                .decimal_len(5, 2)
                                .null(),
                        )
                        .col(ColumnDef::new(Enterprises::OpenHours).string().not_null())
                        .col(ColumnDef::new(Enterprises::CloseHours).string().not_null())
                        .col(
                            ColumnDef::new(Enterprises::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_enterprises_account_id")
                                .from(Enterprises::Table, Enterprises::AccountId)
                                .to(Accounts::Table, Accounts::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Enterprises::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Accounts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Accounts {
        Table,
        Id,
        Email,
        Username,
        PasswordHash,
        Role,
        Status,
        ResetTokenHash,
        ResetTokenExpiresAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Customers {
        Table,
        Id,
        AccountId,
        FullName,
        Phone,
        Address,
    }

    #[derive(DeriveIden)]
    pub(super) enum Enterprises {
        Table,
        Id,
        AccountId,
        Name,
        Address,
        Phone,
        CommissionRate,
        OpenHours,
        CloseHours,
        IsActive,
    }
}

mod m20240101_000002_create_catalog_tables {
    use super::m20240101_000001_create_account_tables::Enterprises;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Categories::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Categories::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Categories::Name)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Foods::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Foods::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Foods::EnterpriseId).uuid().not_null())
                        .col(ColumnDef::new(Foods::CategoryId).uuid().null())
                        .col(ColumnDef::new(Foods::DishName).string().not_null())
                        .col(ColumnDef::new(Foods::Price).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(Foods::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Foods::IsAvailable)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Foods::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_foods_enterprise_id")
                                .from(Foods::Table, Foods::EnterpriseId)
                                .to(Enterprises::Table, Enterprises::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_foods_category_id")
                                .from(Foods::Table, Foods::CategoryId)
                                .to(Categories::Table, Categories::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_foods_enterprise_id")
                        .table(Foods::Table)
                        .col(Foods::EnterpriseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Vouchers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Vouchers::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Vouchers::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Vouchers::EnterpriseId).uuid().null())
                        .col(
                            ColumnDef::new(Vouchers::ExpiryDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Vouchers::DiscountPercent).decimal_len(5, 2).null())
                        .col(ColumnDef::new(Vouchers::DiscountAmount).decimal_len(16, 4).null())
                        .col(ColumnDef::new(Vouchers::MinOrderValue).decimal_len(16, 4).null())
                        .col(ColumnDef::new(Vouchers::MaxUsage).integer().null())
                        .col(ColumnDef::new(Vouchers::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Vouchers::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Vouchers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_vouchers_enterprise_id")
                                .from(Vouchers::Table, Vouchers::EnterpriseId)
                                .to(Enterprises::Table, Enterprises::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Vouchers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Foods::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Categories::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Categories {
        Table,
        Id,
        Name,
    }

    #[derive(DeriveIden)]
    pub(super) enum Foods {
        Table,
        Id,
        EnterpriseId,
        CategoryId,
        DishName,
        Price,
        Stock,
        IsAvailable,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Vouchers {
        Table,
        Id,
        Code,
        EnterpriseId,
        ExpiryDate,
        DiscountPercent,
        DiscountAmount,
        MinOrderValue,
        MaxUsage,
        Status,
        CreatedBy,
        CreatedAt,
    }
}

mod m20240101_000003_create_order_tables {
    use super::m20240101_000001_create_account_tables::{Customers, Enterprises};
    use super::m20240101_000002_create_catalog_tables::{Foods, Vouchers};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_order_tables"
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
                        .col(ColumnDef::new(Orders::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::EnterpriseId).uuid().not_null())
                        .col(ColumnDef::new(Orders::VoucherId).uuid().null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveryFee)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::DeliveryAddress).string().not_null())
                        .col(ColumnDef::new(Orders::DeliveryPhone).string().not_null())
                        .col(ColumnDef::new(Orders::DeliveryNote).string().null())
                        .col(
                            ColumnDef::new(Orders::EstimatedDeliveryTime)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CommissionAmount)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_customer_id")
                                .from(Orders::Table, Orders::CustomerId)
                                .to(Customers::Table, Customers::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_enterprise_id")
                                .from(Orders::Table, Orders::EnterpriseId)
                                .to(Enterprises::Table, Enterprises::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_voucher_id")
                                .from(Orders::Table, Orders::VoucherId)
                                .to(Vouchers::Table, Vouchers::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .col(Orders::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_enterprise_created_at")
                        .table(Orders::Table)
                        .col(Orders::EnterpriseId)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderDetails::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderDetails::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderDetails::FoodId).uuid().not_null())
                        .col(ColumnDef::new(OrderDetails::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderDetails::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderDetails::Subtotal)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_details_order_id")
                                .from(OrderDetails::Table, OrderDetails::OrderId)
                                .to(Orders::Table, Orders::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_details_food_id")
                                .from(OrderDetails::Table, OrderDetails::FoodId)
                                .to(Foods::Table, Foods::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Payments::Method).string_len(20).not_null())
                        .col(ColumnDef::new(Payments::TransactionId).string().not_null())
                        .col(ColumnDef::new(Payments::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Payments::TransactionData).json().null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_order_id")
                                .from(Payments::Table, Payments::OrderId)
                                .to(Orders::Table, Orders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderDetails::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        CustomerId,
        EnterpriseId,
        VoucherId,
        TotalAmount,
        DeliveryFee,
        Status,
        DeliveryAddress,
        DeliveryPhone,
        DeliveryNote,
        EstimatedDeliveryTime,
        CommissionAmount,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderDetails {
        Table,
        Id,
        OrderId,
        FoodId,
        Quantity,
        UnitPrice,
        Subtotal,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        OrderId,
        Method,
        TransactionId,
        Status,
        Amount,
        TransactionData,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_settlement_tables {
    use super::m20240101_000001_create_account_tables::Enterprises;
    use super::m20240101_000003_create_order_tables::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_settlement_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Settlements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Settlements::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Settlements::EnterpriseId).uuid().not_null())
                        .col(
                            ColumnDef::new(Settlements::PeriodStart)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Settlements::PeriodEnd)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Settlements::NetPayout)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Settlements::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Settlements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_settlements_enterprise_id")
                                .from(Settlements::Table, Settlements::EnterpriseId)
                                .to(Enterprises::Table, Enterprises::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // One open bucket per enterprise and period
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("uq_settlements_enterprise_period_status")
                        .table(Settlements::Table)
                        .col(Settlements::EnterpriseId)
                        .col(Settlements::PeriodStart)
                        .col(Settlements::PeriodEnd)
                        .col(Settlements::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SettlementItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SettlementItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(SettlementItems::SettlementId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SettlementItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(SettlementItems::IsCod).boolean().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_settlement_items_settlement_id")
                                .from(SettlementItems::Table, SettlementItems::SettlementId)
                                .to(Settlements::Table, Settlements::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_settlement_items_order_id")
                                .from(SettlementItems::Table, SettlementItems::OrderId)
                                .to(Orders::Table, Orders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PaymentWebhookEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::EventId)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PaymentWebhookEvents::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::EventType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentWebhookEvents::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentWebhookEvents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SettlementItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Settlements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Settlements {
        Table,
        Id,
        EnterpriseId,
        PeriodStart,
        PeriodEnd,
        NetPayout,
        Status,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum SettlementItems {
        Table,
        Id,
        SettlementId,
        OrderId,
        IsCod,
    }

    #[derive(DeriveIden)]
    enum PaymentWebhookEvents {
        Table,
        EventId,
        OrderId,
        EventType,
        ReceivedAt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectOptions, Database};

    #[tokio::test]
    async fn schema_builds_on_sqlite() {
        let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
        opts.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opts).await.unwrap();

        Migrator::up(&db, None).await.unwrap();

        assert!(Migrator::get_pending_migrations(&db).await.unwrap().is_empty());
        let manager = SchemaManager::new(&db);
        for table in ["accounts", "foods", "orders", "payments", "settlements", "settlement_items"] {
            assert!(manager.has_table(table).await.unwrap(), "missing table {}", table);
        }
    }
}
