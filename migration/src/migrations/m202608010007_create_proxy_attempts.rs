use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202608010007_create_proxy_attempts"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("proxy_attempts"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("session_id"))
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("student_id"))
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("attempt_type"))
                            .enumeration(
                                Alias::new("proxy_attempt_type"),
                                vec![
                                    Alias::new("NO_STUDENT_RECORD"),
                                    Alias::new("INVALID_SESSION"),
                                    Alias::new("SESSION_ENDED"),
                                    Alias::new("TIME_EXPIRED"),
                                    Alias::new("INVALID_QR"),
                                    Alias::new("GPS_REQUIRED"),
                                    Alias::new("OUTSIDE_RADIUS"),
                                    Alias::new("UNREGISTERED_DEVICE"),
                                    Alias::new("SELFIE_REQUIRED"),
                                    Alias::new("ALREADY_MARKED"),
                                ],
                            )
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("failure_reason"))
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("device_fingerprint"))
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(Alias::new("ip_address")).string().null())
                    .col(ColumnDef::new(Alias::new("user_agent")).string().null())
                    .col(ColumnDef::new(Alias::new("latitude")).double().null())
                    .col(ColumnDef::new(Alias::new("longitude")).double().null())
                    .col(
                        ColumnDef::new(Alias::new("token_attempted"))
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    // Log rows outlive the referenced session and student;
                    // external retention policy decides when they go.
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_proxy_attempts_session")
                            .from(Alias::new("proxy_attempts"), Alias::new("session_id"))
                            .to(Alias::new("attendance_sessions"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_proxy_attempts_student")
                            .from(Alias::new("proxy_attempts"), Alias::new("student_id"))
                            .to(Alias::new("users"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_proxy_attempts_created_at")
                    .table(Alias::new("proxy_attempts"))
                    .col(Alias::new("created_at"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_proxy_attempts_student_id")
                    .table(Alias::new("proxy_attempts"))
                    .col(Alias::new("student_id"))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alias::new("proxy_attempts")).to_owned())
            .await
    }
}
