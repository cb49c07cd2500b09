use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::config::BootstrapAdmin;
use crate::models::Role;

pub async fn connect_pg(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database migrations applied");
    Ok(pool)
}

/// Create the configured admin account unless the email is already taken.
pub async fn ensure_bootstrap_admin(pool: &PgPool, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    let email = admin.email.trim().to_lowercase();
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM account WHERE email = $1)")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    if exists {
        return Ok(());
    }

    let password_hash = hash_password(&admin.password).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    sqlx::query(
        r#"
        INSERT INTO account (account_id, role, name, username, email, password_hash)
        VALUES ($1, $2, 'Administrator', 'admin', $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(Role::Admin)
    .bind(&email)
    .bind(password_hash)
    .execute(pool)
    .await?;

    tracing::info!(%email, "bootstrap admin account created");
    Ok(())
}
