use anyhow::Context;

pub mod leader_state;
pub mod lock;
pub mod samples;
pub mod watchlists;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
