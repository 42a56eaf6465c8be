use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Every statement is idempotent; re-running on an
/// existing database is a no-op.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            login TEXT NOT NULL,
            email TEXT,
            auth_provider TEXT NOT NULL DEFAULT 'github',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS active_repos (
            user_id TEXT PRIMARY KEY,
            repo_url TEXT NOT NULL,
            provider TEXT NOT NULL DEFAULT 'github'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            user_id TEXT PRIMARY KEY,
            key_ciphertext TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repo_metadata (
            repo_url TEXT PRIMARY KEY,
            file_tree_json TEXT NOT NULL,
            analytics_json TEXT NOT NULL DEFAULT '{}',
            dependency_graph_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_namespace ON chat_messages(namespace)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_messages_user ON chat_messages(user_id)")
        .execute(pool)
        .await?;

    Ok(())
}
