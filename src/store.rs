//! Relational store CRUD.
//!
//! Key-lookup operations over the SQLite tables: user records, the
//! per-user active-repo pointer, encrypted provider API keys, the
//! namespaced chat log, and the cached per-repo metadata blob.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::crypto::KeyCipher;
use crate::models::{ChatMessage, RepoMetadata};

// ============ Users ============

pub async fn upsert_user(
    pool: &SqlitePool,
    user_id: &str,
    login: &str,
    email: Option<&str>,
    auth_provider: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO users (id, login, email, auth_provider, created_at) VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET login = excluded.login, email = excluded.email
        "#,
    )
    .bind(user_id)
    .bind(login)
    .bind(email)
    .bind(auth_provider)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_user_login(pool: &SqlitePool, user_id: &str) -> Result<Option<String>> {
    let login = sqlx::query_scalar("SELECT login FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(login)
}

// ============ Active repo ============

pub async fn set_active_repo(pool: &SqlitePool, user_id: &str, repo_url: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO active_repos (user_id, repo_url) VALUES (?, ?)
        ON CONFLICT(user_id) DO UPDATE SET repo_url = excluded.repo_url
        "#,
    )
    .bind(user_id)
    .bind(repo_url)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_active_repo(pool: &SqlitePool, user_id: &str) -> Result<Option<String>> {
    let url = sqlx::query_scalar("SELECT repo_url FROM active_repos WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(url)
}

pub async fn delete_active_repo(pool: &SqlitePool, user_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM active_repos WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============ API keys ============

pub async fn upsert_api_key(
    pool: &SqlitePool,
    cipher: &KeyCipher,
    user_id: &str,
    plaintext_key: &str,
) -> Result<()> {
    let stored = cipher
        .encrypt(plaintext_key)
        .context("Failed to encrypt API key")?;
    sqlx::query(
        r#"
        INSERT INTO api_keys (user_id, key_ciphertext) VALUES (?, ?)
        ON CONFLICT(user_id) DO UPDATE SET key_ciphertext = excluded.key_ciphertext
        "#,
    )
    .bind(user_id)
    .bind(stored)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch and decrypt the user's provider key. A stored value that does not
/// decrypt is an error (fail closed), not a legacy plaintext passthrough.
pub async fn get_api_key(
    pool: &SqlitePool,
    cipher: &KeyCipher,
    user_id: &str,
) -> Result<Option<String>> {
    let stored: Option<String> =
        sqlx::query_scalar("SELECT key_ciphertext FROM api_keys WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    match stored {
        Some(value) => {
            let plaintext = cipher
                .decrypt(&value)
                .context("Stored API key cannot be decrypted; set it again")?;
            Ok(Some(plaintext))
        }
        None => Ok(None),
    }
}

pub async fn delete_api_key(pool: &SqlitePool, user_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM api_keys WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============ Chat log ============

pub async fn log_chat(
    pool: &SqlitePool,
    namespace: &str,
    role: &str,
    content: &str,
    user_id: &str,
) -> Result<ChatMessage> {
    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        namespace: namespace.to_string(),
        role: role.to_string(),
        content: content.to_string(),
        user_id: user_id.to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };
    sqlx::query(
        r#"
        INSERT INTO chat_messages (id, namespace, role, content, user_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&message.id)
    .bind(&message.namespace)
    .bind(&message.role)
    .bind(&message.content)
    .bind(&message.user_id)
    .bind(message.created_at)
    .execute(pool)
    .await?;
    Ok(message)
}

pub async fn get_chat_messages(pool: &SqlitePool, namespace: &str) -> Result<Vec<ChatMessage>> {
    let rows = sqlx::query(
        r#"
        SELECT id, namespace, role, content, user_id, created_at
        FROM chat_messages WHERE namespace = ? ORDER BY created_at ASC, rowid ASC
        "#,
    )
    .bind(namespace)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ChatMessage {
            id: row.get("id"),
            namespace: row.get("namespace"),
            role: row.get("role"),
            content: row.get("content"),
            user_id: row.get("user_id"),
            created_at: row.get("created_at"),
        })
        .collect())
}

pub async fn delete_chat_namespace(pool: &SqlitePool, namespace: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM chat_messages WHERE namespace = ?")
        .bind(namespace)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_chat_message(pool: &SqlitePool, message_id: &str, user_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM chat_messages WHERE id = ? AND user_id = ?")
        .bind(message_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============ Repo metadata ============

pub async fn upsert_repo_metadata(
    pool: &SqlitePool,
    repo_url: &str,
    file_tree_json: &str,
    analytics_json: &str,
    dependency_graph_json: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO repo_metadata (repo_url, file_tree_json, analytics_json, dependency_graph_json)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(repo_url) DO UPDATE SET
            file_tree_json = excluded.file_tree_json,
            analytics_json = excluded.analytics_json,
            dependency_graph_json = excluded.dependency_graph_json
        "#,
    )
    .bind(repo_url)
    .bind(file_tree_json)
    .bind(analytics_json)
    .bind(dependency_graph_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_repo_metadata(pool: &SqlitePool, repo_url: &str) -> Result<Option<RepoMetadata>> {
    let row = sqlx::query(
        r#"
        SELECT repo_url, file_tree_json, analytics_json, dependency_graph_json
        FROM repo_metadata WHERE repo_url = ?
        "#,
    )
    .bind(repo_url)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| RepoMetadata {
        repo_url: row.get("repo_url"),
        file_tree_json: row.get("file_tree_json"),
        analytics_json: row.get("analytics_json"),
        dependency_graph_json: row.get("dependency_graph_json"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn cipher() -> KeyCipher {
        KeyCipher::new(&STANDARD.encode([3u8; 32])).unwrap()
    }

    #[tokio::test]
    async fn test_active_repo_roundtrip() {
        let pool = test_pool().await;
        assert_eq!(get_active_repo(&pool, "u1").await.unwrap(), None);

        set_active_repo(&pool, "u1", "https://github.com/a/b").await.unwrap();
        assert_eq!(
            get_active_repo(&pool, "u1").await.unwrap().as_deref(),
            Some("https://github.com/a/b")
        );

        // Upsert replaces.
        set_active_repo(&pool, "u1", "https://github.com/c/d").await.unwrap();
        assert_eq!(
            get_active_repo(&pool, "u1").await.unwrap().as_deref(),
            Some("https://github.com/c/d")
        );

        assert!(delete_active_repo(&pool, "u1").await.unwrap());
        assert!(!delete_active_repo(&pool, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_api_key_encrypted_at_rest() {
        let pool = test_pool().await;
        let cipher = cipher();
        upsert_api_key(&pool, &cipher, "u1", "sk-secret").await.unwrap();

        let raw: String = sqlx::query_scalar("SELECT key_ciphertext FROM api_keys WHERE user_id = 'u1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!raw.contains("sk-secret"));

        assert_eq!(
            get_api_key(&pool, &cipher, "u1").await.unwrap().as_deref(),
            Some("sk-secret")
        );
        assert!(delete_api_key(&pool, "u1").await.unwrap());
        assert_eq!(get_api_key(&pool, &cipher, "u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_undecryptable_key_fails_closed() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO api_keys (user_id, key_ciphertext) VALUES ('u1', 'sk-plaintext')")
            .execute(&pool)
            .await
            .unwrap();
        assert!(get_api_key(&pool, &cipher(), "u1").await.is_err());
    }

    #[tokio::test]
    async fn test_chat_log_scoped_by_namespace() {
        let pool = test_pool().await;
        log_chat(&pool, "u1_repo", "user", "hello", "u1").await.unwrap();
        log_chat(&pool, "u1_repo", "assistant", "hi", "u1").await.unwrap();
        log_chat(&pool, "u2_other", "user", "unrelated", "u2").await.unwrap();

        let messages = get_chat_messages(&pool, "u1_repo").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");

        assert_eq!(delete_chat_namespace(&pool, "u1_repo").await.unwrap(), 2);
        assert!(get_chat_messages(&pool, "u1_repo").await.unwrap().is_empty());
        assert_eq!(get_chat_messages(&pool, "u2_other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_chat_message_requires_owner() {
        let pool = test_pool().await;
        let msg = log_chat(&pool, "u1_repo", "user", "hello", "u1").await.unwrap();
        assert!(!delete_chat_message(&pool, &msg.id, "u2").await.unwrap());
        assert!(delete_chat_message(&pool, &msg.id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_repo_metadata_upsert() {
        let pool = test_pool().await;
        upsert_repo_metadata(&pool, "https://github.com/a/b", "{\"f\":null}", "{}", "{}")
            .await
            .unwrap();
        upsert_repo_metadata(&pool, "https://github.com/a/b", "{\"g\":null}", "{\"stars\":1}", "{}")
            .await
            .unwrap();

        let meta = get_repo_metadata(&pool, "https://github.com/a/b")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.file_tree_json, "{\"g\":null}");
        assert_eq!(meta.analytics_json, "{\"stars\":1}");
        assert!(get_repo_metadata(&pool, "https://github.com/x/y").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_upsert() {
        let pool = test_pool().await;
        upsert_user(&pool, "u1", "alice", Some("a@example.com"), "github").await.unwrap();
        upsert_user(&pool, "u1", "alice-renamed", None, "github").await.unwrap();
        assert_eq!(
            get_user_login(&pool, "u1").await.unwrap().as_deref(),
            Some("alice-renamed")
        );
    }
}
