use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
};
use bank::{
    conversation_room,
    models::{Message, Role},
    payloads::{MessageQuery, NewMessage},
    realtime::ServerEvent,
};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::debug;
use uuid::Uuid;

use crate::{
    database::{get_enum, get_uuid},
    error::AppError,
    state::AppState,
    users::require_role,
};

const MESSAGE_COLUMNS: &str = "id, client_id, lawyer_id, sender_id, sender, text, read, created_at";

fn row_to_message(row: &SqliteRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: get_uuid(row, "id")?,
        client_id: get_uuid(row, "client_id")?,
        lawyer_id: get_uuid(row, "lawyer_id")?,
        sender_id: get_uuid(row, "sender_id")?,
        sender: get_enum(row, "sender")?,
        text: row.try_get("text")?,
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn save_message(pool: &SqlitePool, message: &NewMessage) -> Result<Message, AppError> {
    let text = message.text.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("text is required"));
    }

    let sender = if message.sender_id == message.client_id {
        Role::Client
    } else if message.sender_id == message.lawyer_id {
        Role::Lawyer
    } else {
        return Err(AppError::Forbidden("Sender is not part of this chat".into()));
    };

    require_role(pool, message.client_id, Role::Client).await?;
    require_role(pool, message.lawyer_id, Role::Lawyer).await?;

    let message = Message {
        id: Uuid::new_v4(),
        client_id: message.client_id,
        lawyer_id: message.lawyer_id,
        sender_id: message.sender_id,
        sender,
        text: text.to_string(),
        read: false,
        created_at: Utc::now(),
    };

    sqlx::query(&format!(
        "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(message.id.to_string())
    .bind(message.client_id.to_string())
    .bind(message.lawyer_id.to_string())
    .bind(message.sender_id.to_string())
    .bind(message.sender.as_str())
    .bind(&message.text)
    .bind(message.read)
    .bind(message.created_at)
    .execute(pool)
    .await?;

    Ok(message)
}

/// Conversation between the pair, oldest first.
pub async fn history(
    pool: &SqlitePool,
    client_id: Uuid,
    lawyer_id: Uuid,
) -> Result<Vec<Message>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE client_id = ? AND lawyer_id = ?
         ORDER BY created_at, rowid"
    ))
    .bind(client_id.to_string())
    .bind(lawyer_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_message).collect::<Result<_, _>>()?)
}

pub async fn unread_count(pool: &SqlitePool, user_id: Uuid) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages
         WHERE (client_id = ?1 OR lawyer_id = ?1) AND sender_id != ?1 AND read = 0",
    )
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Marks what `chat_id` sent to `user_id` as read.
pub async fn mark_read(pool: &SqlitePool, user_id: Uuid, chat_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE messages SET read = 1
         WHERE ((client_id = ?1 AND lawyer_id = ?2) OR (client_id = ?2 AND lawyer_id = ?1))
           AND sender_id = ?2
           AND read = 0",
    )
    .bind(user_id.to_string())
    .bind(chat_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<MessageQuery>, QueryRejection>,
) -> Result<Json<Vec<Message>>, AppError> {
    let Query(query) = query?;

    let (Some(client_id), Some(lawyer_id)) = (query.client_id, query.lawyer_id) else {
        return Err(AppError::bad_request("clientId and lawyerId are required"));
    };

    Ok(Json(history(&state.db, client_id, lawyer_id).await?))
}

/// Persists, then relays to everyone in the pair's conversation room.
pub async fn send_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> Result<Json<Message>, AppError> {
    let Json(payload) = payload?;

    let message = save_message(&state.db, &payload).await?;

    let room = conversation_room(message.client_id, message.lawyer_id);
    let delivered = state
        .hub
        .emit(&room, &ServerEvent::ReceiveMessage(message.clone()));
    debug!("Message {} relayed to {delivered} members of {room}", message.id);

    Ok(Json(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::test_pool, users::fixtures};

    fn new_message(client_id: Uuid, lawyer_id: Uuid, sender_id: Uuid, text: &str) -> NewMessage {
        NewMessage {
            text: text.into(),
            client_id,
            lawyer_id,
            sender_id,
        }
    }

    #[tokio::test]
    async fn sender_role_comes_from_the_pair() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let from_client = save_message(&pool, &new_message(client.id, lawyer.id, client.id, "hi"))
            .await
            .unwrap();
        let from_lawyer =
            save_message(&pool, &new_message(client.id, lawyer.id, lawyer.id, "hello"))
                .await
                .unwrap();

        assert_eq!(from_client.sender, Role::Client);
        assert_eq!(from_lawyer.sender, Role::Lawyer);

        let messages = history(&pool, client.id, lawyer.id).await.unwrap();
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hello"]);
    }

    #[tokio::test]
    async fn outsiders_cannot_post() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let err = save_message(
            &pool,
            &new_message(client.id, lawyer.id, Uuid::new_v4(), "spam"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let err = save_message(&pool, &new_message(client.id, lawyer.id, client.id, "  "))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn unread_counts_only_incoming() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        for text in ["one", "two"] {
            save_message(&pool, &new_message(client.id, lawyer.id, client.id, text))
                .await
                .unwrap();
        }
        save_message(&pool, &new_message(client.id, lawyer.id, lawyer.id, "reply"))
            .await
            .unwrap();

        assert_eq!(unread_count(&pool, lawyer.id).await.unwrap(), 2);
        assert_eq!(unread_count(&pool, client.id).await.unwrap(), 1);

        assert_eq!(mark_read(&pool, lawyer.id, client.id).await.unwrap(), 2);
        assert_eq!(mark_read(&pool, lawyer.id, client.id).await.unwrap(), 0);
        assert_eq!(unread_count(&pool, lawyer.id).await.unwrap(), 0);
        assert_eq!(unread_count(&pool, client.id).await.unwrap(), 1);
    }
}
