use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use bank::{models::Topic, payloads::NewTopic};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    database::get_uuid,
    error::{AppError, is_unique_violation},
    state::AppState,
    utils::{require_text, sanitize},
};

pub const TRENDING_LIMIT: i64 = 5;

fn row_to_topic(row: &SqliteRow) -> Result<Topic, sqlx::Error> {
    Ok(Topic {
        id: get_uuid(row, "id")?,
        name: row.try_get("name")?,
        count: row.try_get("count")?,
        category: row.try_get("category")?,
    })
}

pub async fn trending(pool: &SqlitePool, limit: i64) -> Result<Vec<Topic>, AppError> {
    let rows = sqlx::query(
        "SELECT id, name, count, category FROM topics ORDER BY count DESC, name LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_topic).collect::<Result<_, _>>()?)
}

pub async fn create_topic(pool: &SqlitePool, topic: &NewTopic) -> Result<Topic, AppError> {
    let category = sanitize(&topic.category);

    let topic = Topic {
        id: Uuid::new_v4(),
        name: require_text(&topic.name, "name")?,
        count: topic.count.max(0),
        category: if category.is_empty() {
            "Legal".to_string()
        } else {
            category
        },
    };

    sqlx::query("INSERT INTO topics (id, name, count, category) VALUES (?, ?, ?, ?)")
        .bind(topic.id.to_string())
        .bind(&topic.name)
        .bind(topic.count)
        .bind(&topic.category)
        .execute(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Topic already exists".to_string())
            } else {
                e.into()
            }
        })?;

    Ok(topic)
}

pub async fn trending_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Topic>>, AppError> {
    Ok(Json(trending(&state.db, TRENDING_LIMIT).await?))
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewTopic>, JsonRejection>,
) -> Result<Json<Topic>, AppError> {
    let Json(topic) = payload?;

    Ok(Json(create_topic(&state.db, &topic).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    fn topic(name: &str, count: i64) -> NewTopic {
        NewTopic {
            name: name.into(),
            count,
            category: "Legal".into(),
        }
    }

    #[tokio::test]
    async fn trending_is_top_five_by_count() {
        let pool = test_pool().await;
        for (i, name) in ["Bail", "Divorce", "GST", "RERA", "Tenancy", "Wills"]
            .iter()
            .enumerate()
        {
            create_topic(&pool, &topic(name, i as i64 * 10)).await.unwrap();
        }

        let top = trending(&pool, TRENDING_LIMIT).await.unwrap();
        let names: Vec<_> = top.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(names, vec!["Wills", "Tenancy", "RERA", "GST", "Divorce"]);
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let pool = test_pool().await;
        create_topic(&pool, &topic("Bail", 1)).await.unwrap();

        let err = create_topic(&pool, &topic("Bail", 5)).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }
}
