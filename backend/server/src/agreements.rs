use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
};
use bank::{
    models::{Agreement, Parties},
    payloads::{NewAgreement, OwnerQuery},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    database::get_uuid,
    error::AppError,
    state::AppState,
    users::require_user,
    utils::{require_text, sanitize},
};

fn row_to_agreement(row: &SqliteRow) -> Result<Agreement, sqlx::Error> {
    Ok(Agreement {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        kind: row.try_get("kind")?,
        content: row.try_get("content")?,
        parties: Parties {
            party_a: row.try_get("party_a")?,
            party_b: row.try_get("party_b")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

pub async fn save_agreement(
    pool: &SqlitePool,
    agreement: &NewAgreement,
) -> Result<Agreement, AppError> {
    require_user(pool, agreement.user_id).await?;

    if agreement.content.trim().is_empty() {
        return Err(AppError::bad_request("content is required"));
    }

    let agreement = Agreement {
        id: Uuid::new_v4(),
        user_id: agreement.user_id,
        kind: require_text(&agreement.kind, "type")?,
        content: agreement.content.clone(),
        parties: Parties {
            party_a: sanitize(&agreement.parties.party_a),
            party_b: sanitize(&agreement.parties.party_b),
        },
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO agreements (id, user_id, kind, content, party_a, party_b, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(agreement.id.to_string())
    .bind(agreement.user_id.to_string())
    .bind(&agreement.kind)
    .bind(&agreement.content)
    .bind(&agreement.parties.party_a)
    .bind(&agreement.parties.party_b)
    .bind(agreement.created_at)
    .execute(pool)
    .await?;

    Ok(agreement)
}

pub async fn list_for_owner(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Agreement>, AppError> {
    let rows = sqlx::query(
        "SELECT id, user_id, kind, content, party_a, party_b, created_at
         FROM agreements WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_agreement).collect::<Result<_, _>>()?)
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewAgreement>, JsonRejection>,
) -> Result<Json<Agreement>, AppError> {
    let Json(agreement) = payload?;

    Ok(Json(save_agreement(&state.db, &agreement).await?))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<Vec<Agreement>>, AppError> {
    let Query(query) = query?;

    Ok(Json(list_for_owner(&state.db, query.user_id).await?))
}
