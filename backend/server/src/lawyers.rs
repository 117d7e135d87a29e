use std::{collections::HashMap, sync::Arc};

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use bank::{models::User, payloads::LawyerSearch};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppError,
    search::SEARCH_LIMIT,
    state::AppState,
    users::{list_lawyers, row_to_user, user_columns},
    utils::like_pattern,
};

pub const DIRECTORY_LIMIT: i64 = 50;

fn filter_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(like_pattern)
}

/// `LIKE` search used when no search engine is configured.
pub async fn search_in_database(
    pool: &SqlitePool,
    query: &LawyerSearch,
) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {users} FROM users u
         WHERE u.role = 'lawyer'
           AND (?1 IS NULL
                OR u.name LIKE ?1 ESCAPE '\\'
                OR u.specialization LIKE ?1 ESCAPE '\\'
                OR u.location LIKE ?1 ESCAPE '\\'
                OR u.about LIKE ?1 ESCAPE '\\')
           AND (?2 IS NULL OR u.specialization LIKE ?2 ESCAPE '\\')
           AND (?3 IS NULL OR u.location LIKE ?3 ESCAPE '\\')
           AND (?4 = 0 OR u.verified = 1)
         ORDER BY u.verified DESC, u.experience DESC, u.name
         LIMIT ?5",
        users = user_columns("u"),
    ))
    .bind(filter_text(query.q.as_deref()))
    .bind(filter_text(query.specialization.as_deref()))
    .bind(filter_text(query.location.as_deref()))
    .bind(query.verified_only.unwrap_or(false))
    .bind(SEARCH_LIMIT as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_user).collect::<Result<_, _>>()?)
}

/// Loads `ids` and returns them in the given order, skipping ids that no longer
/// belong to a lawyer.
pub async fn load_in_order(pool: &SqlitePool, ids: &[Uuid]) -> Result<Vec<User>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let statement = format!(
        "SELECT {users} FROM users u WHERE u.role = 'lawyer' AND u.id IN ({placeholders})",
        users = user_columns("u"),
    );

    let mut query = sqlx::query(&statement);
    for id in ids {
        query = query.bind(id.to_string());
    }

    let mut found: HashMap<Uuid, User> = query
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row_to_user(row).map(|user| (user.id, user)))
        .collect::<Result<_, _>>()?;

    Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
}

pub async fn list_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(list_lawyers(&state.db, DIRECTORY_LIMIT).await?))
}

pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LawyerSearch>, QueryRejection>,
) -> Result<Json<Vec<User>>, AppError> {
    let Query(query) = query?;

    if let Some(index) = &state.lawyer_index {
        match index.search(&query).await {
            Ok(ids) => return Ok(Json(load_in_order(&state.db, &ids).await?)),
            Err(e) => warn!("Search engine failed, falling back to SQL: {e}"),
        }
    }

    Ok(Json(search_in_database(&state.db, &query).await?))
}

#[cfg(test)]
mod tests {
    use bank::{models::VerificationStatus, payloads::ProfileUpdate};

    use super::*;
    use crate::{
        database::test_pool,
        users::{fixtures, set_verification, update_profile},
    };

    async fn profile(pool: &SqlitePool, name: &str, specialization: &str, location: &str) -> User {
        let lawyer = fixtures::lawyer(pool, name).await;
        let update = ProfileUpdate {
            specialization: Some(specialization.into()),
            location: Some(location.into()),
            ..Default::default()
        };

        update_profile(pool, lawyer.id, &update).await.unwrap()
    }

    #[tokio::test]
    async fn filters_combine() {
        let pool = test_pool().await;
        let meera = profile(&pool, "Meera Rao", "Family Law", "Pune").await;
        profile(&pool, "Vikram Shah", "Family Law", "Mumbai").await;
        profile(&pool, "Anil Kumar", "Criminal Law", "Pune").await;

        let query = LawyerSearch {
            specialization: Some("family".into()),
            location: Some("pune".into()),
            ..Default::default()
        };
        let found = search_in_database(&pool, &query).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, meera.id);
    }

    #[tokio::test]
    async fn verified_only_hides_pending_lawyers() {
        let pool = test_pool().await;
        let meera = profile(&pool, "Meera Rao", "Family Law", "Pune").await;
        profile(&pool, "Vikram Shah", "Family Law", "Pune").await;
        set_verification(&pool, meera.id, VerificationStatus::Verified, false)
            .await
            .unwrap();

        let query = LawyerSearch {
            q: Some("law".into()),
            verified_only: Some(true),
            ..Default::default()
        };
        let found = search_in_database(&pool, &query).await.unwrap();

        assert_eq!(found.len(), 1);
        assert!(found[0].verified);
    }

    #[tokio::test]
    async fn clients_never_show_up() {
        let pool = test_pool().await;
        fixtures::client(&pool, "Meera Client").await;

        let query = LawyerSearch {
            q: Some("meera".into()),
            ..Default::default()
        };

        assert!(search_in_database(&pool, &query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_in_order_keeps_ranking() {
        let pool = test_pool().await;
        let a = fixtures::lawyer(&pool, "A").await;
        let b = fixtures::lawyer(&pool, "B").await;
        let client = fixtures::client(&pool, "C").await;

        let loaded = load_in_order(&pool, &[b.id, Uuid::new_v4(), client.id, a.id])
            .await
            .unwrap();
        let ids: Vec<_> = loaded.iter().map(|user| user.id).collect();

        assert_eq!(ids, vec![b.id, a.id]);
    }
}
