use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
};
use bank::{
    models::{Case, Role},
    payloads::{AcceptCase, CaseQuery, NewCase},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::info;
use uuid::Uuid;

use crate::{
    connections::ensure_active,
    database::{get_opt_uuid, get_uuid},
    error::AppError,
    state::AppState,
    users::require_role,
    utils::{require_text, sanitize},
};

pub const CASE_LIMIT: i64 = 100;

const CASE_COLUMNS: &str =
    "id, title, description, field, location, budget, posted_by, posted_at, accepted_by, accepted_at";

fn row_to_case(row: &SqliteRow) -> Result<Case, sqlx::Error> {
    Ok(Case {
        id: get_uuid(row, "id")?,
        title: row.try_get("title")?,
        desc: row.try_get("description")?,
        field: row.try_get("field")?,
        location: row.try_get("location")?,
        budget: row.try_get("budget")?,
        posted_by: get_uuid(row, "posted_by")?,
        posted_at: row.try_get("posted_at")?,
        accepted_by: get_opt_uuid(row, "accepted_by")?,
        accepted_at: row.try_get("accepted_at")?,
    })
}

pub async fn find_case(pool: &SqlitePool, id: Uuid) -> Result<Option<Case>, AppError> {
    let row = sqlx::query(&format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_case).transpose()?)
}

pub async fn post_case(pool: &SqlitePool, case: &NewCase) -> Result<Case, AppError> {
    require_role(pool, case.posted_by, Role::Client).await?;

    let case = Case {
        id: Uuid::new_v4(),
        title: require_text(&case.title, "title")?,
        desc: case.desc.trim().to_string(),
        field: sanitize(&case.field),
        location: sanitize(&case.location),
        budget: sanitize(&case.budget),
        posted_by: case.posted_by,
        posted_at: Utc::now(),
        accepted_by: None,
        accepted_at: None,
    };

    sqlx::query(&format!(
        "INSERT INTO cases ({CASE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)"
    ))
    .bind(case.id.to_string())
    .bind(&case.title)
    .bind(&case.desc)
    .bind(&case.field)
    .bind(&case.location)
    .bind(&case.budget)
    .bind(case.posted_by.to_string())
    .bind(case.posted_at)
    .execute(pool)
    .await?;

    info!("Case {} posted by {}", case.id, case.posted_by);

    Ok(case)
}

pub async fn list_cases(
    pool: &SqlitePool,
    query: &CaseQuery,
    limit: i64,
) -> Result<Vec<Case>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {CASE_COLUMNS} FROM cases
         WHERE (?1 IS NULL OR posted_by = ?1)
           AND (?2 IS NULL OR (accepted_by IS NULL) = ?2)
         ORDER BY posted_at DESC
         LIMIT ?3"
    ))
    .bind(query.posted_by.map(|id| id.to_string()))
    .bind(query.open)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_case).collect::<Result<_, _>>()?)
}

/// Assigns the case to `lawyer_id` unless someone got there first, then links
/// the pair. Both writes commit together.
pub async fn accept_case(pool: &SqlitePool, id: Uuid, lawyer_id: Uuid) -> Result<Case, AppError> {
    require_role(pool, lawyer_id, Role::Lawyer).await?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!(
        "UPDATE cases SET accepted_by = ?, accepted_at = ?
         WHERE id = ? AND accepted_by IS NULL
         RETURNING {CASE_COLUMNS}"
    ))
    .bind(lawyer_id.to_string())
    .bind(Utc::now())
    .bind(id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        drop(tx);
        return match find_case(pool, id).await? {
            Some(_) => Err(AppError::Conflict("Case already accepted".to_string())),
            None => Err(AppError::NotFound("Case")),
        };
    };
    let case = row_to_case(&row)?;

    ensure_active(&mut tx, case.posted_by, lawyer_id).await?;
    tx.commit().await?;

    info!("Case {id} accepted by {lawyer_id}");

    Ok(case)
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewCase>, JsonRejection>,
) -> Result<Json<Case>, AppError> {
    let Json(case) = payload?;

    Ok(Json(post_case(&state.db, &case).await?))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CaseQuery>, QueryRejection>,
) -> Result<Json<Vec<Case>>, AppError> {
    let Query(query) = query?;

    Ok(Json(list_cases(&state.db, &query, CASE_LIMIT).await?))
}

pub async fn accept_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AcceptCase>, JsonRejection>,
) -> Result<Json<Case>, AppError> {
    let Path(id) = path?;
    let Json(accept) = payload?;

    Ok(Json(accept_case(&state.db, id, accept.lawyer_id).await?))
}

#[cfg(test)]
mod tests {
    use bank::models::ConnectionStatus;

    use super::*;
    use crate::{connections::find_pair, database::test_pool, users::fixtures};

    fn new_case(posted_by: Uuid) -> NewCase {
        NewCase {
            title: "  Property   dispute ".into(),
            desc: "Boundary wall with neighbour".into(),
            field: "Civil".into(),
            location: "Pune".into(),
            budget: "20000".into(),
            posted_by,
        }
    }

    #[tokio::test]
    async fn posting_requires_a_client() {
        let pool = test_pool().await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let err = post_case(&pool, &new_case(lawyer.id)).await.unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn first_acceptance_wins() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let first = fixtures::lawyer(&pool, "Meera").await;
        let second = fixtures::lawyer(&pool, "Vikram").await;

        let case = post_case(&pool, &new_case(client.id)).await.unwrap();
        assert_eq!(case.title, "Property dispute");
        assert!(case.is_open());

        let accepted = accept_case(&pool, case.id, first.id).await.unwrap();
        assert_eq!(accepted.accepted_by, Some(first.id));
        assert!(accepted.accepted_at.is_some());

        let err = accept_case(&pool, case.id, second.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = find_case(&pool, case.id).await.unwrap().unwrap();
        assert_eq!(stored.accepted_by, Some(first.id));
    }

    #[tokio::test]
    async fn acceptance_links_the_pair() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let case = post_case(&pool, &new_case(client.id)).await.unwrap();
        accept_case(&pool, case.id, lawyer.id).await.unwrap();

        let pair = find_pair(&pool, client.id, lawyer.id).await.unwrap().unwrap();
        assert_eq!(pair.status, ConnectionStatus::Active);
    }

    #[tokio::test]
    async fn failed_link_keeps_the_case_open() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;
        let case = post_case(&pool, &new_case(client.id)).await.unwrap();

        sqlx::query("DROP TABLE connections")
            .execute(&pool)
            .await
            .unwrap();

        let err = accept_case(&pool, case.id, lawyer.id).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        let stored = find_case(&pool, case.id).await.unwrap().unwrap();
        assert!(stored.is_open());
    }

    #[tokio::test]
    async fn unknown_case_is_not_found() {
        let pool = test_pool().await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let err = accept_case(&pool, Uuid::new_v4(), lawyer.id)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound("Case")));
    }

    #[tokio::test]
    async fn open_filter_hides_accepted_cases() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let taken = post_case(&pool, &new_case(client.id)).await.unwrap();
        let open = post_case(&pool, &new_case(client.id)).await.unwrap();
        accept_case(&pool, taken.id, lawyer.id).await.unwrap();

        let query = CaseQuery {
            open: Some(true),
            ..Default::default()
        };
        let found = list_cases(&pool, &query, CASE_LIMIT).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, open.id);

        let mine = CaseQuery {
            posted_by: Some(client.id),
            ..Default::default()
        };
        assert_eq!(list_cases(&pool, &mine, CASE_LIMIT).await.unwrap().len(), 2);
    }
}
