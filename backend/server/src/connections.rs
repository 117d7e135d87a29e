use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
};
use bank::{
    models::{Connection, ConnectionStatus, ConnectionView, Role},
    payloads::{ConnectionFilter, ConnectionQuery, ConnectionUpdate, NewConnection},
};
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};
use tracing::info;
use uuid::Uuid;

use crate::{
    database::{get_enum, get_uuid},
    error::{AppError, is_unique_violation},
    state::AppState,
    users::{require_role, row_to_user, user_columns},
};

const CONNECTION_COLUMNS: &str =
    "id, client_id, lawyer_id, status, initiated_by, created_at, updated_at";

fn row_to_connection(row: &SqliteRow) -> Result<Connection, sqlx::Error> {
    Ok(Connection {
        id: get_uuid(row, "id")?,
        client_id: get_uuid(row, "client_id")?,
        lawyer_id: get_uuid(row, "lawyer_id")?,
        status: get_enum(row, "status")?,
        initiated_by: get_uuid(row, "initiated_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn find_connection(pool: &SqlitePool, id: Uuid) -> Result<Option<Connection>, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_connection).transpose()?)
}

pub async fn find_pair(
    pool: &SqlitePool,
    client_id: Uuid,
    lawyer_id: Uuid,
) -> Result<Option<Connection>, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM connections WHERE client_id = ? AND lawyer_id = ?"
    ))
    .bind(client_id.to_string())
    .bind(lawyer_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_connection).transpose()?)
}

/// Moves `connection` to `to` only if nobody changed it since it was read.
async fn apply_transition(
    pool: &SqlitePool,
    connection: &Connection,
    to: ConnectionStatus,
    initiated_by: Uuid,
) -> Result<Connection, AppError> {
    let status = connection.status.transition(to)?;
    let now = Utc::now();

    let result = sqlx::query(
        "UPDATE connections SET status = ?, initiated_by = ?, updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(status.as_str())
    .bind(initiated_by.to_string())
    .bind(now)
    .bind(connection.id.to_string())
    .bind(connection.status.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Connection changed, retry".to_string()));
    }

    info!("Connection {} {} -> {}", connection.id, connection.status, status);

    Ok(Connection {
        status,
        initiated_by,
        updated_at: now,
        ..connection.clone()
    })
}

pub async fn request_connection(
    pool: &SqlitePool,
    request: &NewConnection,
) -> Result<Connection, AppError> {
    if request.initiated_by != request.client_id && request.initiated_by != request.lawyer_id {
        return Err(AppError::bad_request("initiatedBy must be one of the pair"));
    }

    require_role(pool, request.client_id, Role::Client).await?;
    require_role(pool, request.lawyer_id, Role::Lawyer).await?;

    if let Some(existing) = find_pair(pool, request.client_id, request.lawyer_id).await? {
        return match existing.status {
            ConnectionStatus::Active => Err(AppError::bad_request("Already connected")),
            ConnectionStatus::Pending => Err(AppError::bad_request("Request already sent")),
            ConnectionStatus::Rejected => {
                apply_transition(pool, &existing, ConnectionStatus::Pending, request.initiated_by)
                    .await
            }
        };
    }

    let now = Utc::now();
    let connection = Connection {
        id: Uuid::new_v4(),
        client_id: request.client_id,
        lawyer_id: request.lawyer_id,
        status: ConnectionStatus::Pending,
        initiated_by: request.initiated_by,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(&format!(
        "INSERT INTO connections ({CONNECTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(connection.id.to_string())
    .bind(connection.client_id.to_string())
    .bind(connection.lawyer_id.to_string())
    .bind(connection.status.as_str())
    .bind(connection.initiated_by.to_string())
    .bind(connection.created_at)
    .bind(connection.updated_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::bad_request("Request already sent")
        } else {
            e.into()
        }
    })?;

    Ok(connection)
}

pub async fn respond(
    pool: &SqlitePool,
    id: Uuid,
    update: &ConnectionUpdate,
) -> Result<Connection, AppError> {
    let connection = find_connection(pool, id)
        .await?
        .ok_or(AppError::NotFound("Connection"))?;

    let actor = update.actor_id;
    if actor != connection.client_id && actor != connection.lawyer_id {
        return Err(AppError::Forbidden("Not part of this connection".into()));
    }

    if update.status == ConnectionStatus::Active && actor == connection.initiated_by {
        return Err(AppError::Forbidden("Cannot accept your own request".into()));
    }

    let initiated_by = match update.status {
        ConnectionStatus::Pending => actor,
        _ => connection.initiated_by,
    };

    apply_transition(pool, &connection, update.status, initiated_by).await
}

/// Accepting a posted case is consent from both sides, so the pair becomes active
/// whatever state it was in.
pub async fn ensure_active(
    conn: &mut SqliteConnection,
    client_id: Uuid,
    lawyer_id: Uuid,
) -> Result<(), AppError> {
    let now = Utc::now();

    sqlx::query(&format!(
        "INSERT INTO connections ({CONNECTION_COLUMNS}) VALUES (?, ?, ?, 'active', ?, ?, ?)
         ON CONFLICT (client_id, lawyer_id)
         DO UPDATE SET status = 'active', updated_at = excluded.updated_at"
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(client_id.to_string())
    .bind(lawyer_id.to_string())
    .bind(lawyer_id.to_string())
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
    filter: ConnectionFilter,
) -> Result<Vec<ConnectionView>, AppError> {
    let status = match filter {
        ConnectionFilter::Active => Some(ConnectionStatus::Active.as_str()),
        ConnectionFilter::Pending => Some(ConnectionStatus::Pending.as_str()),
        ConnectionFilter::All => None,
    };

    let rows = sqlx::query(&format!(
        "SELECT c.id AS connection_id, c.status AS connection_status, c.initiated_by,
                {users}
         FROM connections c
         JOIN users u
           ON u.id = CASE WHEN c.client_id = ?1 THEN c.lawyer_id ELSE c.client_id END
         WHERE (c.client_id = ?1 OR c.lawyer_id = ?1)
           AND (?2 IS NULL OR c.status = ?2)
         ORDER BY c.updated_at DESC",
        users = user_columns("u"),
    ))
    .bind(user_id.to_string())
    .bind(status)
    .fetch_all(pool)
    .await?;

    let views = rows
        .iter()
        .map(|row| {
            Ok(ConnectionView {
                connection_id: get_uuid(row, "connection_id")?,
                status: get_enum(row, "connection_status")?,
                initiated_by: get_uuid(row, "initiated_by")?,
                profile: row_to_user(row)?,
            })
        })
        .collect::<Result<_, sqlx::Error>>()?;

    Ok(views)
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewConnection>, JsonRejection>,
) -> Result<Json<Connection>, AppError> {
    let Json(request) = payload?;

    Ok(Json(request_connection(&state.db, &request).await?))
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ConnectionUpdate>, JsonRejection>,
) -> Result<Json<Connection>, AppError> {
    let Path(id) = path?;
    let Json(update) = payload?;

    Ok(Json(respond(&state.db, id, &update).await?))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ConnectionQuery>, QueryRejection>,
) -> Result<Json<Vec<ConnectionView>>, AppError> {
    let Query(query) = query?;

    Ok(Json(list_for_user(&state.db, query.user_id, query.status).await?))
}
