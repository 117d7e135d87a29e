use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
};
use bank::{
    models::{Plan, Role, User, VerificationStatus},
    payloads::{ProfileUpdate, RegisterUser, UserQuery},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::info;
use uuid::Uuid;

use crate::{
    database::{get_enum, get_uuid},
    error::{AppError, is_unique_violation},
    state::AppState,
    utils::{Identifier, like_pattern, normalize_email, normalize_phone, require_text, sanitize},
};

pub const LIST_LIMIT: i64 = 200;

const USER_COLUMNS: &str = "id, name, email, phone, role, location, specialization, experience, \
    fee, about, plan, verified, verification_status, resume, created_at";

/// User columns qualified by a table alias, for joins that decode with [`row_to_user`].
pub fn user_columns(alias: &str) -> String {
    USER_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn row_to_user(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: get_uuid(row, "id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        role: get_enum(row, "role")?,
        location: row.try_get("location")?,
        specialization: row.try_get("specialization")?,
        experience: row.try_get("experience")?,
        fee: row.try_get("fee")?,
        about: row.try_get("about")?,
        plan: get_enum(row, "plan")?,
        verified: row.try_get("verified")?,
        verification_status: get_enum(row, "verification_status")?,
        resume: row.try_get("resume")?,
        created_at: row.try_get("created_at")?,
    })
}

fn duplicate_contact(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict("Email or phone already registered".to_string())
    } else {
        err.into()
    }
}

pub async fn insert_user(
    pool: &SqlitePool,
    name: &str,
    email: Option<String>,
    phone: Option<String>,
    role: Role,
) -> Result<User, AppError> {
    // lawyers wait for an admin before showing as verified
    let verification_status = match role {
        Role::Lawyer => VerificationStatus::Pending,
        _ => VerificationStatus::Unverified,
    };

    let user = User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email,
        phone,
        role,
        location: String::new(),
        specialization: String::new(),
        experience: 0,
        fee: 0,
        about: String::new(),
        plan: Plan::Free,
        verified: false,
        verification_status,
        resume: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO users (id, name, email, phone, role, plan, verified, verification_status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user.id.to_string())
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.phone)
    .bind(user.role.as_str())
    .bind(user.plan.as_str())
    .bind(user.verified)
    .bind(user.verification_status.as_str())
    .bind(user.created_at)
    .execute(pool)
    .await
    .map_err(duplicate_contact)?;

    info!("Registered {} {}", user.role, user.id);

    Ok(user)
}

pub async fn find_user(pool: &SqlitePool, key: &Identifier) -> Result<Option<User>, AppError> {
    let (column, value) = match key {
        Identifier::Id(id) => ("id", id.to_string()),
        Identifier::Email(email) => ("email", email.clone()),
        Identifier::Phone(phone) => ("phone", phone.clone()),
    };

    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?"))
        .bind(value)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_user).transpose()?)
}

pub async fn require_user(pool: &SqlitePool, id: Uuid) -> Result<User, AppError> {
    find_user(pool, &Identifier::Id(id))
        .await?
        .ok_or(AppError::NotFound("User"))
}

/// Loads the user and checks they hold `role`.
pub async fn require_role(pool: &SqlitePool, id: Uuid, role: Role) -> Result<User, AppError> {
    let user = require_user(pool, id).await?;

    if user.role != role {
        return Err(AppError::Forbidden(format!("User is not a {role}")));
    }

    Ok(user)
}

pub async fn list_users(
    pool: &SqlitePool,
    query: &UserQuery,
    limit: i64,
) -> Result<Vec<User>, AppError> {
    let needle = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(like_pattern);

    let rows = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE (?1 IS NULL OR role = ?1)
           AND (?2 IS NULL OR name LIKE ?2 ESCAPE '\\' OR phone LIKE ?2 ESCAPE '\\')
         ORDER BY created_at DESC
         LIMIT ?3"
    ))
    .bind(query.role.map(|role| role.as_str()))
    .bind(needle)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_user).collect::<Result<_, _>>()?)
}

pub async fn list_lawyers(pool: &SqlitePool, limit: i64) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE role = 'lawyer'
         ORDER BY experience DESC, name
         LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_user).collect::<Result<_, _>>()?)
}

pub async fn list_by_verification(
    pool: &SqlitePool,
    role: Role,
    verified: Option<bool>,
) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE role = ?1 AND (?2 IS NULL OR verified = ?2)
         ORDER BY created_at DESC"
    ))
    .bind(role.as_str())
    .bind(verified)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_user).collect::<Result<_, _>>()?)
}

pub async fn update_profile(
    pool: &SqlitePool,
    id: Uuid,
    update: &ProfileUpdate,
) -> Result<User, AppError> {
    let email = update
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty());
    let phone = update.phone.as_deref().map(normalize_phone).transpose()?;

    let result = sqlx::query(
        "UPDATE users SET
            name = COALESCE(?, name),
            email = COALESCE(?, email),
            phone = COALESCE(?, phone),
            location = COALESCE(?, location),
            specialization = COALESCE(?, specialization),
            experience = COALESCE(?, experience),
            fee = COALESCE(?, fee),
            about = COALESCE(?, about),
            plan = COALESCE(?, plan),
            resume = COALESCE(?, resume)
         WHERE id = ?",
    )
    .bind(update.name.as_deref().map(sanitize))
    .bind(email)
    .bind(phone)
    .bind(update.location.as_deref().map(sanitize))
    .bind(update.specialization.as_deref().map(sanitize))
    .bind(update.experience.map(|years| years.max(0)))
    .bind(update.fee.map(|fee| fee.max(0)))
    .bind(update.about.as_deref())
    .bind(update.plan.map(|plan| plan.as_str()))
    .bind(update.resume.as_deref())
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(duplicate_contact)?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }

    require_user(pool, id).await
}

pub async fn set_verification(
    pool: &SqlitePool,
    id: Uuid,
    status: VerificationStatus,
    clear_resume: bool,
) -> Result<User, AppError> {
    let result = sqlx::query(
        "UPDATE users SET
            verified = ?,
            verification_status = ?,
            resume = CASE WHEN ? THEN NULL ELSE resume END
         WHERE id = ?",
    )
    .bind(status == VerificationStatus::Verified)
    .bind(status.as_str())
    .bind(clear_resume)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }

    require_user(pool, id).await
}

pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterUser>, JsonRejection>,
) -> Result<Json<User>, AppError> {
    let Json(payload) = payload?;

    let name = require_text(&payload.name, "name")?;
    let email = payload.email.as_deref().map(normalize_email).filter(|e| !e.is_empty());
    let phone = payload.phone.as_deref().map(normalize_phone).transpose()?;

    if email.is_none() && phone.is_none() {
        return Err(AppError::bad_request("Email or phone is required"));
    }

    if payload.role == Role::Admin {
        return Err(AppError::Forbidden("Admin accounts cannot self-register".into()));
    }

    let user = insert_user(&state.db, &name, email, phone, payload.role).await?;
    state.reindex(&user).await;

    Ok(Json(user))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<Vec<User>>, AppError> {
    let Query(query) = query?;

    Ok(Json(list_users(&state.db, &query, LIST_LIMIT).await?))
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<User>, AppError> {
    let Path(key) = path?;
    let key = Identifier::parse(&key)?;

    find_user(&state.db, &key)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("User"))
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<User>, AppError> {
    let Path(key) = path?;
    let Json(update) = payload?;
    let key = Identifier::parse(&key)?;

    let user = find_user(&state.db, &key)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let updated = update_profile(&state.db, user.id, &update).await?;
    state.reindex(&updated).await;

    Ok(Json(updated))
}
