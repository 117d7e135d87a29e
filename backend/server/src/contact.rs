//! Public contact form. Mail delivery is external; inquiries are stored for
//! the admin dashboard and logged.
use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use bank::{
    models::Inquiry,
    payloads::{Acknowledged, ContactForm},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::info;
use uuid::Uuid;

use crate::{
    database::get_uuid,
    error::AppError,
    state::AppState,
    utils::{normalize_email, sanitize},
};

pub const INQUIRY_LIMIT: i64 = 100;

const DEFAULT_SUBJECT: &str = "General";

fn row_to_inquiry(row: &SqliteRow) -> Result<Inquiry, sqlx::Error> {
    Ok(Inquiry {
        id: get_uuid(row, "id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        subject: row.try_get("subject")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn submit_inquiry(pool: &SqlitePool, form: &ContactForm) -> Result<Inquiry, AppError> {
    let name = sanitize(&form.name);
    let email = normalize_email(&form.email);
    let message = form.message.trim().to_string();

    if name.is_empty() || email.is_empty() || message.is_empty() {
        return Err(AppError::bad_request("All fields are required"));
    }

    let subject = Some(sanitize(&form.subject))
        .filter(|subject| !subject.is_empty())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

    let inquiry = Inquiry {
        id: Uuid::new_v4(),
        name,
        email,
        subject,
        message,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO inquiries (id, name, email, subject, message, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(inquiry.id.to_string())
    .bind(&inquiry.name)
    .bind(&inquiry.email)
    .bind(&inquiry.subject)
    .bind(&inquiry.message)
    .bind(inquiry.created_at)
    .execute(pool)
    .await?;

    info!(
        "Inquiry {} from {} <{}>: {}",
        inquiry.id, inquiry.name, inquiry.email, inquiry.subject
    );

    Ok(inquiry)
}

pub async fn list_inquiries(pool: &SqlitePool, limit: i64) -> Result<Vec<Inquiry>, AppError> {
    let rows = sqlx::query(
        "SELECT id, name, email, subject, message, created_at
         FROM inquiries ORDER BY created_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_inquiry).collect::<Result<_, _>>()?)
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ContactForm>, JsonRejection>,
) -> Result<Json<Acknowledged>, AppError> {
    let Json(form) = payload?;

    submit_inquiry(&state.db, &form).await?;

    Ok(Json(Acknowledged {
        success: true,
        message: "Message sent! We will contact you soon.".to_string(),
    }))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Inquiry>>, AppError> {
    Ok(Json(list_inquiries(&state.db, INQUIRY_LIMIT).await?))
}
