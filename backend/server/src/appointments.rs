//! Consultation bookings.
//!
//! A lawyer/date/slot can hold one live (pending or confirmed) appointment at a
//! time. The `appointments_live_slot` index enforces it, so two concurrent
//! bookings of the same slot end with exactly one row and one `409`.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
};
use bank::{
    models::{Appointment, AppointmentStatus, Role, slot_format},
    payloads::{AppointmentQuery, AppointmentUpdate, BookedSlotsQuery, NewAppointment},
};
use chrono::{NaiveDate, NaiveTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::info;
use uuid::Uuid;

use crate::{
    database::{get_enum, get_uuid},
    error::{AppError, is_unique_violation},
    state::AppState,
    users::require_role,
};

const APPOINTMENT_SELECT: &str = "SELECT a.id, a.client_id, a.lawyer_id, a.date, a.slot, a.notes,
        a.status, a.meeting_link, a.created_at,
        cu.name AS client_name, lu.name AS lawyer_name
    FROM appointments a
    LEFT JOIN users cu ON cu.id = a.client_id
    LEFT JOIN users lu ON lu.id = a.lawyer_id";

fn format_slot(slot: NaiveTime) -> String {
    slot.format(slot_format::FORMAT).to_string()
}

fn row_to_appointment(row: &SqliteRow) -> Result<Appointment, sqlx::Error> {
    let slot: String = row.try_get("slot")?;
    let slot = NaiveTime::parse_from_str(&slot, slot_format::FORMAT).map_err(|e| {
        sqlx::Error::ColumnDecode {
            index: "slot".to_string(),
            source: Box::new(e),
        }
    })?;

    Ok(Appointment {
        id: get_uuid(row, "id")?,
        client_id: get_uuid(row, "client_id")?,
        lawyer_id: get_uuid(row, "lawyer_id")?,
        date: row.try_get("date")?,
        slot,
        notes: row.try_get("notes")?,
        status: get_enum(row, "status")?,
        meeting_link: row.try_get("meeting_link")?,
        client_name: row.try_get("client_name")?,
        lawyer_name: row.try_get("lawyer_name")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn find_appointment(
    pool: &SqlitePool,
    id: Uuid,
) -> Result<Option<Appointment>, AppError> {
    let row = sqlx::query(&format!("{APPOINTMENT_SELECT} WHERE a.id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_appointment).transpose()?)
}

pub async fn book(pool: &SqlitePool, request: &NewAppointment) -> Result<Appointment, AppError> {
    if request.date < Utc::now().date_naive() {
        return Err(AppError::bad_request("Cannot book a past date"));
    }

    let client = require_role(pool, request.client_id, Role::Client).await?;
    let lawyer = require_role(pool, request.lawyer_id, Role::Lawyer).await?;

    let appointment = Appointment {
        id: Uuid::new_v4(),
        client_id: client.id,
        lawyer_id: lawyer.id,
        date: request.date,
        slot: request.slot,
        notes: request.notes.trim().to_string(),
        status: AppointmentStatus::Pending,
        meeting_link: None,
        client_name: Some(client.name),
        lawyer_name: Some(lawyer.name),
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO appointments (id, client_id, lawyer_id, date, slot, notes, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(appointment.id.to_string())
    .bind(appointment.client_id.to_string())
    .bind(appointment.lawyer_id.to_string())
    .bind(appointment.date)
    .bind(format_slot(appointment.slot))
    .bind(&appointment.notes)
    .bind(appointment.status.as_str())
    .bind(appointment.created_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Slot already booked".to_string())
        } else {
            e.into()
        }
    })?;

    info!(
        "Appointment {} booked with {} on {} {}",
        appointment.id,
        appointment.lawyer_id,
        appointment.date,
        format_slot(appointment.slot)
    );

    Ok(appointment)
}

async fn list_where(
    pool: &SqlitePool,
    filter: &str,
    user_id: Uuid,
) -> Result<Vec<Appointment>, AppError> {
    let rows = sqlx::query(&format!(
        "{APPOINTMENT_SELECT} WHERE {filter} ORDER BY a.date, a.slot"
    ))
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_appointment).collect::<Result<_, _>>()?)
}

/// Lawyers see the appointments booked with them; anyone else sees the ones
/// they booked.
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
    role: Option<Role>,
) -> Result<Vec<Appointment>, AppError> {
    let filter = match role {
        Some(Role::Lawyer) => "a.lawyer_id = ?1",
        _ => "a.client_id = ?1",
    };

    list_where(pool, filter, user_id).await
}

/// Every appointment the user takes part in, on either side.
pub async fn list_involving(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Appointment>, AppError> {
    list_where(pool, "(a.client_id = ?1 OR a.lawyer_id = ?1)", user_id).await
}

pub async fn update_status(
    pool: &SqlitePool,
    id: Uuid,
    update: &AppointmentUpdate,
) -> Result<Appointment, AppError> {
    let appointment = find_appointment(pool, id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))?;

    let status = appointment.status.transition(update.status)?;
    let meeting_link = update
        .meeting_link
        .as_deref()
        .map(str::trim)
        .filter(|link| !link.is_empty());

    let result = sqlx::query(
        "UPDATE appointments SET status = ?, meeting_link = COALESCE(?, meeting_link)
         WHERE id = ? AND status = ?",
    )
    .bind(status.as_str())
    .bind(meeting_link)
    .bind(id.to_string())
    .bind(appointment.status.as_str())
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Slot already booked".to_string())
        } else {
            e.into()
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Appointment changed, retry".to_string()));
    }

    info!("Appointment {id} {} -> {status}", appointment.status);

    find_appointment(pool, id)
        .await?
        .ok_or(AppError::NotFound("Appointment"))
}

/// Slots of `lawyer_id` on `date` that are still held, as `HH:MM`.
pub async fn booked_slots(
    pool: &SqlitePool,
    lawyer_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<String>, AppError> {
    let slots: Vec<String> = sqlx::query_scalar(
        "SELECT slot FROM appointments
         WHERE lawyer_id = ? AND date = ? AND status IN ('pending', 'confirmed')
         ORDER BY slot",
    )
    .bind(lawyer_id.to_string())
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(slots)
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewAppointment>, JsonRejection>,
) -> Result<Json<Appointment>, AppError> {
    let Json(request) = payload?;

    Ok(Json(book(&state.db, &request).await?))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AppointmentQuery>, QueryRejection>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    let Query(query) = query?;

    Ok(Json(list_for_user(&state.db, query.user_id, query.role).await?))
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AppointmentUpdate>, JsonRejection>,
) -> Result<Json<Appointment>, AppError> {
    let Path(id) = path?;
    let Json(update) = payload?;

    Ok(Json(update_status(&state.db, id, &update).await?))
}

pub async fn booked_slots_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<BookedSlotsQuery>, QueryRejection>,
) -> Result<Json<Vec<String>>, AppError> {
    let Query(query) = query?;

    let (Some(lawyer_id), Some(date)) = (query.lawyer_id, query.date) else {
        return Err(AppError::bad_request("lawyerId and date are required"));
    };

    Ok(Json(booked_slots(&state.db, lawyer_id, date).await?))
}

#[cfg(test)]
mod tests {
    use bank::models::User;

    use super::*;
    use crate::{database::test_pool, users::fixtures};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2099, 3, 14).unwrap()
    }

    fn slot(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
    }

    fn request(client: &User, lawyer: &User, hour: u32) -> NewAppointment {
        NewAppointment {
            client_id: client.id,
            lawyer_id: lawyer.id,
            date: date(),
            slot: slot(hour),
            notes: " tenancy notice ".into(),
        }
    }

    fn update(status: AppointmentStatus) -> AppointmentUpdate {
        AppointmentUpdate {
            status,
            meeting_link: None,
        }
    }

    #[tokio::test]
    async fn booking_carries_names() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let booked = book(&pool, &request(&client, &lawyer, 10)).await.unwrap();
        let listed = list_for_user(&pool, client.id, Some(Role::Client))
            .await
            .unwrap();

        assert_eq!(booked.status, AppointmentStatus::Pending);
        assert_eq!(booked.notes, "tenancy notice");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].lawyer_name.as_deref(), Some("Meera"));
        assert_eq!(listed[0].client_name.as_deref(), Some("Asha"));
        assert_eq!(listed[0].slot, slot(10));
    }

    #[tokio::test]
    async fn role_picks_the_side_of_the_listing() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;
        book(&pool, &request(&client, &lawyer, 10)).await.unwrap();

        let as_lawyer = list_for_user(&pool, lawyer.id, Some(Role::Lawyer))
            .await
            .unwrap();
        assert_eq!(as_lawyer.len(), 1);

        assert!(list_for_user(&pool, lawyer.id, None).await.unwrap().is_empty());
        assert_eq!(list_for_user(&pool, client.id, None).await.unwrap().len(), 1);
        assert_eq!(list_involving(&pool, lawyer.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_slot_cannot_be_booked_twice() {
        let pool = test_pool().await;
        let asha = fixtures::client(&pool, "Asha").await;
        let ravi = fixtures::client(&pool, "Ravi").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        book(&pool, &request(&asha, &lawyer, 10)).await.unwrap();
        let err = book(&pool, &request(&ravi, &lawyer, 10)).await.unwrap_err();

        assert_eq!(err.to_string(), "Slot already booked");
        book(&pool, &request(&ravi, &lawyer, 11)).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_slots_free_up() {
        let pool = test_pool().await;
        let asha = fixtures::client(&pool, "Asha").await;
        let ravi = fixtures::client(&pool, "Ravi").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let first = book(&pool, &request(&asha, &lawyer, 10)).await.unwrap();
        assert_eq!(
            booked_slots(&pool, lawyer.id, date()).await.unwrap(),
            vec!["10:00".to_string()]
        );

        update_status(&pool, first.id, &update(AppointmentStatus::Cancelled))
            .await
            .unwrap();

        assert!(booked_slots(&pool, lawyer.id, date()).await.unwrap().is_empty());
        book(&pool, &request(&ravi, &lawyer, 10)).await.unwrap();
    }

    #[tokio::test]
    async fn transitions_are_validated() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;
        let booked = book(&pool, &request(&client, &lawyer, 10)).await.unwrap();

        let err = update_status(&pool, booked.id, &update(AppointmentStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Model(_)));

        let confirmed = update_status(
            &pool,
            booked.id,
            &AppointmentUpdate {
                status: AppointmentStatus::Confirmed,
                meeting_link: Some("https://meet.example/abc".into()),
            },
        )
        .await
        .unwrap();

        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
        assert_eq!(
            confirmed.meeting_link.as_deref(),
            Some("https://meet.example/abc")
        );
    }

    #[tokio::test]
    async fn past_dates_are_refused() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let mut past = request(&client, &lawyer, 10);
        past.date = NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();

        assert!(matches!(
            book(&pool, &past).await.unwrap_err(),
            AppError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn wrong_roles_are_refused() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let other = fixtures::client(&pool, "Ravi").await;

        let err = book(&pool, &request(&client, &other, 10)).await.unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
