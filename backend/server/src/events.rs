//! Calendar: custom events plus every appointment shown as a one hour meeting.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::{JsonRejection, PathRejection, QueryRejection}},
};
use bank::{
    models::{Appointment, CalendarEvent, CalendarStatus, EventKind, EventStatus},
    payloads::{EventQuery, EventStatusUpdate, NewEvent},
};
use chrono::{Duration, TimeZone, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    appointments,
    database::{get_enum, get_opt_uuid, get_uuid},
    error::AppError,
    state::AppState,
    utils::require_text,
};

const EVENT_COLUMNS: &str =
    "id, title, kind, starts_at, ends_at, status, lawyer_id, client_id, notes";

fn default_length() -> Duration {
    Duration::hours(1)
}

fn row_to_event(row: &SqliteRow) -> Result<CalendarEvent, sqlx::Error> {
    Ok(CalendarEvent {
        id: get_uuid(row, "id")?,
        title: row.try_get("title")?,
        kind: get_enum(row, "kind")?,
        start: row.try_get("starts_at")?,
        end: row.try_get("ends_at")?,
        status: CalendarStatus::Event(get_enum(row, "status")?),
        lawyer_id: get_opt_uuid(row, "lawyer_id")?,
        client_id: get_opt_uuid(row, "client_id")?,
        notes: row.try_get("notes")?,
        is_appointment: false,
    })
}

fn appointment_event(appointment: &Appointment) -> CalendarEvent {
    let start = Utc.from_utc_datetime(&appointment.date.and_time(appointment.slot));
    let client = appointment.client_name.as_deref().unwrap_or("Client");

    CalendarEvent {
        id: appointment.id,
        title: format!("Consultation with {client}"),
        kind: EventKind::Meeting,
        start,
        end: start + default_length(),
        status: CalendarStatus::Appointment(appointment.status),
        lawyer_id: Some(appointment.lawyer_id),
        client_id: Some(appointment.client_id),
        notes: appointment.notes.clone(),
        is_appointment: true,
    }
}

pub async fn create_event(pool: &SqlitePool, event: &NewEvent) -> Result<CalendarEvent, AppError> {
    let end = event.end.unwrap_or(event.start + default_length());
    if end < event.start {
        return Err(AppError::bad_request("end must not be before start"));
    }

    let event = CalendarEvent {
        id: Uuid::new_v4(),
        title: require_text(&event.title, "title")?,
        kind: event.kind,
        start: event.start,
        end,
        status: CalendarStatus::Event(EventStatus::Scheduled),
        lawyer_id: event.lawyer_id,
        client_id: event.client_id,
        notes: event.notes.trim().to_string(),
        is_appointment: false,
    };

    sqlx::query(&format!(
        "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(event.id.to_string())
    .bind(&event.title)
    .bind(event.kind.as_str())
    .bind(event.start)
    .bind(event.end)
    .bind(event.status.as_str())
    .bind(event.lawyer_id.map(|id| id.to_string()))
    .bind(event.client_id.map(|id| id.to_string()))
    .bind(&event.notes)
    .execute(pool)
    .await?;

    Ok(event)
}

/// Custom events and appointments for `user_id`, sorted by start.
pub async fn calendar(
    pool: &SqlitePool,
    user_id: Uuid,
    kind: Option<EventKind>,
) -> Result<Vec<CalendarEvent>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE (lawyer_id = ?1 OR client_id = ?1)
           AND (?2 IS NULL OR kind = ?2)"
    ))
    .bind(user_id.to_string())
    .bind(kind.map(|kind| kind.as_str()))
    .fetch_all(pool)
    .await?;

    let mut events = rows
        .iter()
        .map(row_to_event)
        .collect::<Result<Vec<_>, _>>()?;

    if kind.is_none_or(|kind| kind == EventKind::Meeting) {
        let booked = appointments::list_involving(pool, user_id).await?;
        events.extend(booked.iter().map(appointment_event));
    }

    events.sort_by_key(|event| event.start);

    Ok(events)
}

pub async fn set_status(
    pool: &SqlitePool,
    id: Uuid,
    status: EventStatus,
) -> Result<CalendarEvent, AppError> {
    let row = sqlx::query(&format!(
        "UPDATE events SET status = ? WHERE id = ? RETURNING {EVENT_COLUMNS}"
    ))
    .bind(status.as_str())
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Event"))?;

    Ok(row_to_event(&row)?)
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<EventQuery>, QueryRejection>,
) -> Result<Json<Vec<CalendarEvent>>, AppError> {
    let Query(query) = query?;

    Ok(Json(calendar(&state.db, query.user_id, query.kind).await?))
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> Result<Json<CalendarEvent>, AppError> {
    let Json(event) = payload?;

    Ok(Json(create_event(&state.db, &event).await?))
}

pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<EventStatusUpdate>, JsonRejection>,
) -> Result<Json<CalendarEvent>, AppError> {
    let Path(id) = path?;
    let Json(update) = payload?;

    Ok(Json(set_status(&state.db, id, update.status).await?))
}

#[cfg(test)]
mod tests {
    use bank::{models::AppointmentStatus, payloads::NewAppointment};
    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::{database::test_pool, users::fixtures};

    fn hearing(lawyer_id: Uuid, start: &str) -> NewEvent {
        NewEvent {
            title: "Bail hearing".into(),
            kind: EventKind::Hearing,
            start: start.parse().unwrap(),
            end: None,
            lawyer_id: Some(lawyer_id),
            client_id: None,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn events_default_to_one_hour() {
        let pool = test_pool().await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let event = create_event(&pool, &hearing(lawyer.id, "2099-03-14T09:00:00Z"))
            .await
            .unwrap();

        assert_eq!(event.end - event.start, Duration::hours(1));
        assert_eq!(event.status, CalendarStatus::Event(EventStatus::Scheduled));
    }

    #[tokio::test]
    async fn end_before_start_is_rejected() {
        let pool = test_pool().await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        let mut event = hearing(lawyer.id, "2099-03-14T09:00:00Z");
        event.end = Some("2099-03-14T08:00:00Z".parse().unwrap());

        assert!(create_event(&pool, &event).await.is_err());
    }

    #[tokio::test]
    async fn calendar_merges_appointments() {
        let pool = test_pool().await;
        let client = fixtures::client(&pool, "Asha").await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;

        create_event(&pool, &hearing(lawyer.id, "2099-03-14T15:00:00Z"))
            .await
            .unwrap();
        appointments::book(
            &pool,
            &NewAppointment {
                client_id: client.id,
                lawyer_id: lawyer.id,
                date: NaiveDate::from_ymd_opt(2099, 3, 14).unwrap(),
                slot: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                notes: String::new(),
            },
        )
        .await
        .unwrap();

        let events = calendar(&pool, lawyer.id, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_appointment);
        assert_eq!(events[0].title, "Consultation with Asha");
        assert_eq!(
            events[0].status,
            CalendarStatus::Appointment(AppointmentStatus::Pending)
        );
        assert_eq!(events[1].kind, EventKind::Hearing);

        let hearings = calendar(&pool, lawyer.id, Some(EventKind::Hearing))
            .await
            .unwrap();
        assert_eq!(hearings.len(), 1);
        assert!(!hearings[0].is_appointment);
    }

    #[tokio::test]
    async fn status_updates_persist() {
        let pool = test_pool().await;
        let lawyer = fixtures::lawyer(&pool, "Meera").await;
        let event = create_event(&pool, &hearing(lawyer.id, "2099-03-14T09:00:00Z"))
            .await
            .unwrap();

        let done = set_status(&pool, event.id, EventStatus::Completed)
            .await
            .unwrap();
        assert_eq!(done.status, CalendarStatus::Event(EventStatus::Completed));

        let err = set_status(&pool, Uuid::new_v4(), EventStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Event")));
    }
}
