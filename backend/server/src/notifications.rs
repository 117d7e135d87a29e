use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
};
use bank::payloads::{MarkRead, MarkedRead, UnreadCount, UnreadQuery};
use tracing::debug;

use crate::{
    error::AppError,
    messages::{mark_read, unread_count},
    state::AppState,
};

pub async fn unread_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UnreadQuery>, QueryRejection>,
) -> Result<Json<UnreadCount>, AppError> {
    let Query(query) = query?;

    let Some(user_id) = query.user_id else {
        return Err(AppError::bad_request("Missing userId"));
    };

    Ok(Json(UnreadCount {
        count: unread_count(&state.db, user_id).await?,
    }))
}

pub async fn read_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MarkRead>, JsonRejection>,
) -> Result<Json<MarkedRead>, AppError> {
    let Json(payload) = payload?;

    let updated = mark_read(&state.db, payload.user_id, payload.chat_id).await?;
    debug!("Marked {updated} messages read for {}", payload.user_id);

    Ok(Json(MarkedRead {
        success: true,
        updated,
    }))
}

#[cfg(test)]
mod tests {
    use bank::payloads::NewMessage;
    use uuid::Uuid;

    use super::*;
    use crate::{config::Config, messages::save_message, users::fixtures};

    async fn unread(state: &Arc<AppState>, user_id: Option<Uuid>) -> Result<i64, AppError> {
        let Json(unread) =
            unread_handler(State(state.clone()), Ok(Query(UnreadQuery { user_id }))).await?;

        Ok(unread.count)
    }

    #[tokio::test]
    async fn unread_needs_a_user() {
        let state = AppState::new(Config::default()).await.unwrap();

        let err = unread(&state, None).await.unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(err.to_string(), "Missing userId");
    }

    #[tokio::test]
    async fn reading_a_chat_clears_its_count() {
        let state = AppState::new(Config::default()).await.unwrap();
        let client = fixtures::client(&state.db, "Asha").await;
        let lawyer = fixtures::lawyer(&state.db, "Meera").await;

        save_message(
            &state.db,
            &NewMessage {
                text: "Hearing moved to Monday".into(),
                client_id: client.id,
                lawyer_id: lawyer.id,
                sender_id: lawyer.id,
            },
        )
        .await
        .unwrap();
        assert_eq!(unread(&state, Some(client.id)).await.unwrap(), 1);
        assert_eq!(unread(&state, Some(lawyer.id)).await.unwrap(), 0);

        let Json(marked) = read_handler(
            State(state.clone()),
            Ok(Json(MarkRead {
                chat_id: lawyer.id,
                user_id: client.id,
            })),
        )
        .await
        .unwrap();

        assert!(marked.success);
        assert_eq!(marked.updated, 1);
        assert_eq!(unread(&state, Some(client.id)).await.unwrap(), 0);
    }
}
