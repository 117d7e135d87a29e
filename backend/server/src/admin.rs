use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
};
use bank::{
    models::{Role, User, VerificationStatus},
    payloads::{AccessIssued, AccessRequest, AdminStats, Decision, LawyerDecision, LawyerVerdict},
};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    otp::generate_access_token,
    payments::revenue,
    state::AppState,
    users::{find_user, list_by_verification, require_role, set_verification},
    utils::Identifier,
};

pub async fn stats(pool: &SqlitePool) -> Result<AdminStats, AppError> {
    let (users, pending): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(role = 'lawyer' AND verified = 0), 0) FROM users",
    )
    .fetch_one(pool)
    .await?;

    Ok(AdminStats {
        users,
        pending,
        revenue: revenue(pool).await?,
    })
}

/// Approval verifies the lawyer; rejection also drops the uploaded resume.
pub async fn decide(pool: &SqlitePool, id: Uuid, decision: Decision) -> Result<User, AppError> {
    require_role(pool, id, Role::Lawyer).await?;

    let user = match decision {
        Decision::Approved => set_verification(pool, id, VerificationStatus::Verified, false).await?,
        Decision::Rejected => set_verification(pool, id, VerificationStatus::Rejected, true).await?,
    };

    info!("Lawyer {id} {}", user.verification_status);

    Ok(user)
}

/// Issues a one-off access token to an admin. Delivery is by mail, which is
/// external; the token is logged instead.
pub async fn issue_access_token(pool: &SqlitePool, user_id: Uuid) -> Result<String, AppError> {
    let admin = find_user(pool, &Identifier::Id(user_id))
        .await?
        .filter(|user| user.role == Role::Admin);

    let Some(admin) = admin else {
        warn!("Access token refused for {user_id}");
        return Err(AppError::Forbidden("Unauthorized".to_string()));
    };

    let token = generate_access_token();
    debug!("Access token for {}: {token}", admin.id);
    info!("Access token issued for admin {}", admin.id);

    Ok(token)
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<AdminStats>, AppError> {
    Ok(Json(stats(&state.db).await?))
}

pub async fn clients_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(list_by_verification(&state.db, Role::Client, None).await?))
}

pub async fn pending_lawyers_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(
        list_by_verification(&state.db, Role::Lawyer, Some(false)).await?,
    ))
}

pub async fn verify_lawyer_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<LawyerDecision>, JsonRejection>,
) -> Result<Json<LawyerVerdict>, AppError> {
    let Path(id) = path?;
    let Json(payload) = payload?;

    let user = decide(&state.db, id, payload.status).await?;
    state.reindex(&user).await;

    let message = match payload.status {
        Decision::Approved => "Lawyer approved successfully",
        Decision::Rejected => "Lawyer rejected",
    };

    Ok(Json(LawyerVerdict {
        message: message.to_string(),
        user,
    }))
}

pub async fn request_access_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AccessRequest>, JsonRejection>,
) -> Result<Json<AccessIssued>, AppError> {
    let Json(request) = payload?;

    let token = issue_access_token(&state.db, request.user_id).await?;

    Ok(Json(AccessIssued {
        message: "Token sent to registered email".to_string(),
        dev_token: state.config.expose_otp.then_some(token),
    }))
}
