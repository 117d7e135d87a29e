//! Plan upgrades. Orders are created by the payment gateway; this side only
//! checks the gateway signature, records the payment and moves the plan.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
};
use bank::{
    models::{Payment, PaymentStatus, Plan},
    payloads::{OwnerQuery, VerifyPayment},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    database::{get_enum, get_uuid},
    error::{AppError, is_unique_violation},
    state::AppState,
    users::require_user,
};

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, order_id: &str, payment_id: &str) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::bad_request("Invalid payment key"))?;
    mac.update(format!("{order_id}|{payment_id}").as_bytes());

    Ok(mac)
}

/// Hex signature the gateway sends for `order_id|payment_id`.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> Result<String, AppError> {
    Ok(hex::encode(mac(secret, order_id, payment_id)?.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn signature_matches(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> Result<bool, AppError> {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Ok(false);
    };

    Ok(mac(secret, order_id, payment_id)?.verify_slice(&expected).is_ok())
}

fn row_to_payment(row: &SqliteRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        id: get_uuid(row, "id")?,
        order_id: row.try_get("order_id")?,
        payment_id: row.try_get("payment_id")?,
        user_id: get_uuid(row, "user_id")?,
        amount: row.try_get("amount")?,
        plan: get_enum(row, "plan")?,
        status: get_enum(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Records a verified payment and upgrades the payer in one transaction.
pub async fn record_payment(
    pool: &SqlitePool,
    payment: &VerifyPayment,
) -> Result<Payment, AppError> {
    if payment.amount <= 0 {
        return Err(AppError::bad_request("amount must be positive"));
    }
    if payment.plan == Plan::Free {
        return Err(AppError::bad_request("Free plan needs no payment"));
    }
    require_user(pool, payment.user_id).await?;

    let payment = Payment {
        id: Uuid::new_v4(),
        order_id: payment.order_id.trim().to_string(),
        payment_id: payment.payment_id.trim().to_string(),
        user_id: payment.user_id,
        amount: payment.amount,
        plan: payment.plan,
        status: PaymentStatus::Success,
        created_at: Utc::now(),
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO payments (id, order_id, payment_id, user_id, amount, plan, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(payment.id.to_string())
    .bind(&payment.order_id)
    .bind(&payment.payment_id)
    .bind(payment.user_id.to_string())
    .bind(payment.amount)
    .bind(payment.plan.as_str())
    .bind(payment.status.as_str())
    .bind(payment.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Payment already recorded".to_string())
        } else {
            e.into()
        }
    })?;

    sqlx::query("UPDATE users SET plan = ? WHERE id = ?")
        .bind(payment.plan.as_str())
        .bind(payment.user_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} upgraded to {}", payment.user_id, payment.plan);

    Ok(payment)
}

pub async fn history(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Payment>, AppError> {
    let rows = sqlx::query(
        "SELECT id, order_id, payment_id, user_id, amount, plan, status, created_at
         FROM payments WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_payment).collect::<Result<_, _>>()?)
}

pub async fn revenue(pool: &SqlitePool) -> Result<i64, AppError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0) FROM payments WHERE status = 'success'")
            .fetch_one(pool)
            .await?;

    Ok(total)
}

pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyPayment>, JsonRejection>,
) -> Result<Json<Payment>, AppError> {
    let Json(payload) = payload?;

    let Some(secret) = state.config.payment_key_secret.as_deref() else {
        warn!("Payment verification attempted without PAYMENT_KEY_SECRET");
        return Err(AppError::bad_request("Payments are not configured"));
    };

    if !signature_matches(secret, &payload.order_id, &payload.payment_id, &payload.signature)? {
        warn!("Invalid payment signature for order {}", payload.order_id);
        return Err(AppError::bad_request("Invalid payment signature"));
    }

    Ok(Json(record_payment(&state.db, &payload).await?))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let Query(query) = query?;

    Ok(Json(history(&state.db, query.user_id).await?))
}
