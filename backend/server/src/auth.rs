//! # Phone login
//!
//! - `send-otp` stores a fresh code for the normalized phone
//! - `verify-otp` refuses admin sign-ups, spends the code, then finds or
//!   creates the user behind it
//! - SMS delivery is out of scope; the code is logged and, when `EXPOSE_OTP`
//!   is set, echoed back as `mockOtp` for local dashboards
use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use bank::{
    models::Role,
    payloads::{OtpSent, OtpVerified, SendOtp, VerifyOtp},
};
use tracing::{debug, info};

use crate::{
    error::AppError,
    otp::{CodeCheck, generate_code},
    state::AppState,
    users::{find_user, insert_user},
    utils::{Identifier, normalize_phone, sanitize},
};

pub async fn send_otp_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendOtp>, JsonRejection>,
) -> Result<Json<OtpSent>, AppError> {
    let Json(payload) = payload?;
    let phone = normalize_phone(&payload.phone)?;

    let code = generate_code();
    state.codes.put(&phone, &code).await?;

    debug!("OTP for {phone}: {code}");
    info!("OTP issued for {phone}");

    Ok(Json(OtpSent {
        message: "OTP sent successfully".to_string(),
        mock_otp: state.config.expose_otp.then_some(code),
    }))
}

pub async fn verify_otp_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyOtp>, JsonRejection>,
) -> Result<Json<OtpVerified>, AppError> {
    let Json(payload) = payload?;
    let phone = normalize_phone(&payload.phone)?;

    // Sign-up rules are checked before the code is spent.
    let existing = find_user(&state.db, &Identifier::Phone(phone.clone())).await?;
    let role = payload.role.unwrap_or(Role::Client);
    if existing.is_none() && role == Role::Admin {
        return Err(AppError::Forbidden("Admin accounts cannot self-register".into()));
    }

    match state.codes.check(&phone, payload.otp.trim()).await? {
        CodeCheck::Valid => {}
        CodeCheck::Invalid { remaining: 0 } | CodeCheck::Missing => {
            return Err(AppError::bad_request("OTP expired or not requested"));
        }
        CodeCheck::Invalid { remaining } => {
            return Err(AppError::bad_request(format!(
                "Invalid OTP, {remaining} attempts left"
            )));
        }
    }

    if let Some(user) = existing {
        info!("Login {} {}", user.role, user.id);
        return Ok(Json(OtpVerified {
            user,
            created: false,
        }));
    }

    let name = payload
        .name
        .as_deref()
        .map(sanitize)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("User {}", &phone[phone.len().saturating_sub(4)..]));

    let user = insert_user(&state.db, &name, None, Some(phone), role).await?;
    state.reindex(&user).await;

    Ok(Json(OtpVerified {
        user,
        created: true,
    }))
}
