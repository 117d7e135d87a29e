//! # One-time codes
//!
//! Six digit numeric codes for phone login, kept as strings so leading zeroes
//! survive.
//!
//! ## Redis
//! - `otp:{phone}`: the code, expires after the configured TTL
//! - `otp:{phone}:attempts`: wrong guesses so far, same TTL
//! - A correct guess deletes both keys; only the caller whose delete removed
//!   the code wins, so a code can be spent once
//! - Reaching the attempt limit burns the code
//!
//! Without `REDIS_URL` the same rules run against an in-process map.
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use rand::{Rng, distr::Alphanumeric};
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Valid,
    Invalid { remaining: u32 },
    Missing,
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Stores a fresh code for `phone`, replacing any previous one.
    async fn put(&self, phone: &str, code: &str) -> Result<(), AppError>;

    async fn check(&self, phone: &str, code: &str) -> Result<CodeCheck, AppError>;
}

pub fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000))
}

/// Eight uppercase letters and digits, handed to admins on request.
pub fn generate_access_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(|byte| char::from(byte).to_ascii_uppercase())
        .collect()
}

fn code_key(phone: &str) -> String {
    format!("otp:{phone}")
}

fn attempts_key(phone: &str) -> String {
    format!("otp:{phone}:attempts")
}

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, AppError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

pub struct RedisCodes {
    connection: ConnectionManager,
    ttl: Duration,
    max_attempts: u32,
}

impl RedisCodes {
    pub fn new(connection: ConnectionManager, ttl: Duration, max_attempts: u32) -> Self {
        Self {
            connection,
            ttl,
            max_attempts,
        }
    }
}

#[async_trait]
impl CodeStore for RedisCodes {
    async fn put(&self, phone: &str, code: &str) -> Result<(), AppError> {
        let mut connection = self.connection.clone();

        let _: () = connection
            .set_ex(code_key(phone), code, self.ttl.as_secs())
            .await?;
        let _: () = connection.del(attempts_key(phone)).await?;

        Ok(())
    }

    async fn check(&self, phone: &str, code: &str) -> Result<CodeCheck, AppError> {
        let mut connection = self.connection.clone();

        let stored: Option<String> = connection.get(code_key(phone)).await?;
        let Some(stored) = stored else {
            return Ok(CodeCheck::Missing);
        };

        if stored == code {
            let removed: i64 = connection.del(code_key(phone)).await?;
            let _: () = connection.del(attempts_key(phone)).await?;

            return Ok(if removed == 1 {
                CodeCheck::Valid
            } else {
                CodeCheck::Missing
            });
        }

        let attempts: u32 = connection.incr(attempts_key(phone), 1).await?;
        let _: () = connection
            .expire(attempts_key(phone), self.ttl.as_secs() as i64)
            .await?;

        if attempts >= self.max_attempts {
            let _: () = connection
                .del(&[code_key(phone), attempts_key(phone)])
                .await?;

            return Ok(CodeCheck::Invalid { remaining: 0 });
        }

        Ok(CodeCheck::Invalid {
            remaining: self.max_attempts - attempts,
        })
    }
}

struct PendingCode {
    code: String,
    expires_at: Instant,
    attempts: u32,
}

pub struct MemoryCodes {
    codes: DashMap<String, PendingCode>,
    ttl: Duration,
    max_attempts: u32,
}

impl MemoryCodes {
    pub fn new(ttl: Duration, max_attempts: u32) -> Self {
        Self {
            codes: DashMap::new(),
            ttl,
            max_attempts,
        }
    }
}

#[async_trait]
impl CodeStore for MemoryCodes {
    async fn put(&self, phone: &str, code: &str) -> Result<(), AppError> {
        self.codes.insert(
            phone.to_string(),
            PendingCode {
                code: code.to_string(),
                expires_at: Instant::now() + self.ttl,
                attempts: 0,
            },
        );

        Ok(())
    }

    async fn check(&self, phone: &str, code: &str) -> Result<CodeCheck, AppError> {
        let Entry::Occupied(mut entry) = self.codes.entry(phone.to_string()) else {
            return Ok(CodeCheck::Missing);
        };

        if entry.get().expires_at <= Instant::now() {
            entry.remove();
            return Ok(CodeCheck::Missing);
        }

        if entry.get().code == code {
            entry.remove();
            return Ok(CodeCheck::Valid);
        }

        let attempts = {
            let pending = entry.get_mut();
            pending.attempts += 1;
            pending.attempts
        };

        if attempts >= self.max_attempts {
            entry.remove();
            return Ok(CodeCheck::Invalid { remaining: 0 });
        }

        Ok(CodeCheck::Invalid {
            remaining: self.max_attempts - attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();

            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn access_tokens_are_uppercase_alphanumeric() {
        let token = generate_access_token();

        assert_eq!(token.len(), 8);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[tokio::test]
    async fn code_is_spent_once() {
        let store = MemoryCodes::new(Duration::from_secs(60), 3);
        store.put("9999999999", "012345").await.unwrap();

        assert_eq!(
            store.check("9999999999", "012345").await.unwrap(),
            CodeCheck::Valid
        );
        assert_eq!(
            store.check("9999999999", "012345").await.unwrap(),
            CodeCheck::Missing
        );
    }

    #[tokio::test]
    async fn wrong_guesses_burn_the_code() {
        let store = MemoryCodes::new(Duration::from_secs(60), 3);
        store.put("9999999999", "111111").await.unwrap();

        assert_eq!(
            store.check("9999999999", "000000").await.unwrap(),
            CodeCheck::Invalid { remaining: 2 }
        );
        assert_eq!(
            store.check("9999999999", "000001").await.unwrap(),
            CodeCheck::Invalid { remaining: 1 }
        );
        assert_eq!(
            store.check("9999999999", "000002").await.unwrap(),
            CodeCheck::Invalid { remaining: 0 }
        );
        assert_eq!(
            store.check("9999999999", "111111").await.unwrap(),
            CodeCheck::Missing
        );
    }

    #[tokio::test]
    async fn expired_codes_are_missing() {
        let store = MemoryCodes::new(Duration::ZERO, 3);
        store.put("9999999999", "111111").await.unwrap();

        assert_eq!(
            store.check("9999999999", "111111").await.unwrap(),
            CodeCheck::Missing
        );
    }

    #[tokio::test]
    async fn reissuing_resets_attempts() {
        let store = MemoryCodes::new(Duration::from_secs(60), 2);
        store.put("9999999999", "111111").await.unwrap();
        store.check("9999999999", "000000").await.unwrap();

        store.put("9999999999", "222222").await.unwrap();

        assert_eq!(
            store.check("9999999999", "000000").await.unwrap(),
            CodeCheck::Invalid { remaining: 1 }
        );
    }
}
