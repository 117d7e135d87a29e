//! # Meilisearch
//!
//! Lawyer directory search, proxied through the backend.
//!
//!
//!
//! ## Schema
//! - Index for all lawyers
//! - Fields: id (**string**), name, specialization, location, about (**string**),
//!   experience, fee (**int**), verified (**bool**)
//!
//!
//!
//! ## Sync
//! - Full upsert of every lawyer at startup
//! - Single upsert whenever a lawyer registers, edits their profile or is
//!   verified/rejected by an admin
//! - Request-path upserts are fire and forget; the database stays the source of
//!   truth and search results are re-read from it
//!
//!
//!
//! ## Fallback
//! Without `MEILI_URL` the lawyer search runs as SQL `LIKE` filters with the same
//! response shape.
//!
//!
//!
//! ## Commands
//!
//! Grab relevant keys.
//! ```sh
//! curl -H "Authorization: Bearer $(cat /run/secrets/MEILI_MASTER_KEY)" http://localhost:7700/keys
//! ```
use std::sync::Arc;

use bank::{
    models::{Role, User},
    payloads::LawyerSearch,
};
use meilisearch_sdk::{
    client::Client,
    settings::{MinWordSizeForTypos, Settings, TypoToleranceSettings},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;

pub const LAWYER_INDEX: &str = "lawyers";
pub const LAWYER_ID: &str = "id";
pub const LAWYER_NAME: &str = "name";
pub const LAWYER_SPECIALIZATION: &str = "specialization";
pub const LAWYER_LOCATION: &str = "location";
pub const LAWYER_ABOUT: &str = "about";
pub const LAWYER_EXPERIENCE: &str = "experience";
pub const LAWYER_FEE: &str = "fee";
pub const LAWYER_VERIFIED: &str = "verified";

pub const SEARCH_LIMIT: usize = 50;

#[derive(Serialize, Deserialize)]
pub struct MeiliLawyer {
    pub id: Uuid,
    pub name: String,
    pub specialization: String,
    pub location: String,
    pub about: String,
    pub experience: i64,
    pub fee: i64,
    pub verified: bool,
}

impl From<&User> for MeiliLawyer {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            specialization: user.specialization.clone(),
            location: user.location.clone(),
            about: user.about.clone(),
            experience: user.experience,
            fee: user.fee,
            verified: user.verified,
        }
    }
}

#[derive(Clone)]
pub struct LawyerIndex {
    client: Arc<Client>,
}

impl LawyerIndex {
    pub async fn init(meili_url: &str, meili_key: Option<&str>) -> Result<Self, AppError> {
        let client = Arc::new(Client::new(meili_url, meili_key)?);

        client
            .index(LAWYER_INDEX)
            .set_settings(&init_settings())
            .await?
            .wait_for_completion(&client, None, None)
            .await?;

        Ok(Self { client })
    }

    /// Blocks until Meilisearch has applied the batch.
    pub async fn sync_all(&self, lawyers: &[User]) -> Result<(), AppError> {
        let documents = to_documents(lawyers);

        let _result = self
            .client
            .index(LAWYER_INDEX)
            .add_or_update(&documents, Some(LAWYER_ID))
            .await?
            .wait_for_completion(&self.client, None, None)
            .await?;

        #[cfg(feature = "verbose")]
        info!("Meili task result: {:?}", _result);

        info!("Indexed {} lawyers", documents.len());

        Ok(())
    }

    /// Enqueues the upsert without waiting; failures are only logged.
    pub async fn upsert(&self, user: &User) {
        if user.role != Role::Lawyer {
            return;
        }

        let documents = [MeiliLawyer::from(user)];

        if let Err(e) = self
            .client
            .index(LAWYER_INDEX)
            .add_or_update(&documents, Some(LAWYER_ID))
            .await
        {
            warn!("Failed to index lawyer {}: {e}", user.id);
        }
    }

    /// Matching lawyer ids in relevance order.
    pub async fn search(&self, query: &LawyerSearch) -> Result<Vec<Uuid>, AppError> {
        let index = self.client.index(LAWYER_INDEX);
        let filter = build_filter(query);
        let text = query.q.as_deref().unwrap_or_default();

        let mut search = index.search();
        search.with_query(text).with_limit(SEARCH_LIMIT);

        if let Some(filter) = filter.as_deref() {
            search.with_filter(filter);
        }

        let results = search.execute::<MeiliLawyer>().await?;

        Ok(results.hits.into_iter().map(|hit| hit.result.id).collect())
    }
}

fn to_documents(lawyers: &[User]) -> Vec<MeiliLawyer> {
    lawyers
        .iter()
        .filter(|user| user.role == Role::Lawyer)
        .map(MeiliLawyer::from)
        .collect()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.trim().replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn build_filter(query: &LawyerSearch) -> Option<String> {
    let mut clauses = Vec::new();

    if let Some(specialization) = query.specialization.as_deref().filter(|s| !s.trim().is_empty()) {
        clauses.push(format!("{LAWYER_SPECIALIZATION} = {}", quote(specialization)));
    }

    if let Some(location) = query.location.as_deref().filter(|s| !s.trim().is_empty()) {
        clauses.push(format!("{LAWYER_LOCATION} = {}", quote(location)));
    }

    if query.verified_only.unwrap_or(false) {
        clauses.push(format!("{LAWYER_VERIFIED} = true"));
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

fn init_settings() -> Settings {
    Settings::new()
        .with_ranking_rules([
            "words",
            "typo",
            "proximity",
            "exactness",
            "attribute",
            "sort",
        ])
        .with_filterable_attributes([LAWYER_SPECIALIZATION, LAWYER_LOCATION, LAWYER_VERIFIED])
        .with_searchable_attributes([
            LAWYER_NAME,
            LAWYER_SPECIALIZATION,
            LAWYER_LOCATION,
            LAWYER_ABOUT,
        ])
        .with_sortable_attributes([LAWYER_EXPERIENCE, LAWYER_FEE])
        .with_typo_tolerance(TypoToleranceSettings {
            enabled: Some(true),
            disable_on_attributes: None,
            disable_on_words: None,
            min_word_size_for_typos: Some(MinWordSizeForTypos {
                one_typo: Some(5),
                two_typos: Some(9),
            }),
        })
}
