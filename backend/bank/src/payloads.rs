//! Request and response bodies. Field names follow the dashboards' camelCase.
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AppointmentStatus, ConnectionStatus, EventKind, EventStatus, Parties, Plan, PostKind, Role,
    User, slot_format,
};

#[derive(Debug, Deserialize)]
pub struct SendOtp {
    pub phone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_otp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtp {
    pub phone: String,
    pub otp: String,
    pub role: Option<Role>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OtpVerified {
    pub user: User,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterUser {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Client
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub q: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub specialization: Option<String>,
    pub experience: Option<i64>,
    pub fee: Option<i64>,
    pub about: Option<String>,
    pub plan: Option<Plan>,
    pub resume: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LawyerSearch {
    pub q: Option<String>,
    pub specialization: Option<String>,
    pub location: Option<String>,
    pub verified_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCase {
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub budget: String,
    pub posted_by: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseQuery {
    pub posted_by: Option<Uuid>,
    pub open: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptCase {
    pub lawyer_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConnection {
    pub client_id: Uuid,
    pub lawyer_id: Uuid,
    pub initiated_by: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub status: ConnectionStatus,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionFilter {
    #[default]
    Active,
    Pending,
    All,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionQuery {
    pub user_id: Uuid,
    #[serde(default)]
    pub status: ConnectionFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub client_id: Uuid,
    pub lawyer_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "slot_format")]
    pub slot: NaiveTime,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentQuery {
    pub user_id: Uuid,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentUpdate {
    pub status: AppointmentStatus,
    pub meeting_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookedSlotsQuery {
    pub lawyer_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub client_id: Option<Uuid>,
    pub lawyer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub text: String,
    pub client_id: Uuid,
    pub lawyer_id: Uuid,
    pub sender_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    /// The other participant; only their messages are marked.
    pub chat_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub success: bool,
    pub updated: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: EventKind,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub lawyer_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub user_id: Uuid,
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: Option<EventKind>,
}

#[derive(Debug, Deserialize)]
pub struct EventStatusUpdate {
    pub status: EventStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub author_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default = "default_post_kind")]
    pub kind: PostKind,
    pub media_url: Option<String>,
}

fn default_post_kind() -> PostKind {
    PostKind::Text
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikePost {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub user_id: Uuid,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct NewTopic {
    pub name: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "Legal".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgreement {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub parties: Parties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPayment {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub user_id: Uuid,
    pub amount: i64,
    pub plan: Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug, Deserialize)]
pub struct LawyerDecision {
    pub status: Decision,
}

#[derive(Debug, Serialize)]
pub struct LawyerVerdict {
    pub message: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessIssued {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Acknowledged {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct AdminStats {
    pub users: i64,
    pub pending: i64,
    pub revenue: i64,
}
