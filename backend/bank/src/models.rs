use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ModelError;

/// Lowercase string enums stored as TEXT columns and sent as JSON strings.
macro_rules! string_enum {
    ($(#[$attr:meta])* $name:ident, $kind:literal, {
        $($(#[$variant_attr:meta])* $variant:ident => $text:literal),+ $(,)?
    }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        $(#[$attr])*
        pub enum $name {
            $($(#[$variant_attr])* $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ModelError::UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(Role, "role", {
    Client => "client",
    Lawyer => "lawyer",
    Admin => "admin",
});

string_enum!(#[derive(Default)] Plan, "plan", {
    #[default]
    Free => "free",
    Silver => "silver",
    Gold => "gold",
    Diamond => "diamond",
});

string_enum!(VerificationStatus, "verification status", {
    Unverified => "unverified",
    Pending => "pending",
    Verified => "verified",
    Rejected => "rejected",
});

string_enum!(ConnectionStatus, "connection status", {
    Pending => "pending",
    Active => "active",
    Rejected => "rejected",
});

string_enum!(AppointmentStatus, "appointment status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Completed => "completed",
});

string_enum!(PostKind, "post type", {
    Text => "text",
    Reel => "reel",
});

string_enum!(EventKind, "event type", {
    Meeting => "meeting",
    Hearing => "hearing",
    Deadline => "deadline",
    Reminder => "reminder",
});

string_enum!(EventStatus, "event status", {
    Scheduled => "scheduled",
    Completed => "completed",
    Cancelled => "cancelled",
});

string_enum!(PaymentStatus, "payment status", {
    Success => "success",
    Failed => "failed",
});

impl ConnectionStatus {
    pub fn transition(self, to: ConnectionStatus) -> Result<ConnectionStatus, ModelError> {
        use ConnectionStatus::*;

        match (self, to) {
            (Pending, Active) | (Pending, Rejected) | (Rejected, Pending) => Ok(to),
            _ => Err(ModelError::InvalidTransition {
                kind: "connection",
                from: self.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

impl AppointmentStatus {
    pub fn transition(self, to: AppointmentStatus) -> Result<AppointmentStatus, ModelError> {
        use AppointmentStatus::*;

        match (self, to) {
            (Pending, Confirmed | Rejected | Cancelled) | (Confirmed, Completed | Cancelled) => {
                Ok(to)
            }
            _ => Err(ModelError::InvalidTransition {
                kind: "appointment",
                from: self.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    pub location: String,
    pub specialization: String,
    /// Years of practice, lawyers only.
    pub experience: i64,
    /// Consultation fee in rupees, lawyers only.
    pub fee: i64,
    pub about: String,
    pub plan: Plan,
    pub verified: bool,
    pub verification_status: VerificationStatus,
    pub resume: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Public slice of a user embedded in other responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: Uuid,
    pub title: String,
    pub desc: String,
    pub field: String,
    pub location: String,
    pub budget: String,
    pub posted_by: Uuid,
    pub posted_at: DateTime<Utc>,
    pub accepted_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Case {
    pub fn is_open(&self) -> bool {
        self.accepted_by.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: Uuid,
    pub client_id: Uuid,
    pub lawyer_id: Uuid,
    pub status: ConnectionStatus,
    pub initiated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A connection as seen from one side: the other party plus the link state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionView {
    pub connection_id: Uuid,
    pub status: ConnectionStatus,
    pub initiated_by: Uuid,
    pub profile: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub lawyer_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "slot_format")]
    pub slot: NaiveTime,
    pub notes: String,
    pub status: AppointmentStatus,
    pub meeting_link: Option<String>,
    pub client_name: Option<String>,
    pub lawyer_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub client_id: Uuid,
    pub lawyer_id: Uuid,
    pub sender_id: Uuid,
    /// Role of the sender within the pair.
    pub sender: Role,
    pub text: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub user: UserSummary,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub author: UserSummary,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: PostKind,
    pub media_url: Option<String>,
    pub likes: Vec<Uuid>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
    pub count: i64,
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parties {
    #[serde(default)]
    pub party_a: String,
    #[serde(default)]
    pub party_b: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    /// Markdown body.
    pub content: String,
    pub parties: Parties,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: String,
    pub payment_id: String,
    pub user_id: Uuid,
    /// Rupees.
    pub amount: i64,
    pub plan: Plan,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// A message left through the public contact form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inquiry {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: CalendarStatus,
    pub lawyer_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub notes: String,
    pub is_appointment: bool,
}

/// Custom events carry their own status; appointments shown on the calendar
/// keep the appointment's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CalendarStatus {
    Event(EventStatus),
    Appointment(AppointmentStatus),
}

impl CalendarStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarStatus::Event(status) => status.as_str(),
            CalendarStatus::Appointment(status) => status.as_str(),
        }
    }
}

/// Slots travel as `HH:MM`, matching the booking widget.
pub mod slot_format {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(slot: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&slot.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;

        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_parse_their_own_text() {
        assert_eq!("lawyer".parse::<Role>(), Ok(Role::Lawyer));
        assert_eq!("diamond".parse::<Plan>(), Ok(Plan::Diamond));
        assert_eq!(AppointmentStatus::Cancelled.to_string(), "cancelled");
        assert!(matches!(
            "judge".parse::<Role>(),
            Err(ModelError::UnknownVariant { kind: "role", .. })
        ));
    }

    #[test]
    fn connection_transitions() {
        use ConnectionStatus::*;

        assert_eq!(Pending.transition(Active), Ok(Active));
        assert_eq!(Pending.transition(Rejected), Ok(Rejected));
        assert_eq!(Rejected.transition(Pending), Ok(Pending));

        assert!(Active.transition(Pending).is_err());
        assert!(Active.transition(Rejected).is_err());
        assert!(Rejected.transition(Active).is_err());
        assert!(Pending.transition(Pending).is_err());
    }

    #[test]
    fn appointment_transitions() {
        use AppointmentStatus::*;

        assert_eq!(Pending.transition(Confirmed), Ok(Confirmed));
        assert_eq!(Confirmed.transition(Completed), Ok(Completed));
        assert_eq!(Confirmed.transition(Cancelled), Ok(Cancelled));

        assert!(Pending.transition(Completed).is_err());
        assert!(Rejected.transition(Confirmed).is_err());
        assert!(Completed.transition(Cancelled).is_err());
        assert!(Cancelled.transition(Pending).is_err());
    }

    #[test]
    fn plans_default_to_free() {
        assert_eq!(Plan::default(), Plan::Free);
    }

    #[test]
    fn calendar_status_is_a_plain_string() {
        let confirmed = CalendarStatus::Appointment(AppointmentStatus::Confirmed);
        let scheduled = CalendarStatus::Event(EventStatus::Scheduled);

        assert_eq!(serde_json::to_string(&confirmed).unwrap(), r#""confirmed""#);
        assert_eq!(serde_json::to_string(&scheduled).unwrap(), r#""scheduled""#);
        assert_eq!(
            serde_json::from_str::<CalendarStatus>(r#""pending""#).unwrap(),
            CalendarStatus::Appointment(AppointmentStatus::Pending)
        );
    }

    #[test]
    fn slot_serializes_as_hours_and_minutes() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(with = "slot_format")]
            slot: NaiveTime,
        }

        let parsed: Wrapper = serde_json::from_str(r#"{"slot":"09:30"}"#).unwrap();
        assert_eq!(parsed.slot, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#"{"slot":"09:30"}"#);

        assert!(serde_json::from_str::<Wrapper>(r#"{"slot":"half past nine"}"#).is_err());
    }
}
