use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RequestStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a follow request.
///
/// ```text
/// PENDING → ACCEPTED   (follower edge created in the same transaction)
///         → REJECTED
///         → (deleted)  via cancel
/// ```
///
/// ACCEPTED and REJECTED are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ACCEPTED" => Some(Self::Accepted),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    /// Only PENDING moves, and only into a terminal state.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        *self == Self::Pending && next.is_terminal()
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// A request from `follower_id` to follow `following_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequest {
    pub id: i64,
    pub follower_id: i64,
    pub following_id: i64,
    pub status: RequestStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Columns written by the request store on insert and update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowRequestFields {
    pub follower_id: i64,
    pub following_id: i64,
    pub status: RequestStatus,
}

impl FollowRequestFields {
    pub fn pending(follower_id: i64, following_id: i64) -> Self {
        Self {
            follower_id,
            following_id,
            status: RequestStatus::Pending,
        }
    }
}

/// External view of a request returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequestView {
    pub id: i64,
    pub follower_id: i64,
    pub following_id: i64,
    pub status: RequestStatus,
    pub updated_at: String,
}

impl From<&FollowRequest> for FollowRequestView {
    fn from(r: &FollowRequest) -> Self {
        Self {
            id: r.id,
            follower_id: r.follower_id,
            following_id: r.following_id,
            status: r.status,
            updated_at: r.updated_at.clone(),
        }
    }
}

/// An established "follower_id follows following_id" edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Follower {
    pub id: i64,
    pub follower_id: i64,
    pub following_id: i64,
    pub created_at: String,
}

/// Result of an idempotent edge insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedEdge {
    pub id: i64,
    /// False when the pair already existed.
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Notification category understood by the downstream notification service.
/// Serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NotificationType {
    Message = 0,
    Follow = 1,
    Like = 2,
    Comment = 3,
}

impl From<NotificationType> for u8 {
    fn from(t: NotificationType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for NotificationType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Message),
            1 => Ok(Self::Follow),
            2 => Ok(Self::Like),
            3 => Ok(Self::Comment),
            other => Err(format!("unknown notification type {other}")),
        }
    }
}

/// Outbound notification. Field names match the notification service's
/// wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "UserAuth0ID")]
    pub identity_provider_id: String,
    #[serde(rename = "NotificationType")]
    pub notification_type: NotificationType,
}

impl Notification {
    pub fn follow(message: impl Into<String>, identity_provider_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            identity_provider_id: identity_provider_id.into(),
            notification_type: NotificationType::Follow,
        }
    }
}

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    /// Gave up after `max_attempts`.
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Dead => "DEAD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "DELIVERED" => Some(Self::Delivered),
            "DEAD" => Some(Self::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: i64,
    /// Sent as `X-Message-Id` on every attempt so receivers can drop repeats.
    pub message_id: String,
    pub notification: Notification,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxStats {
    pub pending: u64,
    pub delivered: u64,
    pub dead: u64,
}

// ---------------------------------------------------------------------------
// Outcome: primary result plus side-effect reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideEffectKind {
    FollowerEdge,
    Notification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectStatus {
    Applied,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffect {
    pub kind: SideEffectKind,
    #[serde(flatten)]
    pub status: EffectStatus,
}

impl SideEffect {
    pub fn applied(kind: SideEffectKind) -> Self {
        Self {
            kind,
            status: EffectStatus::Applied,
        }
    }

    pub fn skipped(kind: SideEffectKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            status: EffectStatus::Skipped(reason.into()),
        }
    }

    pub fn failed(kind: SideEffectKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            status: EffectStatus::Failed(reason.into()),
        }
    }
}

/// Result of a mutating engine operation: the primary value plus a report
/// for every side effect that was attempted or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome<T> {
    pub primary: T,
    pub side_effects: Vec<SideEffect>,
}

impl<T> Outcome<T> {
    pub fn new(primary: T) -> Self {
        Self {
            primary,
            side_effects: Vec::new(),
        }
    }

    pub fn with(mut self, effect: SideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }

    pub fn effect(&self, kind: SideEffectKind) -> Option<&SideEffect> {
        self.side_effects.iter().find(|e| e.kind == kind)
    }

    /// True when no side effect failed.
    pub fn is_complete(&self) -> bool {
        !self
            .side_effects
            .iter()
            .any(|e| matches!(e.status, EffectStatus::Failed(_)))
    }
}

// ---------------------------------------------------------------------------
// API request bodies
// ---------------------------------------------------------------------------

/// Body of `POST /requests` and `POST /followers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowPair {
    pub follower_id: i64,
    pub following_id: i64,
}

/// Body of `PUT /requests/{id}`. The ids are optional; when present and
/// non-zero they must match the stored request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUpdate {
    #[serde(default)]
    pub follower_id: Option<i64>,
    #[serde(default)]
    pub following_id: Option<i64>,
    pub status: Option<RequestStatus>,
}

impl RequestUpdate {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}
