use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Approved,
    Feed,
    PaperTrail,
    Quarantine,
    Blocked,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Approved => "approved",
            Bucket::Feed => "feed",
            Bucket::PaperTrail => "paper_trail",
            Bucket::Quarantine => "quarantine",
            Bucket::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Bucket::Approved),
            "feed" => Some(Bucket::Feed),
            "paper_trail" => Some(Bucket::PaperTrail),
            "quarantine" => Some(Bucket::Quarantine),
            "blocked" => Some(Bucket::Blocked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub is_me: bool,
    pub is_default_identity: bool,
    pub bucket: Option<Bucket>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContactRole {
    From,
    To,
    Cc,
    Bcc,
}

impl ContactRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactRole::From => "from",
            ContactRole::To => "to",
            ContactRole::Cc => "cc",
            ContactRole::Bcc => "bcc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "from" => Some(ContactRole::From),
            "to" => Some(ContactRole::To),
            "cc" => Some(ContactRole::Cc),
            "bcc" => Some(ContactRole::Bcc),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadContactRole {
    Sender,
    Recipient,
}

impl ThreadContactRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadContactRole::Sender => "sender",
            ThreadContactRole::Recipient => "recipient",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub subject: String,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub reply_later_at: Option<DateTime<Utc>>,
    pub set_aside_at: Option<DateTime<Utc>>,
    pub folder_id: String,
    pub trashed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Draft,
    Queued,
    Sent,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Draft => "draft",
            MessageStatus::Queued => "queued",
            MessageStatus::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(MessageStatus::Received),
            "draft" => Some(MessageStatus::Draft),
            "queued" => Some(MessageStatus::Queued),
            "sent" => Some(MessageStatus::Sent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub thread_id: Option<i64>,
    pub sender_id: i64,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub subject: String,
    pub content_text: String,
    pub content_html: Option<String>,
    pub headers: serde_json::Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub folder: String,
    pub queued_at: Option<DateTime<Utc>>,
    pub send_attempts: i64,
    pub last_send_attempt_at: Option<DateTime<Utc>>,
    pub last_send_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub file_path: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionType {
    DeleteThread,
    MoveToFolder,
    MarkRead,
    AddToReplyLater,
    AddToSetAside,
}

impl RuleActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleActionType::DeleteThread => "delete_thread",
            RuleActionType::MoveToFolder => "move_to_folder",
            RuleActionType::MarkRead => "mark_read",
            RuleActionType::AddToReplyLater => "add_to_reply_later",
            RuleActionType::AddToSetAside => "add_to_set_aside",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delete_thread" => Some(RuleActionType::DeleteThread),
            "move_to_folder" => Some(RuleActionType::MoveToFolder),
            "mark_read" => Some(RuleActionType::MarkRead),
            "add_to_reply_later" => Some(RuleActionType::AddToReplyLater),
            "add_to_set_aside" => Some(RuleActionType::AddToSetAside),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub conditions: crate::rules::ConditionGroup,
    pub action_type: RuleActionType,
    pub action_config: Option<serde_json::Value>,
    pub folder_ids: Vec<String>,
    pub position: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleApplicationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RuleApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleApplicationStatus::Pending => "pending",
            RuleApplicationStatus::Running => "running",
            RuleApplicationStatus::Completed => "completed",
            RuleApplicationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RuleApplicationStatus::Pending),
            "running" => Some(RuleApplicationStatus::Running),
            "completed" => Some(RuleApplicationStatus::Completed),
            "failed" => Some(RuleApplicationStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleApplication {
    pub id: i64,
    pub rule_id: Option<i64>,
    pub status: RuleApplicationStatus,
    pub total_count: i64,
    pub processed_count: i64,
    pub matched_count: i64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Send-queue backoff schedule (spec.md 4.F): 1m, 5m, 15m, 1h, 4h.
pub const SEND_BACKOFF_SECONDS: [i64; 5] = [60, 300, 900, 3600, 14400];
pub const SEND_MAX_ATTEMPTS: i64 = 5;
