use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a message. Variant order follows the lifecycle so a
/// status can only ever move forward via `max`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

/// Sound choices a user can pick for incoming and outgoing messages.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sound {
    Notification,
    Notification2,
    Sending,
    Sending2,
}

impl Sound {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sound::Notification => "notification",
            Sound::Notification2 => "notification2",
            Sound::Sending => "sending",
            Sound::Sending2 => "sending2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "notification" => Some(Sound::Notification),
            "notification2" => Some(Sound::Notification2),
            "sending" => Some(Sound::Sending),
            "sending2" => Some(Sound::Sending2),
            _ => None,
        }
    }
}

/// Public profile of a user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub muted: bool,
    pub notification_sound: Sound,
    pub sending_sound: Sound,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender: Uuid,
    pub receiver: Uuid,
    pub text: String,
    #[serde(default)]
    pub image: Option<String>,
    pub status: MessageStatus,
    #[serde(default)]
    pub reaction: Option<String>,
    /// Client generated token used to match an optimistic entry with the
    /// stored message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    /// True when the message was exchanged between `a` and `b`, in either
    /// direction.
    pub fn between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }

    /// The other participant as seen from `me`.
    pub fn peer_of(&self, me: Uuid) -> Uuid {
        if self.sender == me {
            self.receiver
        } else {
            self.sender
        }
    }

    /// The message as `viewer` may see it. `client_ref` belongs to the
    /// sender's client and is dropped for anyone else.
    pub fn visible_to(mut self, viewer: Uuid) -> Message {
        if viewer != self.sender {
            self.client_ref = None;
        }
        self
    }
}

/// A contact together with the last message exchanged with it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ContactEntry {
    #[serde(flatten)]
    pub user: User,
    pub last_message: Option<Message>,
}

/// Result of a delete: the removed message and the tail of what is left
/// between the pair, oldest first.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DeletedMessage {
    pub message: Message,
    pub remaining: Vec<Message>,
}

/// Events pushed from the server to live connections.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum Event {
    Hello {
        user_id: Uuid,
        connection_id: Uuid,
    },
    ContactCreated {
        contact: User,
    },
    MessageCreated {
        message: Message,
        sender: User,
        receiver: User,
    },
    MessageUpdated {
        message: Message,
        sender: User,
    },
    MessageDeleted {
        message: Message,
        sender: User,
        remaining: Vec<Message>,
    },
    MessagesRead {
        reader: Uuid,
        ids: Vec<Uuid>,
    },
    Typing {
        sender: Uuid,
        receiver: Uuid,
        draft_len: usize,
    },
    PresenceChanged {
        online: Vec<Uuid>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Hello { .. } => "hello",
            Event::ContactCreated { .. } => "contact-created",
            Event::MessageCreated { .. } => "message-created",
            Event::MessageUpdated { .. } => "message-updated",
            Event::MessageDeleted { .. } => "message-deleted",
            Event::MessagesRead { .. } => "messages-read",
            Event::Typing { .. } => "typing",
            Event::PresenceChanged { .. } => "presence-changed",
        }
    }
}

/// Frames a client may send over its socket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum ClientFrame {
    Typing { receiver: Uuid, draft_len: usize },
    Ping,
}

/// Uniform error body returned by every failing REST call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreateMessageReq {
    pub receiver: Uuid,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EditMessageReq {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReactionReq {
    pub message_id: Uuid,
    pub reaction: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MarkReadReq {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateContactReq {
    pub email: String,
}

/// Partial profile update. Absent fields are left untouched and fields not
/// listed here are ignored.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProfilePatch {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub notification_sound: Option<Sound>,
    #[serde(default)]
    pub sending_sound: Option<Sound>,
}
