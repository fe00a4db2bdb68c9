use crate::db::{now_ms, uuid_col};
use crate::error::{ChatError, ChatResult};
use crate::users;
use rusqlite::{params, Connection, OptionalExtension};
use sync_api::{DeletedMessage, Message, MessageStatus};
use uuid::Uuid;

/// How many surviving messages a delete reports back.
pub const REMAINING_TAIL: usize = 20;

const MSG_COLUMNS: &str =
    "id, sender_id, receiver_id, text, image, status, reaction, client_ref, created_at, updated_at";

fn row_to_msg(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_col(row, 0)?,
        sender: uuid_col(row, 1)?,
        receiver: uuid_col(row, 2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        status: MessageStatus::parse(&row.get::<_, String>(5)?).unwrap_or_default(),
        reaction: row.get(6)?,
        client_ref: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Messages of a conversation page plus the ids the fetch marked as read.
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub messages: Vec<Message>,
    pub newly_read: Vec<Uuid>,
}

pub fn get_message(conn: &Connection, id: &Uuid) -> ChatResult<Option<Message>> {
    let mut stmt = conn.prepare(&format!("SELECT {MSG_COLUMNS} FROM messages WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_msg).optional()?)
}

fn require_message(conn: &Connection, id: &Uuid) -> ChatResult<Message> {
    get_message(conn, id)?.ok_or_else(|| ChatError::NotFound("message_not_found".into()))
}

/// Look up a message by the sender's idempotency token.
pub fn find_by_client_ref(
    conn: &Connection,
    sender: &Uuid,
    client_ref: &str,
) -> ChatResult<Option<Message>> {
    if client_ref.trim().is_empty() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {MSG_COLUMNS} FROM messages WHERE sender_id = ?1 AND client_ref = ?2"
    ))?;
    Ok(stmt
        .query_row(params![sender.to_string(), client_ref], row_to_msg)
        .optional()?)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Outcome of a submission: the stored message and whether it already
/// existed under the sender's `client_ref`.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub message: Message,
    pub replayed: bool,
}

/// Create a new message with status `sent`. A repeated `client_ref` from the
/// same sender returns the message created the first time.
pub fn create_message(
    conn: &Connection,
    sender: &Uuid,
    receiver: &Uuid,
    text: Option<&str>,
    image: Option<&str>,
    client_ref: Option<&str>,
) -> ChatResult<Message> {
    submit_message(conn, sender, receiver, text, image, client_ref).map(|s| s.message)
}

/// Like [`create_message`], but reports whether the `client_ref` was already
/// taken. The insert itself decides, so concurrent retries on different
/// connections all resolve to the one stored row.
pub fn submit_message(
    conn: &Connection,
    sender: &Uuid,
    receiver: &Uuid,
    text: Option<&str>,
    image: Option<&str>,
    client_ref: Option<&str>,
) -> ChatResult<Submitted> {
    let text = non_blank(text);
    let image = non_blank(image);
    if text.is_none() && image.is_none() {
        return Err(ChatError::Validation("empty_message".into()));
    }
    if sender == receiver {
        return Err(ChatError::Validation("cannot_message_self".into()));
    }
    users::require_user(conn, receiver)?;
    let client_ref = non_blank(client_ref);
    let id = Uuid::new_v4();
    let now = now_ms();
    let inserted = conn.execute(
        "INSERT INTO messages (id, sender_id, receiver_id, text, image, status, client_ref, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
         ON CONFLICT(sender_id, client_ref) DO NOTHING",
        params![
            id.to_string(),
            sender.to_string(),
            receiver.to_string(),
            text.unwrap_or_default(),
            image,
            MessageStatus::Sent.as_str(),
            client_ref,
            now
        ],
    )?;
    if inserted == 0 {
        let key = client_ref.unwrap_or_default();
        let existing = find_by_client_ref(conn, sender, key)?.ok_or_else(|| {
            ChatError::Internal(anyhow::anyhow!("client_ref conflict without a stored row"))
        })?;
        return Ok(Submitted {
            message: existing,
            replayed: true,
        });
    }
    Ok(Submitted {
        message: Message {
            id,
            sender: *sender,
            receiver: *receiver,
            text: text.unwrap_or_default().to_string(),
            image: image.map(str::to_string),
            status: MessageStatus::Sent,
            reaction: None,
            client_ref: client_ref.map(str::to_string),
            created_at: now,
            updated_at: now,
        },
        replayed: false,
    })
}

/// Replace the text of a message. Only the sender may edit, and image
/// messages cannot be edited.
pub fn edit_message(
    conn: &Connection,
    caller: &Uuid,
    message_id: &Uuid,
    text: &str,
) -> ChatResult<Message> {
    let msg = require_message(conn, message_id)?;
    if msg.sender != *caller {
        return Err(ChatError::Forbidden("not_sender".into()));
    }
    if msg.image.is_some() {
        return Err(ChatError::Validation("image_message_not_editable".into()));
    }
    if text.trim().is_empty() {
        return Err(ChatError::Validation("empty_message".into()));
    }
    conn.execute(
        "UPDATE messages SET text = ?2, updated_at = ?3 WHERE id = ?1",
        params![message_id.to_string(), text, now_ms()],
    )?;
    require_message(conn, message_id)
}

/// Delete a message. Only the sender may delete. Returns the removed message
/// and the most recent survivors of the pair, oldest first.
pub fn delete_message(
    conn: &Connection,
    caller: &Uuid,
    message_id: &Uuid,
) -> ChatResult<DeletedMessage> {
    let msg = require_message(conn, message_id)?;
    if msg.sender != *caller {
        return Err(ChatError::Forbidden("not_sender".into()));
    }
    conn.execute("DELETE FROM messages WHERE id = ?1", [message_id.to_string()])?;
    let remaining = tail_between(conn, &msg.sender, &msg.receiver, REMAINING_TAIL)?;
    Ok(DeletedMessage {
        message: msg,
        remaining,
    })
}

/// Set or clear the reaction on a message. Either participant may react;
/// repeating the current reaction changes nothing.
pub fn react_to_message(
    conn: &Connection,
    caller: &Uuid,
    message_id: &Uuid,
    reaction: &str,
) -> ChatResult<Message> {
    let msg = require_message(conn, message_id)?;
    if msg.sender != *caller && msg.receiver != *caller {
        return Err(ChatError::Forbidden("not_participant".into()));
    }
    let reaction = non_blank(Some(reaction)).map(str::trim);
    if msg.reaction.as_deref() == reaction {
        return Ok(msg);
    }
    conn.execute(
        "UPDATE messages SET reaction = ?2, updated_at = ?3 WHERE id = ?1",
        params![message_id.to_string(), reaction, now_ms()],
    )?;
    require_message(conn, message_id)
}

/// Mark the given messages as read on behalf of their receiver. Messages not
/// addressed to `caller`, already read, or unknown are skipped silently.
pub fn mark_read(conn: &Connection, caller: &Uuid, ids: &[Uuid]) -> ChatResult<Vec<Message>> {
    let tx = conn.unchecked_transaction()?;
    let mut updated = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if !seen.insert(*id) {
            continue;
        }
        let changed = tx.execute(
            "UPDATE messages SET status = ?3 WHERE id = ?1 AND receiver_id = ?2 AND status <> ?3",
            params![id.to_string(), caller.to_string(), MessageStatus::Read.as_str()],
        )?;
        if changed > 0 {
            updated.push(require_message(&tx, id)?);
        }
    }
    tx.commit()?;
    Ok(updated)
}

/// All messages between `caller` and `contact` in creation order. Messages
/// the contact sent that were still unread are marked read by this fetch.
pub fn list_conversation(
    conn: &Connection,
    caller: &Uuid,
    contact: &Uuid,
) -> ChatResult<ConversationPage> {
    let newly_read = {
        let mut stmt = conn.prepare(
            "SELECT id FROM messages WHERE sender_id = ?1 AND receiver_id = ?2 AND status <> ?3",
        )?;
        let ids = stmt
            .query_map(
                params![contact.to_string(), caller.to_string(), MessageStatus::Read.as_str()],
                |row| uuid_col(row, 0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    if !newly_read.is_empty() {
        mark_read(conn, caller, &newly_read)?;
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {MSG_COLUMNS} FROM messages \
         WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1) \
         ORDER BY created_at, rowid"
    ))?;
    let messages = stmt
        .query_map(params![caller.to_string(), contact.to_string()], row_to_msg)?
        .map(|row| row.map(|m| m.visible_to(*caller)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConversationPage {
        messages,
        newly_read,
    })
}

/// The most recent `limit` messages between a pair, oldest first.
pub fn tail_between(conn: &Connection, a: &Uuid, b: &Uuid, limit: usize) -> ChatResult<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MSG_COLUMNS} FROM messages \
         WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1) \
         ORDER BY created_at DESC, rowid DESC LIMIT ?3"
    ))?;
    let mut msgs = stmt
        .query_map(params![a.to_string(), b.to_string(), limit as i64], row_to_msg)?
        .collect::<Result<Vec<_>, _>>()?;
    msgs.reverse();
    Ok(msgs)
}

/// The most recent surviving message between a pair.
pub fn latest_between(conn: &Connection, a: &Uuid, b: &Uuid) -> ChatResult<Option<Message>> {
    Ok(tail_between(conn, a, b, 1)?.pop())
}
