use crate::db::{now_ms, uuid_col};
use crate::error::{ChatError, ChatResult};
use crate::messages;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use sync_api::{ContactEntry, ProfilePatch, Sound, User};
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

const USER_COLUMNS: &str = "id, email, first_name, last_name, bio, avatar, muted, notification_sound, sending_sound, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let sound = |idx: usize, fallback: Sound| -> rusqlite::Result<Sound> {
        Ok(Sound::parse(&row.get::<_, String>(idx)?).unwrap_or(fallback))
    };
    Ok(User {
        id: uuid_col(row, 0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        bio: row.get(4)?,
        avatar: row.get(5)?,
        muted: row.get::<_, i64>(6)? != 0,
        notification_sound: sound(7, Sound::Notification)?,
        sending_sound: sound(8, Sound::Sending)?,
        created_at: row.get(9)?,
    })
}

fn normalize_email(email: &str) -> ChatResult<String> {
    let email = email.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) {
        return Err(ChatError::Validation("invalid_email".into()));
    }
    Ok(email)
}

pub fn get_user(conn: &Connection, id: &Uuid) -> ChatResult<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_user).optional()?)
}

/// Fetch a user or fail with `NotFound`.
pub fn require_user(conn: &Connection, id: &Uuid) -> ChatResult<User> {
    get_user(conn, id)?.ok_or_else(|| ChatError::NotFound("user_not_found".into()))
}

pub fn find_by_email(conn: &Connection, email: &str) -> ChatResult<Option<User>> {
    let email = normalize_email(email)?;
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"))?;
    Ok(stmt.query_row([email], row_to_user).optional()?)
}

/// Create the user record on first login, or return the existing one.
pub fn ensure_user(conn: &Connection, id: &Uuid, email: &str) -> ChatResult<User> {
    if let Some(user) = get_user(conn, id)? {
        return Ok(user);
    }
    let email = normalize_email(email)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
        params![id.to_string(), email, now_ms()],
    )?;
    if inserted == 0 {
        // lost a race against a concurrent first request, or the email is taken
        return get_user(conn, id)?.ok_or_else(|| ChatError::Conflict("email_taken".into()));
    }
    tracing::info!(user_id = %id, "created user on first login");
    require_user(conn, id)
}

pub fn are_contacts(conn: &Connection, a: &Uuid, b: &Uuid) -> ChatResult<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM contacts WHERE user_id = ?1 AND contact_id = ?2")?;
    let exists: Option<i64> = stmt
        .query_row(params![a.to_string(), b.to_string()], |row| row.get(0))
        .optional()?;
    Ok(exists.is_some())
}

/// Add a symmetric contact edge between the requester and the user owning
/// `email`. Both directions, and their empty summaries, are written in one
/// transaction.
pub fn create_contact(conn: &Connection, requester: &Uuid, email: &str) -> ChatResult<User> {
    let requester_user = require_user(conn, requester)?;
    let contact = find_by_email(conn, email)?
        .ok_or_else(|| ChatError::NotFound("user_not_found".into()))?;
    if contact.id == requester_user.id {
        return Err(ChatError::Validation("cannot_add_self".into()));
    }
    let tx = conn.unchecked_transaction()?;
    if are_contacts(&tx, requester, &contact.id)? {
        return Err(ChatError::Conflict("contact_exists".into()));
    }
    let now = now_ms();
    for (owner, other) in [(requester, &contact.id), (&contact.id, requester)] {
        tx.execute(
            "INSERT INTO contacts (user_id, contact_id, created_at) VALUES (?1, ?2, ?3)",
            params![owner.to_string(), other.to_string(), now],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => {
                ChatError::Conflict("contact_exists".into())
            }
            _ => e.into(),
        })?;
        tx.execute(
            "INSERT OR IGNORE INTO contact_summaries (owner_id, contact_id, message_id) VALUES (?1, ?2, NULL)",
            params![owner.to_string(), other.to_string()],
        )?;
    }
    tx.commit()?;
    // messages may predate the edge
    crate::summary::recompute_pair(conn, requester, &contact.id)?;
    Ok(contact)
}

/// Contacts of a user in the order they were added, each with its last message.
pub fn list_contacts(conn: &Connection, user: &Uuid) -> ChatResult<Vec<ContactEntry>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.bio, u.avatar, u.muted, u.notification_sound, u.sending_sound, u.created_at, s.message_id \
         FROM contacts c JOIN users u ON u.id = c.contact_id \
         LEFT JOIN contact_summaries s ON s.owner_id = c.user_id AND s.contact_id = c.contact_id \
         WHERE c.user_id = ?1 ORDER BY c.created_at, u.email",
    )?;
    let rows = stmt
        .query_map([user.to_string()], |row| {
            let last: Option<String> = row.get(10)?;
            Ok((row_to_user(row)?, last))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (contact, last) in rows {
        let last_message = match last.and_then(|s| Uuid::parse_str(&s).ok()) {
            Some(id) => messages::get_message(conn, &id)?.map(|m| m.visible_to(*user)),
            None => None,
        };
        out.push(ContactEntry {
            user: contact,
            last_message,
        });
    }
    Ok(out)
}

/// Ids of every contact of a user.
pub fn contact_ids(conn: &Connection, user: &Uuid) -> ChatResult<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT contact_id FROM contacts WHERE user_id = ?1")?;
    let ids = stmt
        .query_map([user.to_string()], |row| uuid_col(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn update_profile(conn: &Connection, user: &Uuid, patch: &ProfilePatch) -> ChatResult<User> {
    let changed = conn.execute(
        "UPDATE users SET \
           first_name = COALESCE(?2, first_name), \
           last_name = COALESCE(?3, last_name), \
           bio = COALESCE(?4, bio), \
           avatar = COALESCE(?5, avatar), \
           muted = COALESCE(?6, muted), \
           notification_sound = COALESCE(?7, notification_sound), \
           sending_sound = COALESCE(?8, sending_sound) \
         WHERE id = ?1",
        params![
            user.to_string(),
            patch.first_name,
            patch.last_name,
            patch.bio,
            patch.avatar,
            patch.muted.map(i64::from),
            patch.notification_sound.map(|s| s.as_str()),
            patch.sending_sound.map(|s| s.as_str()),
        ],
    )?;
    if changed == 0 {
        return Err(ChatError::NotFound("user_not_found".into()));
    }
    require_user(conn, user)
}

/// Remove a user, both directions of every contact edge, summaries naming the
/// user and every message the user authored. Returns the former contacts.
pub fn delete_account(conn: &Connection, user: &Uuid) -> ChatResult<Vec<Uuid>> {
    require_user(conn, user)?;
    let former = contact_ids(conn, user)?;
    let tx = conn.unchecked_transaction()?;
    let id = user.to_string();
    tx.execute("DELETE FROM contacts WHERE user_id = ?1 OR contact_id = ?1", [&id])?;
    tx.execute(
        "DELETE FROM contact_summaries WHERE owner_id = ?1 OR contact_id = ?1",
        [&id],
    )?;
    tx.execute("DELETE FROM messages WHERE sender_id = ?1", [&id])?;
    tx.execute("DELETE FROM users WHERE id = ?1", [&id])?;
    tx.commit()?;
    tracing::info!(user_id = %user, contacts = former.len(), "deleted account");
    Ok(former)
}
