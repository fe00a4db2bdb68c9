//! Maintains the denormalized "last message" pointer of every contact pair.
//!
//! Each direction of a pair has its own row so a contact list is a single
//! join. A create moves the pointer to the newest message of the pair; edits,
//! reads and deletes only recompute it when the mutated message is the one it
//! currently points at.

use crate::error::ChatResult;
use crate::messages;
use rusqlite::{params, Connection, OptionalExtension};
use sync_api::Message;
use uuid::Uuid;

/// A message mutation the projector reacts to.
#[derive(Debug, Clone, Copy)]
pub enum Mutation<'a> {
    Created(&'a Message),
    /// Edit, reaction or read; the message still exists.
    Changed(&'a Message),
    Deleted(&'a Message),
}

impl<'a> Mutation<'a> {
    fn message(&self) -> &'a Message {
        match self {
            Mutation::Created(m) | Mutation::Changed(m) | Mutation::Deleted(m) => m,
        }
    }
}

/// Resolved last message of `contact` as seen by `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub owner: Uuid,
    pub contact: Uuid,
    pub last_message: Option<Message>,
}

fn pointer(conn: &Connection, owner: &Uuid, contact: &Uuid) -> ChatResult<Option<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT message_id FROM contact_summaries WHERE owner_id = ?1 AND contact_id = ?2",
    )?;
    let raw: Option<Option<String>> = stmt
        .query_row(params![owner.to_string(), contact.to_string()], |row| row.get(0))
        .optional()?;
    Ok(raw.flatten().and_then(|s| Uuid::parse_str(&s).ok()))
}

fn set_pointer(conn: &Connection, owner: &Uuid, contact: &Uuid, id: Option<&Uuid>) -> ChatResult<()> {
    conn.execute(
        "INSERT INTO contact_summaries (owner_id, contact_id, message_id) VALUES (?1, ?2, ?3) \
         ON CONFLICT(owner_id, contact_id) DO UPDATE SET message_id = excluded.message_id",
        params![owner.to_string(), contact.to_string(), id.map(|i| i.to_string())],
    )?;
    Ok(())
}

/// Apply a mutation to both directions of the affected pair and return the
/// resulting summaries.
pub fn project(conn: &Connection, mutation: Mutation<'_>) -> ChatResult<Vec<Summary>> {
    let msg = mutation.message();
    let mut out = Vec::with_capacity(2);
    for (owner, contact) in [(msg.sender, msg.receiver), (msg.receiver, msg.sender)] {
        let current = pointer(conn, &owner, &contact)?;
        let last_message = match mutation {
            // projections of concurrent creates may finish out of order, so
            // the pointer goes to the newest message rather than this one
            Mutation::Created(_) => {
                let latest = messages::latest_between(conn, &owner, &contact)?;
                if latest.as_ref().map(|l| l.id) != current {
                    set_pointer(conn, &owner, &contact, latest.as_ref().map(|l| &l.id))?;
                }
                latest
            }
            Mutation::Changed(m) | Mutation::Deleted(m) if current == Some(m.id) => {
                let latest = messages::latest_between(conn, &owner, &contact)?;
                set_pointer(conn, &owner, &contact, latest.as_ref().map(|l| &l.id))?;
                latest
            }
            _ => match current {
                Some(id) => messages::get_message(conn, &id)?,
                None => None,
            },
        };
        out.push(Summary {
            owner,
            contact,
            last_message,
        });
    }
    Ok(out)
}

/// Recompute both directions of a pair from scratch.
pub fn recompute_pair(conn: &Connection, a: &Uuid, b: &Uuid) -> ChatResult<Option<Message>> {
    let latest = messages::latest_between(conn, a, b)?;
    let id = latest.as_ref().map(|m| &m.id);
    set_pointer(conn, a, b, id)?;
    set_pointer(conn, b, a, id)?;
    Ok(latest)
}

/// Current summary of `contact` for `owner`.
pub fn last_message(conn: &Connection, owner: &Uuid, contact: &Uuid) -> ChatResult<Option<Message>> {
    match pointer(conn, owner, contact)? {
        Some(id) => messages::get_message(conn, &id),
        None => Ok(None),
    }
}
