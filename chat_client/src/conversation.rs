use std::collections::HashSet;
use sync_api::{Message, MessageStatus};
use uuid::Uuid;

/// Ordered, id-deduplicated window onto the messages exchanged with one
/// contact. Every mutation is idempotent so the same change may arrive over
/// the socket and as a REST result in either order.
#[derive(Debug, Clone)]
pub struct Conversation {
    me: Uuid,
    contact: Uuid,
    messages: Vec<Message>,
    // ids of locally created entries still waiting for the server's copy
    provisional: HashSet<Uuid>,
}

impl Conversation {
    pub fn new(me: Uuid, contact: Uuid) -> Self {
        Self {
            me,
            contact,
            messages: Vec::new(),
            provisional: HashSet::new(),
        }
    }

    pub fn contact(&self) -> Uuid {
        self.contact
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == *id)
    }

    pub fn is_provisional(&self, id: &Uuid) -> bool {
        self.provisional.contains(id)
    }

    fn belongs(&self, message: &Message) -> bool {
        message.between(self.me, self.contact)
    }

    fn position(&self, id: &Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == *id)
    }

    /// Show a message before the server has confirmed it. It must carry a
    /// `client_ref` so the canonical copy can take its place later.
    pub fn add_provisional(&mut self, message: Message) -> bool {
        if message.client_ref.is_none() || message.sender != self.me {
            return false;
        }
        let id = message.id;
        if self.insert(message) {
            self.provisional.insert(id);
            true
        } else {
            false
        }
    }

    /// Drop a provisional entry whose submission failed.
    pub fn discard_provisional(&mut self, client_ref: &str) -> Option<Message> {
        let pos = self.messages.iter().position(|m| {
            self.provisional.contains(&m.id) && m.client_ref.as_deref() == Some(client_ref)
        })?;
        let removed = self.messages.remove(pos);
        self.provisional.remove(&removed.id);
        Some(removed)
    }

    /// Add a message if it belongs here and is not yet present. A canonical
    /// message replaces the provisional entry with the same `client_ref` in
    /// place. Returns whether anything changed.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.belongs(&message) || self.position(&message.id).is_some() {
            return false;
        }
        if message.sender == self.me {
            if let Some(key) = message.client_ref.as_deref() {
                let pending = self.messages.iter().position(|m| {
                    self.provisional.contains(&m.id) && m.client_ref.as_deref() == Some(key)
                });
                if let Some(pos) = pending {
                    self.provisional.remove(&self.messages[pos].id);
                    self.messages[pos] = message;
                    return true;
                }
            }
        }
        self.messages.push(message);
        true
    }

    /// Apply an edit or reaction change to a message already shown. A copy
    /// older than the one on screen is ignored, so late deliveries cannot
    /// roll an edit back.
    pub fn update(&mut self, message: &Message) -> bool {
        let Some(pos) = self.position(&message.id) else {
            return false;
        };
        let current = &mut self.messages[pos];
        if message.updated_at < current.updated_at {
            return false;
        }
        current.text = message.text.clone();
        current.reaction = message.reaction.clone();
        current.updated_at = message.updated_at;
        true
    }

    pub fn remove(&mut self, id: &Uuid) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.messages.remove(pos);
                self.provisional.remove(id);
                true
            }
            None => false,
        }
    }

    /// Flag every listed message that is present as read. Returns how many
    /// entries changed.
    pub fn mark_read(&mut self, ids: &[Uuid]) -> usize {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        let mut changed = 0;
        for message in self.messages.iter_mut() {
            if ids.contains(&message.id) && message.status != MessageStatus::Read {
                message.status = MessageStatus::Read;
                changed += 1;
            }
        }
        changed
    }

    /// Replace the window with a fresh fetch. Provisional entries the fetch
    /// does not account for are kept at the end.
    pub fn load(&mut self, fetched: Vec<Message>) {
        let confirmed: HashSet<String> = fetched
            .iter()
            .filter(|m| m.sender == self.me)
            .filter_map(|m| m.client_ref.clone())
            .collect();
        let pending: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| self.provisional.contains(&m.id))
            .filter(|m| {
                m.client_ref
                    .as_ref()
                    .map_or(false, |key| !confirmed.contains(key))
            })
            .collect();
        self.provisional = pending.iter().map(|m| m.id).collect();
        for message in fetched {
            if self.belongs(&message) && self.position(&message.id).is_none() {
                self.messages.push(message);
            }
        }
        self.messages.extend(pending);
    }
}
