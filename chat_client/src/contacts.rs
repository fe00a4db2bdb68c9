use sync_api::{ContactEntry, Message, MessageStatus, User};
use uuid::Uuid;

/// Contacts in the order they were added, each with the last message
/// exchanged with it.
#[derive(Debug, Clone)]
pub struct ContactList {
    me: Uuid,
    entries: Vec<ContactEntry>,
}

impl ContactList {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ContactEntry] {
        &self.entries
    }

    pub fn get(&self, id: &Uuid) -> Option<&ContactEntry> {
        self.entries.iter().find(|e| e.user.id == *id)
    }

    fn get_mut(&mut self, id: &Uuid) -> Option<&mut ContactEntry> {
        self.entries.iter_mut().find(|e| e.user.id == *id)
    }

    /// Replace the list with a fresh `GET /contacts` result.
    pub fn load(&mut self, entries: Vec<ContactEntry>) {
        self.entries.clear();
        for entry in entries {
            if self.get(&entry.user.id).is_none() {
                self.entries.push(entry);
            }
        }
    }

    pub fn insert(&mut self, user: User) -> bool {
        if user.id == self.me || self.get(&user.id).is_some() {
            return false;
        }
        self.entries.push(ContactEntry {
            user,
            last_message: None,
        });
        true
    }

    fn peer(&self, message: &Message) -> Option<Uuid> {
        (message.sender == self.me || message.receiver == self.me)
            .then(|| message.peer_of(self.me))
    }

    /// A new message becomes the peer's summary unless the summary already
    /// shows something newer. Seeing it twice is a no-op.
    pub fn on_created(&mut self, message: &Message) -> bool {
        let Some(peer) = self.peer(message) else {
            return false;
        };
        let Some(entry) = self.get_mut(&peer) else {
            return false;
        };
        let replace = match &entry.last_message {
            None => true,
            Some(last) => last.id != message.id && message.created_at >= last.created_at,
        };
        if replace {
            entry.last_message = Some(message.clone());
        }
        replace
    }

    /// Refresh the summary if it shows this very message and the copy is not
    /// older than the one held.
    pub fn on_updated(&mut self, message: &Message) -> bool {
        let Some(peer) = self.peer(message) else {
            return false;
        };
        match self.get_mut(&peer) {
            Some(ContactEntry {
                last_message: Some(last),
                ..
            }) if last.id == message.id && message.updated_at >= last.updated_at => {
                *last = message.clone();
                true
            }
            _ => false,
        }
    }

    /// If the deleted message was the summary, fall back to the newest
    /// survivor of the tail the server sent along.
    pub fn on_deleted(&mut self, message: &Message, remaining: &[Message]) -> bool {
        let me = self.me;
        self.with_summary(message, |entry| {
            let peer = entry.user.id;
            entry.last_message = remaining
                .iter()
                .rev()
                .find(|m| m.id != message.id && m.between(me, peer))
                .cloned();
        })
    }

    pub fn on_read(&mut self, ids: &[Uuid]) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut() {
            if let Some(last) = entry.last_message.as_mut() {
                if ids.contains(&last.id) && last.status != MessageStatus::Read {
                    last.status = MessageStatus::Read;
                    changed += 1;
                }
            }
        }
        changed
    }

    fn with_summary(&mut self, message: &Message, f: impl FnOnce(&mut ContactEntry)) -> bool {
        let Some(peer) = self.peer(message) else {
            return false;
        };
        match self.get_mut(&peer) {
            Some(entry) if entry.last_message.as_ref().map(|m| m.id) == Some(message.id) => {
                f(entry);
                true
            }
            _ => false,
        }
    }
}
