use crate::{contacts::ContactList, conversation::Conversation};
use std::collections::HashSet;
use sync_api::{ContactEntry, DeletedMessage, Event, Message, MessageStatus};
use tracing::{debug, warn};
use uuid::Uuid;

/// Session state of one signed-in client. Push events and REST results run
/// through the same merge rules, so it does not matter which arrives first
/// or whether both do.
#[derive(Debug, Clone)]
pub struct Reconciler {
    me: Uuid,
    contacts: ContactList,
    active: Option<Conversation>,
    online: HashSet<Uuid>,
    contact_typing: bool,
}

impl Reconciler {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            contacts: ContactList::new(me),
            active: None,
            online: HashSet::new(),
            contact_typing: false,
        }
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn contacts(&self) -> &ContactList {
        &self.contacts
    }

    pub fn active_contact(&self) -> Option<Uuid> {
        self.active.as_ref().map(Conversation::contact)
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    /// Messages of the open conversation, in arrival order.
    pub fn messages(&self) -> &[Message] {
        self.active
            .as_ref()
            .map(Conversation::messages)
            .unwrap_or(&[])
    }

    pub fn is_online(&self, user: &Uuid) -> bool {
        self.online.contains(user)
    }

    /// Whether the open contact is currently typing to us.
    pub fn contact_typing(&self) -> bool {
        self.contact_typing
    }

    /// Open the conversation with `contact`. The window starts empty until
    /// `load` is called with the fetched history.
    pub fn select(&mut self, contact: Uuid) {
        if self.active_contact() == Some(contact) {
            return;
        }
        self.active = Some(Conversation::new(self.me, contact));
        self.contact_typing = false;
    }

    /// Replace the open window with a fresh fetch. This is also how events
    /// lost while offline are recovered.
    pub fn load(&mut self, messages: Vec<Message>) {
        if let Some(conv) = self.active.as_mut() {
            conv.load(messages);
        }
    }

    pub fn load_contacts(&mut self, entries: Vec<ContactEntry>) {
        self.contacts.load(entries);
    }

    /// Show a message right away while its `POST /message` is in flight.
    /// Returns `None` when no conversation is open.
    pub fn submit(&mut self, text: &str, client_ref: &str, now: i64) -> Option<Message> {
        let conv = self.active.as_mut()?;
        let message = Message {
            id: Uuid::new_v4(),
            sender: self.me,
            receiver: conv.contact(),
            text: text.into(),
            image: None,
            status: MessageStatus::Sent,
            reaction: None,
            client_ref: Some(client_ref.into()),
            created_at: now,
            updated_at: now,
        };
        conv.add_provisional(message.clone()).then_some(message)
    }

    /// The submission behind `client_ref` failed; take it off screen.
    pub fn submit_failed(&mut self, client_ref: &str) -> Option<Message> {
        self.active.as_mut()?.discard_provisional(client_ref)
    }

    pub fn apply_created(&mut self, message: Message) -> bool {
        let mut changed = self.contacts.on_created(&message);
        if let Some(conv) = self.active.as_mut() {
            changed |= conv.insert(message);
        }
        changed
    }

    pub fn apply_updated(&mut self, message: &Message) -> bool {
        let mut changed = self.contacts.on_updated(message);
        if let Some(conv) = self.active.as_mut() {
            changed |= conv.update(message);
        }
        changed
    }

    pub fn apply_deleted(&mut self, deleted: &DeletedMessage) -> bool {
        let mut changed = self
            .contacts
            .on_deleted(&deleted.message, &deleted.remaining);
        if let Some(conv) = self.active.as_mut() {
            changed |= conv.remove(&deleted.message.id);
        }
        changed
    }

    pub fn apply_read(&mut self, ids: &[Uuid]) -> bool {
        let mut changed = self.contacts.on_read(ids) > 0;
        if let Some(conv) = self.active.as_mut() {
            changed |= conv.mark_read(ids) > 0;
        }
        changed
    }

    /// Decode a text frame from the socket and apply it. Frames that do not
    /// parse are logged and dropped.
    pub fn apply_frame(&mut self, text: &str) -> bool {
        match serde_json::from_str::<Event>(text) {
            Ok(event) => self.apply(&event),
            Err(e) => {
                warn!(error = %e, "ignoring undecodable frame");
                false
            }
        }
    }

    /// Fold one push event into the session. Returns whether visible state
    /// changed.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::Hello { user_id, .. } => {
                if *user_id != self.me {
                    debug!(%user_id, me = %self.me, "hello for another user");
                }
                false
            }
            Event::ContactCreated { contact } => self.contacts.insert(contact.clone()),
            Event::MessageCreated { message, .. } => {
                let from_contact = Some(message.sender) == self.active_contact()
                    && message.receiver == self.me;
                let mut changed = self.apply_created(message.clone());
                if from_contact && self.contact_typing {
                    self.contact_typing = false;
                    changed = true;
                }
                changed
            }
            Event::MessageUpdated { message, .. } => self.apply_updated(message),
            Event::MessageDeleted {
                message, remaining, ..
            } => self.apply_deleted(&DeletedMessage {
                message: message.clone(),
                remaining: remaining.clone(),
            }),
            Event::MessagesRead { ids, .. } => self.apply_read(ids),
            Event::Typing {
                sender,
                receiver,
                draft_len,
            } => {
                if *receiver != self.me || Some(*sender) != self.active_contact() {
                    return false;
                }
                let typing = *draft_len > 0;
                let changed = typing != self.contact_typing;
                self.contact_typing = typing;
                changed
            }
            Event::PresenceChanged { online } => {
                let next: HashSet<Uuid> = online.iter().copied().collect();
                let changed = next != self.online;
                self.online = next;
                changed
            }
        }
    }
}
