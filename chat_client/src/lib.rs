//! Client-side view state for the pair chat: folds push events and REST
//! results into one consistent picture of the open conversation and the
//! contact list.

pub mod contacts;
pub mod conversation;
pub mod reconciler;
pub mod typing;

pub use contacts::ContactList;
pub use conversation::Conversation;
pub use reconciler::Reconciler;
pub use typing::TypingDebounce;
