use crate::presence::Presence;
use std::{collections::HashSet, sync::Arc};
use sync_api::Event;
use tracing::debug;
use uuid::Uuid;

/// Fans events out to the live connections of their target users.
///
/// Delivery is best effort: nothing is queued for offline users and a closed
/// socket simply drops the event. Callers never see a failure.
#[derive(Clone)]
pub struct EventRouter {
    presence: Arc<Presence>,
}

impl EventRouter {
    pub fn new(presence: Arc<Presence>) -> Self {
        Self { presence }
    }

    /// Push `event` to every connection of every target. Returns how many
    /// connections accepted it.
    pub fn publish(&self, event: &Event, targets: &[Uuid]) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, kind = event.kind(), "failed to encode event");
                return 0;
            }
        };
        let mut seen = HashSet::new();
        let mut delivered = 0;
        for user in targets.iter().filter(|u| seen.insert(**u)) {
            for conn in self.presence.connections_for(user) {
                if conn.send(payload.clone()) {
                    delivered += 1;
                } else {
                    debug!(connection = %conn.id, user = %user, "dropped event for closed connection");
                }
            }
        }
        debug!(kind = event.kind(), targets = seen.len(), delivered, "published");
        delivered
    }
}
