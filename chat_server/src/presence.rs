use parking_lot::Mutex;
use std::collections::HashMap;
use sync_api::Event;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Delivery target for one live socket. Events are queued on an unbounded
/// channel drained by the socket's writer, so pushes never block and keep
/// their publish order.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: Uuid,
    tx: UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new(user_id: Uuid) -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                user_id,
                tx,
            },
            rx,
        )
    }

    /// Queue an already encoded event. Returns false when the socket is gone.
    pub fn send(&self, payload: String) -> bool {
        self.tx.send(payload).is_ok()
    }

    pub fn send_event(&self, event: &Event) -> bool {
        match serde_json::to_string(event) {
            Ok(payload) => self.send(payload),
            Err(e) => {
                tracing::error!(error = %e, kind = event.kind(), "failed to encode event");
                false
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    by_user: HashMap<Uuid, HashMap<ConnectionId, ConnectionHandle>>,
    owner: HashMap<ConnectionId, Uuid>,
}

impl Registry {
    fn online(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.by_user.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Push the current online set to every live connection.
    fn announce(&self) {
        let event = Event::PresenceChanged {
            online: self.online(),
        };
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode presence");
                return;
            }
        };
        for conns in self.by_user.values() {
            for handle in conns.values() {
                let _ = handle.send(payload.clone());
            }
        }
    }
}

/// In-memory map from users to their live connections.
#[derive(Default)]
pub struct Presence {
    inner: Mutex<Registry>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns true if the user transitioned to online.
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let mut guard = self.inner.lock();
        let user_id = handle.user_id;
        guard.owner.insert(handle.id, user_id);
        let conns = guard.by_user.entry(user_id).or_default();
        conns.insert(handle.id, handle);
        let came_online = conns.len() == 1;
        // announced under the lock so every socket sees snapshots in order
        guard.announce();
        came_online
    }

    /// Drop a connection. Returns its user and whether that user is now
    /// offline, or `None` if the connection was not registered.
    pub fn unregister(&self, conn: &ConnectionId) -> Option<(Uuid, bool)> {
        let mut guard = self.inner.lock();
        let user_id = guard.owner.remove(conn)?;
        let went_offline = match guard.by_user.get_mut(&user_id) {
            Some(conns) => {
                conns.remove(conn);
                conns.is_empty()
            }
            None => true,
        };
        if went_offline {
            guard.by_user.remove(&user_id);
        }
        guard.announce();
        Some((user_id, went_offline))
    }

    /// Drop every connection of a user at once. The handles go with them, so
    /// each socket's writer sees its queue end and closes. Returns how many
    /// connections were dropped.
    pub fn disconnect_user(&self, user_id: &Uuid) -> usize {
        let mut guard = self.inner.lock();
        let Some(conns) = guard.by_user.remove(user_id) else {
            return 0;
        };
        for id in conns.keys() {
            guard.owner.remove(id);
        }
        guard.announce();
        conns.len()
    }

    pub fn connections_for(&self, user_id: &Uuid) -> Vec<ConnectionHandle> {
        self.inner
            .lock()
            .by_user
            .get(user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &Uuid) -> bool {
        self.inner.lock().by_user.contains_key(user_id)
    }

    /// Sorted ids of users with at least one live connection.
    pub fn online_users(&self) -> Vec<Uuid> {
        self.inner.lock().online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn next_presence(rx: &mut UnboundedReceiver<String>) -> Vec<Uuid> {
        let raw = rx.try_recv().expect("presence event");
        match serde_json::from_str::<Event>(&raw).unwrap() {
            Event::PresenceChanged { online } => online,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn multi_connection_user_stays_online() {
        let presence = Presence::new();
        let user = Uuid::new_v4();
        let (tab1, mut rx1) = ConnectionHandle::new(user);
        let (tab2, _rx2) = ConnectionHandle::new(user);
        let (id1, id2) = (tab1.id, tab2.id);
        assert!(presence.register(tab1));
        assert_eq!(next_presence(&mut rx1), vec![user]);
        assert!(!presence.register(tab2));
        assert_eq!(presence.connections_for(&user).len(), 2);
        assert_eq!(presence.unregister(&id1), Some((user, false)));
        assert!(presence.is_online(&user));
        assert_eq!(presence.unregister(&id2), Some((user, true)));
        assert!(!presence.is_online(&user));
        assert!(presence.connections_for(&user).is_empty());
        assert_eq!(presence.unregister(&id2), None);
    }

    #[test]
    fn every_change_is_broadcast() {
        let presence = Presence::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (a, mut rx_a) = ConnectionHandle::new(alice);
        let (b, mut rx_b) = ConnectionHandle::new(bob);
        let b_id = b.id;
        presence.register(a);
        assert_eq!(next_presence(&mut rx_a), vec![alice]);
        presence.register(b);
        let mut both = vec![alice, bob];
        both.sort();
        assert_eq!(next_presence(&mut rx_a), both);
        assert_eq!(next_presence(&mut rx_b), both);
        presence.unregister(&b_id);
        assert_eq!(next_presence(&mut rx_a), vec![alice]);
        assert_eq!(presence.online_users(), vec![alice]);
    }

    #[test]
    fn disconnecting_a_user_closes_all_tabs() {
        let presence = Presence::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (tab1, mut rx1) = ConnectionHandle::new(alice);
        let (tab2, mut rx2) = ConnectionHandle::new(alice);
        let (b, mut rx_b) = ConnectionHandle::new(bob);
        let tab1_id = tab1.id;
        presence.register(tab1);
        presence.register(tab2);
        presence.register(b);
        while rx_b.try_recv().is_ok() {}

        assert_eq!(presence.disconnect_user(&alice), 2);
        assert!(!presence.is_online(&alice));
        assert_eq!(next_presence(&mut rx_b), vec![bob]);
        for rx in [&mut rx1, &mut rx2] {
            while rx.try_recv().is_ok() {}
            assert!(matches!(
                rx.try_recv(),
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
            ));
        }
        // the socket's own cleanup afterwards finds nothing left
        assert_eq!(presence.unregister(&tab1_id), None);
        assert_eq!(presence.disconnect_user(&alice), 0);
    }

    #[test]
    fn concurrent_register_unregister() {
        let presence = Arc::new(Presence::new());
        let user = Uuid::new_v4();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let presence = presence.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let (handle, _rx) = ConnectionHandle::new(user);
                        let id = handle.id;
                        presence.register(handle);
                        presence.unregister(&id);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(!presence.is_online(&user));
        assert!(presence.online_users().is_empty());
    }
}
