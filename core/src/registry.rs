// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;

use classdeck_protocol::EndpointId;
use classdeck_protocol::ServerEvent;
use classdeck_protocol::SessionCode;
use tokio::sync::mpsc;

/// Size of the bounded per-endpoint outbound channels. 128 events of
/// head-room is plenty for an interactive classroom.
pub const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
}

/// One attached endpoint. Membership here is authoritative for fan-out; the
/// session document's `students` map is authoritative for identity.
#[derive(Clone)]
pub struct Member {
    pub id: EndpointId,
    pub role: Role,
    pub name: String,
    tx: mpsc::Sender<ServerEvent>,
}

impl Member {
    /// Deliver one event; a gone receiver just means the endpoint already
    /// dropped, which detach will observe shortly.
    pub async fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// Maps each session code to its currently connected endpoints.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<SessionCode, Vec<Member>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(
        &self,
        code: &SessionCode,
        id: EndpointId,
        role: Role,
        name: &str,
        tx: mpsc::Sender<ServerEvent>,
    ) {
        let mut rooms = self.rooms.lock().unwrap();
        let members = rooms.entry(code.clone()).or_default();
        members.retain(|m| m.id != id);
        members.push(Member {
            id,
            role,
            name: name.to_string(),
            tx,
        });
    }

    /// Remove the endpoint from whichever room holds it.
    pub fn detach(&self, id: EndpointId) -> Option<(SessionCode, Member)> {
        let mut rooms = self.rooms.lock().unwrap();
        let mut found = None;
        for (code, members) in rooms.iter_mut() {
            if let Some(pos) = members.iter().position(|m| m.id == id) {
                found = Some((code.clone(), members.remove(pos)));
                break;
            }
        }
        if let Some((code, _)) = &found
            && rooms.get(code).is_some_and(Vec::is_empty)
        {
            rooms.remove(code);
        }
        found
    }

    /// Drop a whole room, returning its former members.
    pub fn remove_room(&self, code: &SessionCode) -> Vec<Member> {
        self.rooms.lock().unwrap().remove(code).unwrap_or_default()
    }

    fn members(&self, code: &SessionCode) -> Vec<Member> {
        self.rooms
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .unwrap_or_default()
    }

    pub fn role_members(&self, code: &SessionCode, role: Role) -> Vec<Member> {
        self.members(code)
            .into_iter()
            .filter(|m| m.role == role)
            .collect()
    }

    pub fn has_role(&self, code: &SessionCode, role: Role) -> bool {
        self.rooms
            .lock()
            .unwrap()
            .get(code)
            .is_some_and(|members| members.iter().any(|m| m.role == role))
    }

    pub fn room_size(&self, code: &SessionCode) -> usize {
        self.rooms
            .lock()
            .unwrap()
            .get(code)
            .map_or(0, Vec::len)
    }

    /// Enqueue `event` on every member of the room. Senders are cloned out
    /// of the lock first so no await happens under it.
    pub async fn broadcast(&self, code: &SessionCode, event: &ServerEvent) {
        for member in self.members(code) {
            member.send(event.clone()).await;
        }
    }

    /// Room-wide except the originating endpoint (`user-joined`/`user-left`).
    pub async fn broadcast_except(
        &self,
        code: &SessionCode,
        except: EndpointId,
        event: &ServerEvent,
    ) {
        for member in self.members(code) {
            if member.id != except {
                member.send(event.clone()).await;
            }
        }
    }

    /// Targeted emission, e.g. teacher-only summary updates.
    pub async fn send_to_role(&self, code: &SessionCode, role: Role, event: &ServerEvent) {
        for member in self.role_members(code, role) {
            member.send(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classdeck_protocol::ErrorEvent;
    use pretty_assertions::assert_eq;

    fn event(message: &str) -> ServerEvent {
        ServerEvent::Error(ErrorEvent {
            message: message.to_string(),
        })
    }

    fn code() -> SessionCode {
        "abcdef".parse().unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, mut rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        registry.attach(&code(), EndpointId::new(), Role::Student, "Alice", tx_a);
        registry.attach(&code(), EndpointId::new(), Role::Teacher, "Ms. T", tx_b);

        registry.broadcast(&code(), &event("hello")).await;

        assert_eq!(rx_a.recv().await, Some(event("hello")));
        assert_eq!(rx_b.recv().await, Some(event("hello")));
    }

    #[tokio::test]
    async fn send_to_role_skips_students() {
        let registry = RoomRegistry::new();
        let (tx_student, mut rx_student) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_teacher, mut rx_teacher) = mpsc::channel(CHANNEL_CAPACITY);
        registry.attach(&code(), EndpointId::new(), Role::Student, "Alice", tx_student);
        registry.attach(&code(), EndpointId::new(), Role::Teacher, "Ms. T", tx_teacher);

        registry
            .send_to_role(&code(), Role::Teacher, &event("teachers only"))
            .await;

        assert_eq!(rx_teacher.recv().await, Some(event("teachers only")));
        assert!(rx_student.try_recv().is_err());
    }

    #[tokio::test]
    async fn detach_empties_the_room() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::channel(CHANNEL_CAPACITY);
        let id = EndpointId::new();
        registry.attach(&code(), id, Role::Student, "Alice", tx);
        assert_eq!(registry.room_size(&code()), 1);

        let (room, member) = registry.detach(id).unwrap();
        assert_eq!(room, code());
        assert_eq!(member.name, "Alice");
        assert_eq!(registry.room_size(&code()), 0);
        assert!(registry.detach(id).is_none());
    }

    #[tokio::test]
    async fn reattach_replaces_stale_entry() {
        let registry = RoomRegistry::new();
        let (tx1, _rx1) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx2, _rx2) = mpsc::channel(CHANNEL_CAPACITY);
        let id = EndpointId::new();
        registry.attach(&code(), id, Role::Student, "Alice", tx1);
        registry.attach(&code(), id, Role::Student, "Alice", tx2);
        assert_eq!(registry.room_size(&code()), 1);
    }
}
