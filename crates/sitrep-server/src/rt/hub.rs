//! Room hub — session registry, room membership, and broadcast.
//!
//! Rooms are identified by `incident:{incident_id}`. Each session owns a
//! bounded outbound queue; the hub never blocks on delivery. Broadcast
//! snapshots the subscriber set under the lock and delivers outside it, so
//! slow sends cannot stall subscription changes.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::rt::protocol::ServerEvent;

pub type SessionId = Uuid;

/// Outbound queue bound per session. A session that falls this far behind
/// is dropped and treated as disconnected.
pub const OUTBOUND_QUEUE: usize = 64;

/// The room name for an incident's broadcasts.
pub fn room_for(incident_id: Uuid) -> String {
  format!("incident:{incident_id}")
}

#[derive(Default)]
struct HubInner {
  senders:       HashMap<SessionId, mpsc::Sender<String>>,
  rooms:         HashMap<String, HashSet<SessionId>>,
  /// Reverse index for O(1) disconnect cleanup.
  session_rooms: HashMap<SessionId, HashSet<String>>,
}

/// Tracks which sessions are subscribed to which rooms and fans events out.
#[derive(Default)]
pub struct RoomHub {
  inner: RwLock<HubInner>,
}

impl RoomHub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a session and hand back the receiving half of its outbound
  /// queue; the session loop drains it into the socket.
  pub fn register(&self, session: SessionId) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    self.inner.write().senders.insert(session, tx);
    rx
  }

  pub fn subscribe(&self, session: SessionId, room: &str) {
    let mut inner = self.inner.write();
    if !inner.senders.contains_key(&session) {
      return;
    }
    inner.rooms.entry(room.to_owned()).or_default().insert(session);
    inner
      .session_rooms
      .entry(session)
      .or_default()
      .insert(room.to_owned());
  }

  pub fn unsubscribe(&self, session: SessionId, room: &str) {
    let mut inner = self.inner.write();
    let emptied = match inner.rooms.get_mut(room) {
      Some(members) => {
        members.remove(&session);
        members.is_empty()
      }
      None => false,
    };
    if emptied {
      inner.rooms.remove(room);
    }
    if let Some(rooms) = inner.session_rooms.get_mut(&session) {
      rooms.remove(room);
    }
  }

  /// Drop a session from every room it is in, returning those rooms.
  pub fn remove_session(&self, session: SessionId) -> Vec<String> {
    let mut inner = self.inner.write();
    inner.senders.remove(&session);
    let rooms = inner.session_rooms.remove(&session).unwrap_or_default();
    for room in &rooms {
      let emptied = match inner.rooms.get_mut(room) {
        Some(members) => {
          members.remove(&session);
          members.is_empty()
        }
        None => false,
      };
      if emptied {
        inner.rooms.remove(room);
      }
    }
    rooms.into_iter().collect()
  }

  /// Deliver `event` to every session subscribed to `room`, except
  /// `exclude`. Within one room, events reach each subscriber's queue in the
  /// order the hub processed them.
  pub fn broadcast(
    &self,
    room: &str,
    event: &ServerEvent,
    exclude: Option<SessionId>,
  ) {
    let Some(payload) = encode(event) else { return };

    // Snapshot under the read lock; deliver outside it.
    let targets: Vec<(SessionId, mpsc::Sender<String>)> = {
      let inner = self.inner.read();
      let Some(members) = inner.rooms.get(room) else { return };
      members
        .iter()
        .filter(|id| Some(**id) != exclude)
        .filter_map(|id| inner.senders.get(id).map(|tx| (*id, tx.clone())))
        .collect()
    };

    let mut dropped = Vec::new();
    for (id, tx) in targets {
      if tx.try_send(payload.clone()).is_err() {
        dropped.push(id);
      }
    }
    for id in dropped {
      tracing::warn!(session = %id, "outbound queue overflow; dropping session");
      self.remove_session(id);
    }
  }

  /// Targeted delivery (initial presence/focus lists, error events).
  pub fn send_to(&self, session: SessionId, event: &ServerEvent) {
    let Some(payload) = encode(event) else { return };
    let tx = self.inner.read().senders.get(&session).cloned();
    if let Some(tx) = tx
      && tx.try_send(payload).is_err()
    {
      tracing::warn!(session = %session, "outbound queue overflow; dropping session");
      self.remove_session(session);
    }
  }
}

fn encode(event: &ServerEvent) -> Option<String> {
  match serde_json::to_string(event) {
    Ok(payload) => Some(payload),
    Err(e) => {
      tracing::error!("event serialization failed: {e}");
      None
    }
  }
}
