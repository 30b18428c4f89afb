//! Session endpoint — one long-lived WebSocket per authenticated principal.
//!
//! The handshake carries a bearer credential (an `Authorization` header or a
//! `?token=` query parameter, since browsers cannot set headers on WebSocket
//! upgrades); authentication failure rejects the upgrade. Each session task
//! consumes inbound commands in arrival order and drains its hub-owned
//! outbound queue into the socket.

use std::panic::AssertUnwindSafe;

use axum::{
  extract::{
    Query, State, WebSocketUpgrade,
    ws::{Message, WebSocket},
  },
  http::HeaderMap,
  response::Response,
};
use futures_util::{FutureExt as _, SinkExt as _, StreamExt as _};
use serde::Deserialize;
use sitrep_core::{principal::User, store::IncidentStore};
use uuid::Uuid;

use crate::{
  AppState,
  auth::{bearer_token, resolve_user},
  error::ApiError,
  rt::{
    dispatch,
    hub::{SessionId, room_for},
    protocol::{ClientCommand, ServerEvent},
  },
};

#[derive(Debug, Deserialize)]
pub struct WsParams {
  pub token: Option<String>,
}

/// `GET /ws` — authenticate, then upgrade.
pub async fn ws_handler<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<WsParams>,
  headers: HeaderMap,
  ws: WebSocketUpgrade,
) -> Result<Response, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let token = params
    .token
    .or_else(|| bearer_token(&headers).map(str::to_owned))
    .ok_or(ApiError::AuthMissing)?;
  let user = resolve_user(&state, &token).await?;

  Ok(ws.on_upgrade(move |socket| run_session(state, socket, user)))
}

async fn run_session<S>(state: AppState<S>, socket: WebSocket, user: User)
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let session_id: SessionId = Uuid::new_v4();
  tracing::info!(session = %session_id, user = %user.user_id, "session opened");

  let mut outbound = state.hub.register(session_id);
  let (mut ws_tx, mut ws_rx) = socket.split();

  loop {
    tokio::select! {
      inbound = ws_rx.next() => match inbound {
        Some(Ok(Message::Text(text))) => {
          handle_frame(&state, session_id, &user, &text).await;
        }
        Some(Ok(Message::Close(_))) | None => break,
        // Ping/pong are answered by the transport layer.
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          tracing::debug!(session = %session_id, "socket error: {e}");
          break;
        }
      },

      queued = outbound.recv() => match queued {
        Some(json) => {
          if ws_tx.send(Message::Text(json.into())).await.is_err() {
            break;
          }
        }
        // The hub dropped us (queue overflow); treat as a disconnect.
        None => break,
      },
    }
  }

  disconnect(&state, session_id, &user).await;
  tracing::info!(session = %session_id, "session closed");
}

/// Parse and dispatch one inbound frame. Every failure — malformed JSON, a
/// handler error, even a handler panic — becomes a single `error` event to
/// this session; other sessions never notice.
async fn handle_frame<S>(
  state: &AppState<S>,
  session_id: SessionId,
  user: &User,
  text: &str,
) where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let command: ClientCommand = match serde_json::from_str(text) {
    Ok(command) => command,
    Err(e) => {
      state.hub.send_to(session_id, &ServerEvent::Error {
        code:    "validation".to_owned(),
        message: format!("unrecognized command: {e}"),
      });
      return;
    }
  };

  let outcome =
    AssertUnwindSafe(dispatch::handle(state, session_id, user, command))
      .catch_unwind()
      .await;
  match outcome {
    Ok(Ok(())) => {}
    Ok(Err(err)) => {
      state.hub.send_to(session_id, &ServerEvent::Error {
        code:    err.code().to_owned(),
        message: err.public_message(),
      });
    }
    Err(_) => {
      tracing::error!(session = %session_id, "command handler panicked");
      state.hub.send_to(session_id, &ServerEvent::Error {
        code:    "internal".to_owned(),
        message: "internal error".to_owned(),
      });
    }
  }
}

/// Disconnect cleanup: drop presence in every joined incident and the
/// principal's focus entry, announcing `presence:left` and `focus:cleared`
/// to every room the session was in, then remove the session from the hub.
pub(crate) async fn disconnect<S>(
  state: &AppState<S>,
  session_id: SessionId,
  user: &User,
) where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  state.focus.remove_by_principal(user.user_id);

  match state.store.remove_presence_by_session(session_id).await {
    Ok(entries) => {
      for entry in entries {
        let room = room_for(entry.incident_id);
        state.hub.broadcast(
          &room,
          &ServerEvent::PresenceLeft {
            incident_id: entry.incident_id,
            user_id:     user.user_id,
          },
          Some(session_id),
        );
        state.hub.broadcast(
          &room,
          &ServerEvent::FocusCleared {
            incident_id: entry.incident_id,
            user_id:     user.user_id,
          },
          Some(session_id),
        );
      }
    }
    Err(e) => {
      tracing::error!(session = %session_id, "presence cleanup failed: {e}")
    }
  }

  state.hub.remove_session(session_id);
}

#[cfg(test)]
mod tests {
  use serde_json::Value;
  use sitrep_core::{
    incident::{NewIncident, Severity},
    principal::Role,
  };
  use tokio::sync::mpsc;

  use super::*;
  use crate::{
    rt::protocol::FocusSection,
    test_helpers::{make_state, seed_user},
  };

  fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(json) = rx.try_recv() {
      events.push(serde_json::from_str(&json).unwrap());
    }
    events
  }

  fn named<'a>(events: &'a [Value], name: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["event"] == name).collect()
  }

  #[tokio::test]
  async fn disconnect_cleans_up_every_joined_room() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let roamer = seed_user(&state, "u@example.com", Role::Responder).await;

    let mut incidents = Vec::new();
    for title in ["DB down", "API latency"] {
      let (incident, _) = state
        .store
        .create_incident(NewIncident {
          title:       title.to_owned(),
          description: None,
          severity:    Severity::High,
          created_by:  admin.user_id,
        })
        .await
        .unwrap();
      incidents.push(incident.incident_id);
    }

    // An observer in each room.
    let mut observers = Vec::new();
    for &incident_id in &incidents {
      let observer_session = Uuid::new_v4();
      let rx = state.hub.register(observer_session);
      dispatch::handle(
        &state,
        observer_session,
        &admin,
        ClientCommand::Join(incident_id),
      )
      .await
      .unwrap();
      observers.push(rx);
    }

    // The roamer joins both rooms and focuses the first.
    let roamer_session = Uuid::new_v4();
    let _roamer_rx = state.hub.register(roamer_session);
    for &incident_id in &incidents {
      dispatch::handle(
        &state,
        roamer_session,
        &roamer,
        ClientCommand::Join(incident_id),
      )
      .await
      .unwrap();
    }
    dispatch::handle(
      &state,
      roamer_session,
      &roamer,
      ClientCommand::FocusUpdate {
        incident_id: incidents[0],
        section:     FocusSection::Notes,
        field_id:    None,
      },
    )
    .await
    .unwrap();
    for rx in &mut observers {
      drain(rx);
    }

    // Transport drop.
    disconnect(&state, roamer_session, &roamer).await;

    // Every room the session was in hears both announcements.
    for rx in &mut observers {
      let events = drain(rx);
      assert_eq!(named(&events, "presence:left").len(), 1);
      assert_eq!(named(&events, "focus:cleared").len(), 1);
    }

    // A fresh joiner no longer sees the roamer.
    let fresh_session = Uuid::new_v4();
    let mut fresh_rx = state.hub.register(fresh_session);
    dispatch::handle(
      &state,
      fresh_session,
      &admin,
      ClientCommand::Join(incidents[0]),
    )
    .await
    .unwrap();
    let events = drain(&mut fresh_rx);
    let list = named(&events, "presence:list")[0];
    let entries = list["data"]["entries"].as_array().unwrap();
    assert!(!entries.iter().any(|e| {
      e["user"]["userId"] == roamer.user_id.to_string().as_str()
    }));
  }
}
