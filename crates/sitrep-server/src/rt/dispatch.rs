//! Command dispatcher — every inbound command runs the same pipeline:
//! authorize, validate, persist, broadcast. Broadcasts happen strictly after
//! the store call returns, so subscribers never see unpersisted state.

use sitrep_core::{
  policy::{Action, authorize},
  principal::User,
  store::IncidentStore,
};
use uuid::Uuid;

use crate::{
  AppState,
  error::{ApiError, classify},
  rt::{
    focus::{FocusOutcome, color_for},
    hub::{SessionId, room_for},
    protocol::{
      ClientCommand, FocusSection, MutationPayload, PresenceInfo, ServerEvent,
    },
  },
};

/// Route one command to its handler. An `Err` is delivered to the
/// originating session only; the session stays open.
pub async fn handle<S>(
  state: &AppState<S>,
  session: SessionId,
  user: &User,
  command: ClientCommand,
) -> Result<(), ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  match command {
    ClientCommand::Join(incident_id) => {
      join(state, session, user, incident_id).await
    }

    ClientCommand::Leave(incident_id) => {
      leave(state, session, user, incident_id).await
    }

    ClientCommand::Heartbeat => {
      state.store.heartbeat_presence(session).await.map_err(classify)
    }

    ClientCommand::FocusUpdate { incident_id, section, field_id } => {
      focus_update(state, session, user, incident_id, section, field_id);
      Ok(())
    }

    ClientCommand::FocusClear { incident_id } => {
      if state
        .focus
        .clear_for_incident(user.user_id, incident_id)
        .is_some()
      {
        state.hub.broadcast(
          &room_for(incident_id),
          &ServerEvent::FocusCleared { incident_id, user_id: user.user_id },
          Some(session),
        );
      }
      Ok(())
    }

    ClientCommand::UpdateStatus { incident_id, status } => {
      authorize(user.role, Action::IncidentUpdate).map_err(classify)?;
      let (incident, update) = state
        .store
        .update_status(incident_id, status, user.user_id)
        .await
        .map_err(classify)?;
      state.hub.broadcast(
        &room_for(incident_id),
        &ServerEvent::IncidentUpdated(MutationPayload { incident, update }),
        None,
      );
      Ok(())
    }

    ClientCommand::AddNote { incident_id, text } => {
      authorize(user.role, Action::IncidentNote).map_err(classify)?;
      let (incident, update) = state
        .store
        .add_note(incident_id, user.user_id, text)
        .await
        .map_err(classify)?;
      state.hub.broadcast(
        &room_for(incident_id),
        &ServerEvent::NoteAdded(MutationPayload { incident, update }),
        None,
      );
      Ok(())
    }

    ClientCommand::Assign { incident_id, target_user_id } => {
      authorize(user.role, Action::IncidentAssign).map_err(classify)?;
      let (incident, update) = state
        .store
        .assign_user(incident_id, target_user_id, user.user_id)
        .await
        .map_err(classify)?;
      state.hub.broadcast(
        &room_for(incident_id),
        &ServerEvent::Assigned(MutationPayload { incident, update }),
        None,
      );
      Ok(())
    }

    ClientCommand::Unassign { incident_id, target_user_id } => {
      authorize(user.role, Action::IncidentAssign).map_err(classify)?;
      let (incident, update) = state
        .store
        .unassign_user(incident_id, target_user_id, user.user_id)
        .await
        .map_err(classify)?;
      state.hub.broadcast(
        &room_for(incident_id),
        &ServerEvent::Assigned(MutationPayload { incident, update }),
        None,
      );
      Ok(())
    }

    ClientCommand::AddActionItem { incident_id, text } => {
      authorize(user.role, Action::IncidentActionItem).map_err(classify)?;
      let (incident, update) = state
        .store
        .add_action_item(incident_id, user.user_id, text)
        .await
        .map_err(classify)?;
      state.hub.broadcast(
        &room_for(incident_id),
        &ServerEvent::ActionItemAdded(MutationPayload { incident, update }),
        None,
      );
      Ok(())
    }

    ClientCommand::ToggleActionItem { incident_id: _, update_id, completed } => {
      authorize(user.role, Action::IncidentActionItem).map_err(classify)?;
      let (incident, update) = state
        .store
        .toggle_action_item(update_id, completed)
        .await
        .map_err(classify)?;
      // Broadcast to the room the update actually belongs to; the payload's
      // incidentId is a client hint, not authority.
      state.hub.broadcast(
        &room_for(update.incident_id),
        &ServerEvent::ActionItemToggled(MutationPayload { incident, update }),
        None,
      );
      Ok(())
    }
  }
}

/// Join protocol: subscribe, upsert presence, announce to the room
/// (sender-excluded), then unicast the full presence and focus lists.
async fn join<S>(
  state: &AppState<S>,
  session: SessionId,
  user: &User,
  incident_id: Uuid,
) -> Result<(), ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  state
    .store
    .get_incident(incident_id)
    .await
    .map_err(classify)?
    .ok_or_else(|| {
      ApiError::NotFound(format!("incident {incident_id} not found"))
    })?;

  let room = room_for(incident_id);
  state.hub.subscribe(session, &room);

  let entry = state
    .store
    .upsert_presence(user.user_id, incident_id, session)
    .await
    .map_err(classify)?;

  state.hub.broadcast(
    &room,
    &ServerEvent::PresenceJoined {
      incident_id,
      entry: PresenceInfo {
        user:           user.clone(),
        color:          color_for(user.user_id),
        last_active_at: entry.last_active_at,
      },
    },
    Some(session),
  );

  let entries: Vec<PresenceInfo> = state
    .store
    .list_presence(incident_id)
    .await
    .map_err(classify)?
    .into_iter()
    .map(|(entry, user)| PresenceInfo {
      color:          color_for(user.user_id),
      user,
      last_active_at: entry.last_active_at,
    })
    .collect();
  state
    .hub
    .send_to(session, &ServerEvent::PresenceList { incident_id, entries });

  state.hub.send_to(
    session,
    &ServerEvent::FocusList {
      incident_id,
      entries: state.focus.list_for_incident(incident_id),
    },
  );

  Ok(())
}

async fn leave<S>(
  state: &AppState<S>,
  session: SessionId,
  user: &User,
  incident_id: Uuid,
) -> Result<(), ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let removed = state
    .store
    .remove_presence(user.user_id, incident_id)
    .await
    .map_err(classify)?;
  if removed.is_some() {
    state.hub.broadcast(
      &room_for(incident_id),
      &ServerEvent::PresenceLeft { incident_id, user_id: user.user_id },
      Some(session),
    );
  }

  if state
    .focus
    .clear_for_incident(user.user_id, incident_id)
    .is_some()
  {
    state.hub.broadcast(
      &room_for(incident_id),
      &ServerEvent::FocusCleared { incident_id, user_id: user.user_id },
      Some(session),
    );
  }

  state.hub.unsubscribe(session, &room_for(incident_id));
  Ok(())
}

fn focus_update<S>(
  state: &AppState<S>,
  session: SessionId,
  user: &User,
  incident_id: Uuid,
  section: FocusSection,
  field_id: Option<String>,
) where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  match state
    .focus
    .update(user.user_id, session, incident_id, section, field_id)
  {
    // Throttled updates are dropped silently.
    FocusOutcome::Throttled => {}
    FocusOutcome::Updated { entry, displaced } => {
      if let Some(prev) = displaced {
        state.hub.broadcast(
          &room_for(prev.incident_id),
          &ServerEvent::FocusCleared {
            incident_id: prev.incident_id,
            user_id:     user.user_id,
          },
          Some(session),
        );
      }
      state.hub.broadcast(
        &room_for(incident_id),
        &ServerEvent::FocusUpdated { entry },
        Some(session),
      );
    }
  }
}

// ─── Scenario tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use serde_json::Value;
  use sitrep_core::{
    incident::{NewIncident, Severity, Status},
    principal::Role,
  };
  use sitrep_store_sqlite::SqliteStore;
  use tokio::sync::mpsc;

  use super::*;
  use crate::test_helpers::{make_state, seed_user};

  type State = AppState<SqliteStore>;

  fn open_session(state: &State) -> (SessionId, mpsc::Receiver<String>) {
    let id = Uuid::new_v4();
    let rx = state.hub.register(id);
    (id, rx)
  }

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

  async fn seeded_incident(state: &State, creator: Uuid) -> Uuid {
    let (incident, _) = state
      .store
      .create_incident(NewIncident {
        title:       "DB down".to_owned(),
        description: None,
        severity:    Severity::High,
        created_by:  creator,
      })
      .await
      .unwrap();
    incident.incident_id
  }

  #[tokio::test]
  async fn join_sends_presence_list_including_self() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;

    let (session, mut rx) = open_session(&state);
    handle(&state, session, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();

    let events = drain(&mut rx);
    let lists = named(&events, "presence:list");
    assert_eq!(lists.len(), 1);
    let entries = lists[0]["data"]["entries"].as_array().unwrap();
    assert!(entries.iter().any(|e| {
      e["user"]["userId"] == admin.user_id.to_string().as_str()
    }));
    assert_eq!(named(&events, "focus:list").len(), 1);
    // Nobody else in the room: no join echo back to the joiner.
    assert!(named(&events, "presence:joined").is_empty());
  }

  #[tokio::test]
  async fn join_of_unknown_incident_is_not_found() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let (session, _rx) = open_session(&state);

    let err = handle(&state, session, &admin, ClientCommand::Join(Uuid::new_v4()))
      .await
      .unwrap_err();
    assert_eq!(err.code(), "not_found");
  }

  #[tokio::test]
  async fn two_user_resolution() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let responder = seed_user(&state, "b@example.com", Role::Responder).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;

    let (session_a, mut rx_a) = open_session(&state);
    handle(&state, session_a, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    drain(&mut rx_a);

    // B joins: A hears about it (with the incident id); B gets the list
    // containing both.
    let (session_b, mut rx_b) = open_session(&state);
    handle(&state, session_b, &responder, ClientCommand::Join(incident_id))
      .await
      .unwrap();

    let a_events = drain(&mut rx_a);
    let joins = named(&a_events, "presence:joined");
    assert_eq!(joins.len(), 1);
    assert_eq!(
      joins[0]["data"]["incidentId"],
      incident_id.to_string().as_str()
    );
    assert_eq!(
      joins[0]["data"]["entry"]["user"]["userId"],
      responder.user_id.to_string().as_str()
    );

    let b_events = drain(&mut rx_b);
    let list = named(&b_events, "presence:list")[0];
    assert_eq!(list["data"]["entries"].as_array().unwrap().len(), 2);

    // B advances the incident; both sides see the confirmed mutation.
    handle(
      &state,
      session_b,
      &responder,
      ClientCommand::UpdateStatus { incident_id, status: Status::Identified },
    )
    .await
    .unwrap();
    for rx in [&mut rx_a, &mut rx_b] {
      let events = drain(rx);
      let updated = named(&events, "incident:updated");
      assert_eq!(updated.len(), 1);
      assert_eq!(updated[0]["data"]["incident"]["status"], "identified");
      assert_eq!(
        updated[0]["data"]["update"]["content"]["newStatus"],
        "identified"
      );
    }

    handle(
      &state,
      session_b,
      &responder,
      ClientCommand::AddNote {
        incident_id,
        text: "  traced to replica lag  ".to_owned(),
      },
    )
    .await
    .unwrap();
    for rx in [&mut rx_a, &mut rx_b] {
      let events = drain(rx);
      let noted = named(&events, "incident:noteAdded");
      assert_eq!(noted.len(), 1);
      assert_eq!(
        noted[0]["data"]["update"]["content"]["text"],
        "traced to replica lag"
      );
    }

    handle(
      &state,
      session_b,
      &responder,
      ClientCommand::UpdateStatus { incident_id, status: Status::Resolved },
    )
    .await
    .unwrap();
    for rx in [&mut rx_a, &mut rx_b] {
      let events = drain(rx);
      assert_eq!(named(&events, "incident:updated").len(), 1);
    }

    let persisted =
      state.store.get_incident(incident_id).await.unwrap().unwrap();
    assert_eq!(persisted.status, Status::Resolved);
    assert!(persisted.resolved_at.is_some());

    // Audit log: seed, identified, note, resolved — in order.
    let updates = state.store.list_updates(incident_id).await.unwrap();
    let kinds: Vec<&str> =
      updates.iter().map(|u| u.content.discriminant()).collect();
    assert_eq!(
      kinds,
      ["status_change", "status_change", "note", "status_change"]
    );
  }

  #[tokio::test]
  async fn illegal_transition_errors_the_sender_only() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let responder = seed_user(&state, "b@example.com", Role::Responder).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;
    state
      .store
      .update_status(incident_id, Status::Resolved, admin.user_id)
      .await
      .unwrap();

    let (session_a, mut rx_a) = open_session(&state);
    handle(&state, session_a, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    let (session_b, mut rx_b) = open_session(&state);
    handle(&state, session_b, &responder, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    drain(&mut rx_a);
    drain(&mut rx_b);

    let err = handle(
      &state,
      session_b,
      &responder,
      ClientCommand::UpdateStatus { incident_id, status: Status::Monitoring },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "conflict");

    // No broadcast reached anyone; the persisted status is untouched.
    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_b).is_empty());
    let persisted =
      state.store.get_incident(incident_id).await.unwrap().unwrap();
    assert_eq!(persisted.status, Status::Resolved);
  }

  #[tokio::test]
  async fn viewer_writes_are_rejected_before_touching_state() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let viewer = seed_user(&state, "v@example.com", Role::Viewer).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;

    let (session_a, mut rx_a) = open_session(&state);
    handle(&state, session_a, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    let (session_v, mut rx_v) = open_session(&state);
    handle(&state, session_v, &viewer, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    drain(&mut rx_a);
    drain(&mut rx_v);

    let err = handle(
      &state,
      session_v,
      &viewer,
      ClientCommand::AddNote { incident_id, text: "hi".to_owned() },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "forbidden");

    assert!(drain(&mut rx_a).is_empty());
    assert_eq!(state.store.list_updates(incident_id).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn duplicate_assign_conflicts_and_leaves_the_set_unchanged() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let responder = seed_user(&state, "r@example.com", Role::Responder).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;

    let (session_a, mut rx_a) = open_session(&state);
    handle(&state, session_a, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    drain(&mut rx_a);

    handle(
      &state,
      session_a,
      &admin,
      ClientCommand::Assign { incident_id, target_user_id: responder.user_id },
    )
    .await
    .unwrap();
    let events = drain(&mut rx_a);
    let assigned = named(&events, "incident:assigned");
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0]["data"]["update"]["content"]["action"], "assigned");

    let err = handle(
      &state,
      session_a,
      &admin,
      ClientCommand::Assign { incident_id, target_user_id: responder.user_id },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "conflict");
    assert!(drain(&mut rx_a).is_empty());

    let persisted =
      state.store.get_incident(incident_id).await.unwrap().unwrap();
    assert_eq!(persisted.assignees, vec![responder.user_id]);
  }

  #[tokio::test]
  async fn action_items_round_trip_over_the_stream() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;

    let (session, mut rx) = open_session(&state);
    handle(&state, session, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    drain(&mut rx);

    handle(
      &state,
      session,
      &admin,
      ClientCommand::AddActionItem {
        incident_id,
        text: "rotate creds".to_owned(),
      },
    )
    .await
    .unwrap();
    let events = drain(&mut rx);
    let added = named(&events, "incident:actionItemAdded");
    assert_eq!(added[0]["data"]["update"]["content"]["completed"], false);
    let update_id: Uuid = added[0]["data"]["update"]["updateId"]
      .as_str()
      .unwrap()
      .parse()
      .unwrap();

    handle(
      &state,
      session,
      &admin,
      ClientCommand::ToggleActionItem { incident_id, update_id, completed: true },
    )
    .await
    .unwrap();
    let events = drain(&mut rx);
    let toggled = named(&events, "incident:actionItemToggled");
    assert_eq!(toggled[0]["data"]["update"]["content"]["completed"], true);
  }

  #[tokio::test]
  async fn focus_updates_throttle_and_clear_broadcasts_once() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let responder = seed_user(&state, "b@example.com", Role::Responder).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;

    let (session_a, mut rx_a) = open_session(&state);
    handle(&state, session_a, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    let (session_b, _rx_b) = open_session(&state);
    handle(&state, session_b, &responder, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    drain(&mut rx_a);

    // Five rapid focus moves from B: observers see only the first.
    for section in [
      FocusSection::Status,
      FocusSection::Severity,
      FocusSection::Notes,
      FocusSection::Assignees,
      FocusSection::Commander,
    ] {
      handle(
        &state,
        session_b,
        &responder,
        ClientCommand::FocusUpdate { incident_id, section, field_id: None },
      )
      .await
      .unwrap();
    }
    let events = drain(&mut rx_a);
    let updated = named(&events, "focus:updated");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["data"]["entry"]["section"], "status");

    handle(
      &state,
      session_b,
      &responder,
      ClientCommand::FocusClear { incident_id },
    )
    .await
    .unwrap();
    let events = drain(&mut rx_a);
    assert_eq!(named(&events, "focus:cleared").len(), 1);
  }

  #[tokio::test]
  async fn leave_announces_and_stops_delivery() {
    let state = make_state().await;
    let admin = seed_user(&state, "a@example.com", Role::Admin).await;
    let responder = seed_user(&state, "b@example.com", Role::Responder).await;
    let incident_id = seeded_incident(&state, admin.user_id).await;

    let (session_a, mut rx_a) = open_session(&state);
    handle(&state, session_a, &admin, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    let (session_b, mut rx_b) = open_session(&state);
    handle(&state, session_b, &responder, ClientCommand::Join(incident_id))
      .await
      .unwrap();
    drain(&mut rx_a);
    drain(&mut rx_b);

    handle(&state, session_b, &responder, ClientCommand::Leave(incident_id))
      .await
      .unwrap();

    let a_events = drain(&mut rx_a);
    let left = named(&a_events, "presence:left");
    assert_eq!(left.len(), 1);
    assert_eq!(
      left[0]["data"]["userId"],
      responder.user_id.to_string().as_str()
    );

    // B is out of the room: a later mutation no longer reaches it.
    handle(
      &state,
      session_a,
      &admin,
      ClientCommand::UpdateStatus { incident_id, status: Status::Identified },
    )
    .await
    .unwrap();
    assert!(drain(&mut rx_b).is_empty());
  }
}
