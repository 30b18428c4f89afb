//! Periodic presence sweep.
//!
//! Heartbeats refresh `last_active_at` every `heartbeat_secs`; entries whose
//! refresh is older than `presence_ttl_secs` (5× headroom by default) are
//! expired, and their rooms are told the principal left.

use chrono::Utc;
use sitrep_core::store::IncidentStore;
use tokio::time::MissedTickBehavior;

use crate::{
  AppState,
  rt::{hub::room_for, protocol::ServerEvent},
};

pub fn spawn<S>(state: AppState<S>) -> tokio::task::JoinHandle<()>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  tokio::spawn(async move {
    let period = std::time::Duration::from_secs(state.config.heartbeat_secs);
    let ttl = chrono::Duration::seconds(state.config.presence_ttl_secs as i64);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      match state.store.sweep_presence(Utc::now() - ttl).await {
        Ok(expired) => {
          for entry in expired {
            tracing::debug!(
              user = %entry.user_id,
              incident = %entry.incident_id,
              "presence expired",
            );
            state.hub.broadcast(
              &room_for(entry.incident_id),
              &ServerEvent::PresenceLeft {
                incident_id: entry.incident_id,
                user_id:     entry.user_id,
              },
              None,
            );
          }
        }
        Err(e) => tracing::error!("presence sweep failed: {e}"),
      }
    }
  })
}
