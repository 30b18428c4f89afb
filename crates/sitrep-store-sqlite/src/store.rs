//! [`SqliteStore`] — the SQLite implementation of [`IncidentStore`].
//!
//! Every mutation runs inside a single transaction that writes both the
//! incident projection and the audit record, so callers never observe (or
//! broadcast) a state that is not fully persisted.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use sitrep_core::{
  Error as CoreError,
  incident::{Incident, NewIncident, Status},
  presence::PresenceEntry,
  principal::{NewUser, Role, User},
  store::{IncidentQuery, IncidentStore},
  update::{AssignmentAction, Update, UpdateContent, clean_text},
};

use crate::{
  Error, Result,
  encode::{
    RawIncident, RawPresence, RawUser, RawUpdate, decode_dt, decode_status,
    encode_dt, encode_role, encode_severity, encode_status, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Closure helpers ─────────────────────────────────────────────────────────

/// Wrap a domain error for transport out of a `conn.call` closure; the
/// `From<tokio_rusqlite::Error>` impl on [`Error`] unwraps it on the way out.
fn abort(e: Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

fn read_user(
  conn: &rusqlite::Connection,
  id_str: &str,
) -> rusqlite::Result<Option<RawUser>> {
  conn
    .query_row(
      "SELECT user_id, name, email, role, created_at
       FROM users WHERE user_id = ?1",
      rusqlite::params![id_str],
      |row| {
        Ok(RawUser {
          user_id:    row.get(0)?,
          name:       row.get(1)?,
          email:      row.get(2)?,
          role:       row.get(3)?,
          created_at: row.get(4)?,
        })
      },
    )
    .optional()
}

fn read_incident(
  conn: &rusqlite::Connection,
  id_str: &str,
) -> rusqlite::Result<Option<RawIncident>> {
  conn
    .query_row(
      "SELECT incident_id, title, description, severity, status,
              created_by, commander, created_at, resolved_at
       FROM incidents WHERE incident_id = ?1",
      rusqlite::params![id_str],
      |row| {
        Ok(RawIncident {
          incident_id: row.get(0)?,
          title:       row.get(1)?,
          description: row.get(2)?,
          severity:    row.get(3)?,
          status:      row.get(4)?,
          created_by:  row.get(5)?,
          commander:   row.get(6)?,
          created_at:  row.get(7)?,
          resolved_at: row.get(8)?,
        })
      },
    )
    .optional()
}

fn require_incident(
  conn: &rusqlite::Connection,
  id_str: &str,
  id: Uuid,
) -> std::result::Result<RawIncident, tokio_rusqlite::Error> {
  read_incident(conn, id_str)?
    .ok_or_else(|| abort(CoreError::IncidentNotFound(id).into()))
}

fn read_assignees(
  conn: &rusqlite::Connection,
  id_str: &str,
) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT user_id FROM assignees WHERE incident_id = ?1 ORDER BY position",
  )?;
  stmt
    .query_map(rusqlite::params![id_str], |row| row.get(0))?
    .collect()
}

fn insert_update(
  conn: &rusqlite::Connection,
  update: &Update,
) -> std::result::Result<(), tokio_rusqlite::Error> {
  let content_json = update
    .content
    .to_json()
    .map_err(|e| abort(e.into()))?
    .to_string();
  conn.execute(
    "INSERT INTO updates (
       update_id, incident_id, author_id, kind, content_json, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![
      encode_uuid(update.update_id),
      encode_uuid(update.incident_id),
      encode_uuid(update.author_id),
      update.content.discriminant(),
      content_json,
      encode_dt(update.created_at),
    ],
  )?;
  Ok(())
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Sitrep store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── IncidentStore impl ──────────────────────────────────────────────────────

impl IncidentStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn create_user(&self, input: NewUser) -> Result<User> {
    let user = User {
      user_id:    Uuid::new_v4(),
      name:       input.name,
      email:      input.email,
      role:       input.role,
      created_at: Utc::now(),
    };

    let id_str   = encode_uuid(user.user_id);
    let at_str   = encode_dt(user.created_at);
    let name     = user.name.clone();
    let email    = user.email.clone();
    let role_str = encode_role(user.role).to_owned();
    let hash     = input.password_hash;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let taken: bool = tx
          .query_row(
            "SELECT 1 FROM users WHERE email = ?1",
            rusqlite::params![email],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if taken {
          return Err(abort(CoreError::EmailTaken(email).into()));
        }
        tx.execute(
          "INSERT INTO users (user_id, name, email, password_hash, role, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, name, email, hash, role_str, at_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(user)
  }

  async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| Ok(read_user(conn, &id_str)?))
      .await?;
    raw.map(RawUser::into_user).transpose()
  }

  async fn find_user_by_email(
    &self,
    email: &str,
  ) -> Result<Option<(User, String)>> {
    let email = email.to_owned();
    let raw: Option<(RawUser, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, name, email, role, created_at, password_hash
               FROM users WHERE email = ?1",
              rusqlite::params![email],
              |row| {
                Ok((
                  RawUser {
                    user_id:    row.get(0)?,
                    name:       row.get(1)?,
                    email:      row.get(2)?,
                    role:       row.get(3)?,
                    created_at: row.get(4)?,
                  },
                  row.get(5)?,
                ))
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(|(r, hash)| Ok((r.into_user()?, hash)))
      .transpose()
  }

  async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>> {
    let role_str = role.map(encode_role).map(str::to_owned);

    let raws: Vec<RawUser> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id, name, email, role, created_at FROM users
           WHERE (?1 IS NULL OR role = ?1)
           ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![role_str.as_deref()], |row| {
            Ok(RawUser {
              user_id:    row.get(0)?,
              name:       row.get(1)?,
              email:      row.get(2)?,
              role:       row.get(3)?,
              created_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUser::into_user).collect()
  }

  async fn set_user_role(&self, id: Uuid, role: Role) -> Result<User> {
    let id_str   = encode_uuid(id);
    let role_str = encode_role(role).to_owned();

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE users SET role = ?2 WHERE user_id = ?1",
          rusqlite::params![id_str, role_str],
        )?;
        if changed == 0 {
          return Err(abort(CoreError::UserNotFound(id).into()));
        }
        let raw = read_user(&tx, &id_str)?
          .ok_or_else(|| abort(CoreError::UserNotFound(id).into()))?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.into_user()
  }

  async fn count_users(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
      })
      .await?;
    Ok(count as u64)
  }

  // ── Incidents ─────────────────────────────────────────────────────────────

  async fn create_incident(
    &self,
    input: NewIncident,
  ) -> Result<(Incident, Update)> {
    let title = clean_text(&input.title)?;
    let now   = Utc::now();

    let incident = Incident {
      incident_id: Uuid::new_v4(),
      title,
      description: input.description,
      severity: input.severity,
      status: Status::Investigating,
      created_by: input.created_by,
      commander: input.created_by,
      assignees: Vec::new(),
      created_at: now,
      resolved_at: None,
    };
    // Seed audit record: the only one allowed a null previous status.
    let update = Update {
      update_id:   Uuid::new_v4(),
      incident_id: incident.incident_id,
      author_id:   input.created_by,
      created_at:  now,
      content:     UpdateContent::StatusChange {
        previous_status: None,
        new_status:      Status::Investigating,
      },
    };

    let i = incident.clone();
    let u = update.clone();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO incidents (
             incident_id, title, description, severity, status,
             created_by, commander, created_at, resolved_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            encode_uuid(i.incident_id),
            i.title,
            i.description,
            encode_severity(i.severity),
            encode_status(i.status),
            encode_uuid(i.created_by),
            encode_uuid(i.commander),
            encode_dt(i.created_at),
            Option::<String>::None,
          ],
        )?;
        insert_update(&tx, &u)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok((incident, update))
  }

  async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
    let id_str = encode_uuid(id);

    let pair = self
      .conn
      .call(move |conn| match read_incident(conn, &id_str)? {
        Some(raw) => {
          let assignees = read_assignees(conn, &id_str)?;
          Ok(Some((raw, assignees)))
        }
        None => Ok(None),
      })
      .await?;

    pair.map(|(raw, a)| raw.into_incident(a)).transpose()
  }

  async fn list_incidents(&self, query: IncidentQuery) -> Result<Vec<Incident>> {
    let status_str   = query.status.map(encode_status).map(str::to_owned);
    let severity_str = query.severity.map(encode_severity).map(str::to_owned);

    let raws: Vec<(RawIncident, Vec<String>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT incident_id, title, description, severity, status,
                  created_by, commander, created_at, resolved_at
           FROM incidents
           WHERE (?1 IS NULL OR status = ?1)
             AND (?2 IS NULL OR severity = ?2)
           ORDER BY created_at DESC",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![status_str.as_deref(), severity_str.as_deref()],
            |row| {
              Ok(RawIncident {
                incident_id: row.get(0)?,
                title:       row.get(1)?,
                description: row.get(2)?,
                severity:    row.get(3)?,
                status:      row.get(4)?,
                created_by:  row.get(5)?,
                commander:   row.get(6)?,
                created_at:  row.get(7)?,
                resolved_at: row.get(8)?,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for raw in rows {
          let assignees = read_assignees(conn, &raw.incident_id)?;
          out.push((raw, assignees));
        }
        Ok(out)
      })
      .await?;

    raws
      .into_iter()
      .map(|(raw, a)| raw.into_incident(a))
      .collect()
  }

  async fn list_updates(&self, incident_id: Uuid) -> Result<Vec<Update>> {
    let id_str = encode_uuid(incident_id);

    let raws: Vec<RawUpdate> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT update_id, incident_id, author_id, kind, content_json, created_at
           FROM updates WHERE incident_id = ?1
           ORDER BY created_at, update_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawUpdate {
              update_id:    row.get(0)?,
              incident_id:  row.get(1)?,
              author_id:    row.get(2)?,
              kind:         row.get(3)?,
              content_json: row.get(4)?,
              created_at:   row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUpdate::into_update).collect()
  }

  // ── Mutations ─────────────────────────────────────────────────────────────

  async fn update_status(
    &self,
    incident_id: Uuid,
    new_status: Status,
    author: Uuid,
  ) -> Result<(Incident, Update)> {
    let id_str = encode_uuid(incident_id);

    let (raw, assignees, update) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut raw = require_incident(&tx, &id_str, incident_id)?;
        let assignees = read_assignees(&tx, &id_str)?;

        let current = decode_status(&raw.status).map_err(abort)?;
        if !current.can_transition_to(new_status) {
          return Err(abort(
            CoreError::IllegalTransition { from: current, to: new_status }
              .into(),
          ));
        }

        let now = Utc::now();
        // First resolution is sticky: resolved_at is set once, ever.
        let resolved_at = match (&raw.resolved_at, new_status) {
          (None, Status::Resolved) => Some(encode_dt(now)),
          (existing, _) => existing.clone(),
        };
        tx.execute(
          "UPDATE incidents SET status = ?2, resolved_at = ?3
           WHERE incident_id = ?1",
          rusqlite::params![id_str, encode_status(new_status), resolved_at],
        )?;
        raw.status = encode_status(new_status).to_owned();
        raw.resolved_at = resolved_at;

        let update = Update {
          update_id:   Uuid::new_v4(),
          incident_id,
          author_id:   author,
          created_at:  now,
          content:     UpdateContent::StatusChange {
            previous_status: Some(current),
            new_status,
          },
        };
        insert_update(&tx, &update)?;
        tx.commit()?;
        Ok((raw, assignees, update))
      })
      .await?;

    Ok((raw.into_incident(assignees)?, update))
  }

  async fn add_note(
    &self,
    incident_id: Uuid,
    author: Uuid,
    text: String,
  ) -> Result<(Incident, Update)> {
    let text   = clean_text(&text)?;
    let id_str = encode_uuid(incident_id);

    let (raw, assignees, update) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let raw = require_incident(&tx, &id_str, incident_id)?;
        let assignees = read_assignees(&tx, &id_str)?;

        let update = Update {
          update_id:   Uuid::new_v4(),
          incident_id,
          author_id:   author,
          created_at:  Utc::now(),
          content:     UpdateContent::Note { text },
        };
        insert_update(&tx, &update)?;
        tx.commit()?;
        Ok((raw, assignees, update))
      })
      .await?;

    Ok((raw.into_incident(assignees)?, update))
  }

  async fn assign_user(
    &self,
    incident_id: Uuid,
    target: Uuid,
    author: Uuid,
  ) -> Result<(Incident, Update)> {
    let id_str     = encode_uuid(incident_id);
    let target_str = encode_uuid(target);

    let (raw, assignees, update) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let raw = require_incident(&tx, &id_str, incident_id)?;

        let target_exists: bool = tx
          .query_row(
            "SELECT 1 FROM users WHERE user_id = ?1",
            rusqlite::params![target_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if !target_exists {
          return Err(abort(CoreError::UserNotFound(target).into()));
        }

        let already: bool = tx
          .query_row(
            "SELECT 1 FROM assignees WHERE incident_id = ?1 AND user_id = ?2",
            rusqlite::params![id_str, target_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if already {
          return Err(abort(CoreError::DuplicateAssignee(target).into()));
        }

        tx.execute(
          "INSERT INTO assignees (incident_id, user_id, position)
           SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0)
           FROM assignees WHERE incident_id = ?1",
          rusqlite::params![id_str, target_str],
        )?;

        let update = Update {
          update_id:   Uuid::new_v4(),
          incident_id,
          author_id:   author,
          created_at:  Utc::now(),
          content:     UpdateContent::Assignment {
            action:         AssignmentAction::Assigned,
            target_user_id: target,
          },
        };
        insert_update(&tx, &update)?;
        let assignees = read_assignees(&tx, &id_str)?;
        tx.commit()?;
        Ok((raw, assignees, update))
      })
      .await?;

    Ok((raw.into_incident(assignees)?, update))
  }

  async fn unassign_user(
    &self,
    incident_id: Uuid,
    target: Uuid,
    author: Uuid,
  ) -> Result<(Incident, Update)> {
    let id_str     = encode_uuid(incident_id);
    let target_str = encode_uuid(target);

    let (raw, assignees, update) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let raw = require_incident(&tx, &id_str, incident_id)?;

        let removed = tx.execute(
          "DELETE FROM assignees WHERE incident_id = ?1 AND user_id = ?2",
          rusqlite::params![id_str, target_str],
        )?;
        if removed == 0 {
          return Err(abort(CoreError::NotAssigned(target).into()));
        }

        let update = Update {
          update_id:   Uuid::new_v4(),
          incident_id,
          author_id:   author,
          created_at:  Utc::now(),
          content:     UpdateContent::Assignment {
            action:         AssignmentAction::Unassigned,
            target_user_id: target,
          },
        };
        insert_update(&tx, &update)?;
        let assignees = read_assignees(&tx, &id_str)?;
        tx.commit()?;
        Ok((raw, assignees, update))
      })
      .await?;

    Ok((raw.into_incident(assignees)?, update))
  }

  async fn add_action_item(
    &self,
    incident_id: Uuid,
    author: Uuid,
    text: String,
  ) -> Result<(Incident, Update)> {
    let text   = clean_text(&text)?;
    let id_str = encode_uuid(incident_id);

    let (raw, assignees, update) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let raw = require_incident(&tx, &id_str, incident_id)?;
        let assignees = read_assignees(&tx, &id_str)?;

        let update = Update {
          update_id:   Uuid::new_v4(),
          incident_id,
          author_id:   author,
          created_at:  Utc::now(),
          content:     UpdateContent::ActionItem { text, completed: false },
        };
        insert_update(&tx, &update)?;
        tx.commit()?;
        Ok((raw, assignees, update))
      })
      .await?;

    Ok((raw.into_incident(assignees)?, update))
  }

  async fn toggle_action_item(
    &self,
    update_id: Uuid,
    completed: bool,
  ) -> Result<(Incident, Update)> {
    let update_id_str = encode_uuid(update_id);

    let (raw, assignees, update) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let row = tx
          .query_row(
            "SELECT update_id, incident_id, author_id, kind, content_json, created_at
             FROM updates WHERE update_id = ?1",
            rusqlite::params![update_id_str],
            |row| {
              Ok(RawUpdate {
                update_id:    row.get(0)?,
                incident_id:  row.get(1)?,
                author_id:    row.get(2)?,
                kind:         row.get(3)?,
                content_json: row.get(4)?,
                created_at:   row.get(5)?,
              })
            },
          )
          .optional()?
          .ok_or_else(|| abort(CoreError::UpdateNotFound(update_id).into()))?;

        let incident_id_str = row.incident_id.clone();
        let mut update = row.into_update().map_err(abort)?;
        // Setting the explicit boolean makes retries idempotent; writing
        // the current value again is a harmless no-op.
        match &mut update.content {
          UpdateContent::ActionItem { completed: done, .. } => {
            *done = completed;
          }
          _ => return Err(abort(CoreError::NotAnActionItem(update_id).into())),
        }
        let content_json =
          update.content.to_json().map_err(|e| abort(e.into()))?.to_string();
        tx.execute(
          "UPDATE updates SET content_json = ?2 WHERE update_id = ?1",
          rusqlite::params![update_id_str, content_json],
        )?;

        let raw = require_incident(&tx, &incident_id_str, update.incident_id)?;
        let assignees = read_assignees(&tx, &incident_id_str)?;
        tx.commit()?;
        Ok((raw, assignees, update))
      })
      .await?;

    Ok((raw.into_incident(assignees)?, update))
  }

  // ── Presence ──────────────────────────────────────────────────────────────

  async fn upsert_presence(
    &self,
    user_id: Uuid,
    incident_id: Uuid,
    session_id: Uuid,
  ) -> Result<PresenceEntry> {
    let entry = PresenceEntry {
      user_id,
      incident_id,
      session_id,
      last_active_at: Utc::now(),
    };

    let user_str     = encode_uuid(user_id);
    let incident_str = encode_uuid(incident_id);
    let session_str  = encode_uuid(session_id);
    let at_str       = encode_dt(entry.last_active_at);

    self
      .conn
      .call(move |conn| {
        // Later session wins: a reconnect replaces the old row instead of
        // leaving a ghost entry.
        conn.execute(
          "INSERT INTO presence (user_id, incident_id, session_id, last_active_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (user_id, incident_id) DO UPDATE SET
             session_id = excluded.session_id,
             last_active_at = excluded.last_active_at",
          rusqlite::params![user_str, incident_str, session_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(entry)
  }

  async fn remove_presence(
    &self,
    user_id: Uuid,
    incident_id: Uuid,
  ) -> Result<Option<PresenceEntry>> {
    let user_str     = encode_uuid(user_id);
    let incident_str = encode_uuid(incident_id);

    let raw: Option<RawPresence> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let row = tx
          .query_row(
            "SELECT user_id, incident_id, session_id, last_active_at
             FROM presence WHERE user_id = ?1 AND incident_id = ?2",
            rusqlite::params![user_str, incident_str],
            |row| {
              Ok(RawPresence {
                user_id:        row.get(0)?,
                incident_id:    row.get(1)?,
                session_id:     row.get(2)?,
                last_active_at: row.get(3)?,
              })
            },
          )
          .optional()?;
        if row.is_some() {
          tx.execute(
            "DELETE FROM presence WHERE user_id = ?1 AND incident_id = ?2",
            rusqlite::params![user_str, incident_str],
          )?;
        }
        tx.commit()?;
        Ok(row)
      })
      .await?;

    raw.map(RawPresence::into_entry).transpose()
  }

  async fn remove_presence_by_session(
    &self,
    session_id: Uuid,
  ) -> Result<Vec<PresenceEntry>> {
    let session_str = encode_uuid(session_id);

    let raws: Vec<RawPresence> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let rows = {
          let mut stmt = tx.prepare(
            "SELECT user_id, incident_id, session_id, last_active_at
             FROM presence WHERE session_id = ?1",
          )?;
          stmt
            .query_map(rusqlite::params![session_str], |row| {
              Ok(RawPresence {
                user_id:        row.get(0)?,
                incident_id:    row.get(1)?,
                session_id:     row.get(2)?,
                last_active_at: row.get(3)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
          "DELETE FROM presence WHERE session_id = ?1",
          rusqlite::params![session_str],
        )?;
        tx.commit()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPresence::into_entry).collect()
  }

  async fn heartbeat_presence(&self, session_id: Uuid) -> Result<()> {
    let session_str = encode_uuid(session_id);
    let at_str      = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE presence SET last_active_at = ?2 WHERE session_id = ?1",
          rusqlite::params![session_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_presence(
    &self,
    incident_id: Uuid,
  ) -> Result<Vec<(PresenceEntry, User)>> {
    let incident_str = encode_uuid(incident_id);

    let raws: Vec<(RawPresence, RawUser)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT p.user_id, p.incident_id, p.session_id, p.last_active_at,
                  u.user_id, u.name, u.email, u.role, u.created_at
           FROM presence p
           JOIN users u ON u.user_id = p.user_id
           WHERE p.incident_id = ?1
           ORDER BY p.last_active_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![incident_str], |row| {
            Ok((
              RawPresence {
                user_id:        row.get(0)?,
                incident_id:    row.get(1)?,
                session_id:     row.get(2)?,
                last_active_at: row.get(3)?,
              },
              RawUser {
                user_id:    row.get(4)?,
                name:       row.get(5)?,
                email:      row.get(6)?,
                role:       row.get(7)?,
                created_at: row.get(8)?,
              },
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(p, u)| Ok((p.into_entry()?, u.into_user()?)))
      .collect()
  }

  async fn sweep_presence(
    &self,
    cutoff: DateTime<Utc>,
  ) -> Result<Vec<PresenceEntry>> {
    let raws: Vec<RawPresence> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let rows = {
          let mut stmt = tx.prepare(
            "SELECT user_id, incident_id, session_id, last_active_at
             FROM presence",
          )?;
          stmt
            .query_map([], |row| {
              Ok(RawPresence {
                user_id:        row.get(0)?,
                incident_id:    row.get(1)?,
                session_id:     row.get(2)?,
                last_active_at: row.get(3)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut expired = Vec::new();
        for raw in rows {
          let last = decode_dt(&raw.last_active_at).map_err(abort)?;
          if last < cutoff {
            tx.execute(
              "DELETE FROM presence WHERE user_id = ?1 AND incident_id = ?2",
              rusqlite::params![raw.user_id, raw.incident_id],
            )?;
            expired.push(raw);
          }
        }
        tx.commit()?;
        Ok(expired)
      })
      .await?;

    raws.into_iter().map(RawPresence::into_entry).collect()
  }
}
