//! JSON REST handlers. Mutating endpoints broadcast to the incident's room
//! exactly like their streaming counterparts.

pub mod auth;
pub mod incidents;
pub mod users;
