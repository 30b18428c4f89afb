//! The real-time subsystem: room hub, focus registry, session endpoint, and
//! command dispatcher.

pub mod dispatch;
pub mod focus;
pub mod hub;
pub mod protocol;
pub mod session;
