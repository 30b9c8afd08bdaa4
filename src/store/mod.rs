//! Persistence for sessions, ephemeral tokens, and the user directory.

pub mod ephemeral;
pub mod sessions;
pub mod users;
