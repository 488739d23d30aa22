//! Session authentication

pub mod middleware;
#[cfg(test)]
mod middleware_tests;
pub mod sessions;

pub use middleware::{optional_session, require_session, MaybeSession};
pub use sessions::{
    clear_session_cookie, session_cookie, ClientInfo, InMemorySessionStore, IssuedSession,
    PgSessionStore, SessionAuthority, SessionRecord, SessionStore, SESSION_COOKIE,
};
