//! OAuth 2.0 account linking.
//!
//! Implements the authorization code flow for each configured provider:
//! 1. Authenticated client calls POST /auth/initiate/:provider
//! 2. A single-use session is created; `state = "<subject>:<session token>"`
//! 3. User authorizes on the provider's site
//! 4. Provider redirects the browser to /auth/callback/:provider
//! 5. Session is consumed, the code is exchanged, tokens are encrypted and
//!    upserted for (user, provider)
//!
//! The session token is the only thing the callback trusts. The subject id in
//! `state` is a claim checked against the session, never an identity on its own.

mod error;
mod exchange;
mod provider;
mod service;
mod session;

pub use error::{LinkError, LinkResult};
pub use exchange::TokenSet;
pub use provider::{ProviderConfig, ProviderRegistry};
pub use service::{parse_state, AuthorizationRequest, LinkService, LinkedAccount};
pub use session::{
    redact, run_session_cleanup, Clock, SessionEntry, SessionRegistry, SystemClock,
};

#[cfg(test)]
pub(crate) use session::ManualClock;
