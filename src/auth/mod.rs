//! Access control.

mod grant;

pub use grant::{action_level, parse_grants, required_level, AccessLevel, Principal};
