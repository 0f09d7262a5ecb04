//! Grant-token authorization (C8)
//!
//! Issues and validates signed, short-lived capability tokens bound to a
//! track's content version, so a segment fetch can be authorized in O(1)
//! work without a DB round-trip. `access` holds the unified access
//! evaluator that gates the initial grant.

pub mod access;
pub mod token;

pub use access::{AccessEvaluator, TierData, User};
pub use token::{GrantAuthorizer, GrantPayload};
