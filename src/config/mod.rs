//! Configuration
//!
//! Built once at startup from the command line and environment, then shared
//! read-only through [`AppState`](crate::state::AppState).

mod schema;

pub use schema::*;
