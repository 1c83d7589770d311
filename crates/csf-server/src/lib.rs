//! `csf-server` library surface: router, shared state, error mapping, auth
//! middleware, and the background janitors, each exposed as its own module
//! so integration tests (and `csf-testkit`) can compose them directly
//! without going through the binary.

pub mod error;
pub mod janitors;
pub mod middleware;
pub mod routes;
pub mod state;
