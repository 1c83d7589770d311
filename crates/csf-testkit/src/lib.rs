//! Shared test infrastructure for the compliance-fleet server crates: an
//! in-memory [`Repository`](csf_db::Repository) double plus an in-process
//! HTTP harness for exercising `csf-server`'s router without a live
//! Postgres instance or TCP socket.

mod fake_repo;
pub mod http;

pub use fake_repo::FakeRepository;
