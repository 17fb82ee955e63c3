//! Class list reporting engine.
//!
//! Answers paginated, filtered class-list queries over five read-only
//! collections (students, subjects, teachers, semesters, grades), with a
//! two-phase query plan, per-page statistics and a TTL cache whose misses are
//! computed once per key.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
