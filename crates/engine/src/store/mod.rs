//! Durable persistence for jobs and every child entity.
//!
//! The store is the only component allowed to mutate job status, and every
//! stage transition goes through its compare-and-set so that concurrent
//! workers racing on the same job have exactly one winner.

pub mod entities;
pub mod sqlite;

pub use entities::*;
pub use sqlite::{NewHypothesis, SqliteStore};
