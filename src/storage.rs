//! Relational store (SQLite) for per-agent and per-conversation state.

pub mod store;

pub use store::{Entry, EntryTable, Storage, SummaryRow};
