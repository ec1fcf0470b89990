//! # Chat Indexer
//!
//! Incremental, resumable indexing of chat history into SQLite with
//! trigram full-text search, plus replication of the indexed messages to a
//! hosted Postgres.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ MessageSource│──▶│    Ingest     │──▶│    SQLite     │
//! │ (export file)│   │ batch+rollback│   │ FTS5 trigram │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                        ┌─────────────────────┤
//!                        ▼                     ▼
//!                  ┌──────────┐        ┌──────────────┐
//!                  │  search  │        │  Replicate   │──▶ ReplicaSink
//!                  │  (CLI)   │        │ batch+rollback│    (PostgREST)
//!                  └──────────┘        └──────────────┘
//! ```
//!
//! Both pipelines are all-or-nothing per run: a [`session::SessionTracker`]
//! records what a run wrote and deletes it again on cancellation or error.
//!
//! ## Quick Start
//!
//! ```bash
//! chidx init                            # create database
//! chidx chats --format table            # find the chat id
//! chidx index --chat-id -1001234567890  # ingest (resumes automatically)
//! chidx search "배포 일정"
//! chidx replicate                       # push to the replica
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and codes |
//! | [`models`] | Core data types |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`store`] | Message store and search |
//! | [`source`] / [`connector_export`] | Message source capability and export reader |
//! | [`ingest`] | Ingestion pipeline |
//! | [`replica`] / [`replica_rest`] | Replica capability and PostgREST sink |
//! | [`replicate`] | Replication pipeline |
//! | [`session`] | Per-run rollback tracking |
//! | [`progress`] | Progress events and reporters |
//! | [`search`] / [`chats`] / [`stats`] | CLI commands |
//! | [`shutdown`] | Signal-driven cancellation |

pub mod chats;
pub mod config;
pub mod connector_export;
pub mod db;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod replica;
pub mod replica_rest;
pub mod replicate;
pub mod search;
pub mod session;
pub mod shutdown;
pub mod source;
pub mod stats;
pub mod store;
