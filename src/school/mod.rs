//! School administration back-end.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (Router, CORS, tracing, files)   │
//! │  (Expo)  │ <─────── │    └─ api/  (handlers, envelope, ApiError)   │
//! └──────────┘   JSON   │         │  auth.rs  (tokens, AuthUser,       │
//!                       │         │           AdminUser extractors)    │
//!                       │         │  storage.rs  (avatar files)        │
//!                       │         │ DbHandle::call()                   │
//!                       │         v                                    │
//!                       │  db/  (SchoolDb: one module per entity,      │
//!                       │        enrollment.rs for subject_student)    │
//!                       │         │                                    │
//!                       │         v                                    │
//!                       │  models.rs  (entities, closed enums, pages)  │
//!                       └──────────────────────────────────────────────┘
//! ```
//!
//! Every write that touches more than one row runs in a single
//! `BEGIN IMMEDIATE` transaction, so several server processes can share
//! one SQLite file.

pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod server;
pub mod storage;
