//! CLI command implementations.
//!
//! | Module     | Commands handled          |
//! |------------|---------------------------|
//! | `serve`    | `Serve`                   |
//! | `database` | `InitDb`, `CreateAdmin`   |

pub mod database;
pub mod serve;

pub use database::{apply_db_path, cmd_create_admin, cmd_init_db};
pub use serve::{apply_serve_overrides, cmd_serve};
