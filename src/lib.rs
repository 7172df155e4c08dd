//! Schema bootstrapping for the bug-tracker MongoDB database.
//!
//! The crate ensures that the `user` and `project` collections exist in the
//! `bug-tracker` database, each with a uniqueness constraint (`email` and
//! `name` respectively). Every step is idempotent, so the bootstrap can run on
//! every service start.
pub mod bootstrap;
pub mod conf;
pub mod schema;
pub mod store;
pub mod utils;
