// Library exports for rollcall
// Front ends (and integration tests) drive the store through these modules.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod state;
pub mod store;
pub mod tasks;
