// Library surface for the overlay binary and integration tests.
// Terminal drawing stays bin-only in main.rs/ui.rs.
pub mod app_dirs;
pub mod calories;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod integrator;
pub mod overlay;
pub mod runtime;
pub mod session;
pub mod store;
