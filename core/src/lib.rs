pub mod api;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod events_out;
pub mod executor;
pub mod state;
pub mod stdio;
