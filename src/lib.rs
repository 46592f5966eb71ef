pub mod client;
pub mod clock;
pub mod config;
pub mod display;
pub mod registry;
pub mod render;
pub mod session;
pub mod snapshot;
pub mod sse;
pub mod terminal;
