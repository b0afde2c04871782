//! Process-level wiring: router assembly, health, shutdown.

mod health;
mod server;
mod shutdown;

pub use health::*;
pub use server::*;
pub use shutdown::*;
