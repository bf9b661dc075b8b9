mod auth;
mod connection;
pub mod driver;
pub mod limiter;
mod middleware;
pub mod protocol;
mod routes;
mod server;
mod state;

pub use auth::Identity;
pub use limiter::DailyLimiter;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::GatewayServer;
pub use state::AppState;
