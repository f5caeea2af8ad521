pub mod auth;
pub mod pairing;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{GatewayServer, GatewayState};
