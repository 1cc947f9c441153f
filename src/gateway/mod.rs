//! Gateway server: route dispatch, reverse proxying, the chat WebSocket
//! canary and the HTTP auth surface.

pub mod canary;
pub mod proxy;
pub mod pump;
pub mod router;
pub mod routes;
pub mod server;

pub use canary::CanarySplit;
pub use routes::{Decision, RouteTable};
pub use server::Gateway;
