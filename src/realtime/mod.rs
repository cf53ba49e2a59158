pub mod push;
pub mod registry;
pub mod server;

pub use push::{deliver, revoke_room, DeliveryError, Push, PushTarget};
pub use registry::{ConnId, Limits, RegistryError, RegistryStats};
pub use server::{GatewayError, WebsocketServer, WebsocketServerHandle};
