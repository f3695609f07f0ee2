pub mod channel;
pub mod controller;
pub mod message;
pub mod server;
pub mod service;
pub mod wire;

mod transport;

// Re-export the user-facing surface for convenience
pub use channel::{ClientChannel, ClientOptions};
pub use controller::RpcController;
pub use message::Message;
pub use server::{RpcServer, RpcServerOptions};
pub use service::{MethodDescriptor, Service};
