//! Entry point of the library: wires the coordination services into one `GridClient`.
mod client;
mod options;
mod wiring;

pub use client::GridClient;
pub use options::ClientOptions;
pub use wiring::try_create_client;
pub use wiring::ClientCreationError;
pub use wiring::GridClientConfig;
