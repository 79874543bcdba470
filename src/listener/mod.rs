mod actor;
mod dispatch;
mod handler;
mod registration;
mod service;

pub use handler::EventHandler;
pub use handler::EventHandlerRegistry;
pub use handler::HandlerResult;
pub use registration::EventRegistration;
pub use registration::ListenerMessageCodec;
pub use service::ListenerError;
pub use service::ListenerService;
pub use service::ListenerServiceConfig;
