mod error;
mod invocation;
mod reaper;
mod retry;
mod service;
mod target;

pub use error::InvocationError;
pub use invocation::InvocationFuture;
pub use invocation::InvocationTarget;
pub use reaper::ReaperHandle;
pub use retry::FAST_RETRY_COUNT;
pub use service::InvocationConfig;
pub use service::InvocationService;
pub use target::SmartTargetResolver;
pub use target::TargetResolver;
pub use target::UnisocketTargetResolver;
