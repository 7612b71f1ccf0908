//! Command services. Each is built from the session's shared writer (and,
//! for correlated calls, its consumer registry) by a plain constructor.

mod call;
mod event;

pub use call::ServiceCaller;
pub use event::EventService;
