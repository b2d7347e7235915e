//! Framework layer - Routing and inbound processing.
//!
//! - Central dispatcher with capability gating
//! - Cursor-based middleware pipeline

pub mod dispatcher;
pub mod middleware;

pub use dispatcher::{Dispatcher, Subscriber, SubscriptionId, WeakDispatcher};
pub use middleware::{
    BoxedMiddleware, FnMiddleware, HandlerResult, Middleware, Next, Terminal, middleware_fn,
};
