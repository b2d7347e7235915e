//! Inbound middleware pipeline.
//!
//! Middleware sees every inbound message before subscribers do. Each one
//! receives the message by value and a [`Next`] continuation:
//!
//! ```text
//! msg ──▶ A ──next──▶ B ──next──▶ C ──next──▶ fan-out to subscribers
//!          └─ return without calling next: delivery stops here
//! ```
//!
//! `Next` is consumed by [`Next::run`], so a middleware can continue the chain
//! at most once. It may hand a modified message to the next stage. Errors are
//! not caught here; they abort delivery and surface to the caller of the
//! pipeline.
//!
//! ```rust,ignore
//! dispatcher.use_fn(|msg, next| async move {
//!     if msg.sender.is_bot {
//!         return Ok(()); // drop bot chatter
//!     }
//!     next.run(msg).await
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::foundation::message::Message;

/// Result type of middleware and subscribers.
pub type HandlerResult = anyhow::Result<()>;

/// The final stage, run once after the last middleware continues.
pub type Terminal = Box<dyn FnOnce(Message) -> BoxFuture<'static, HandlerResult> + Send>;

/// A stage of the inbound pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Processes `message`. Call `next.run(message)` to continue.
    async fn handle(&self, message: Message, next: Next) -> HandlerResult;
}

/// A shared middleware trait object.
pub type BoxedMiddleware = Arc<dyn Middleware>;

// =============================================================================
// Next
// =============================================================================

/// Continuation handed to each middleware.
///
/// Holds an immutable snapshot of the chain and the index of the stage it
/// will run.
pub struct Next {
    chain: Arc<[BoxedMiddleware]>,
    cursor: usize,
    terminal: Terminal,
}

impl Next {
    /// Starts a pipeline over `chain`, ending in `terminal`.
    pub fn new(chain: Arc<[BoxedMiddleware]>, terminal: Terminal) -> Self {
        Self {
            chain,
            cursor: 0,
            terminal,
        }
    }

    /// Runs the rest of the pipeline with `message`.
    pub fn run(self, message: Message) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            match self.chain.get(self.cursor).cloned() {
                Some(middleware) => {
                    let next = Next {
                        chain: self.chain,
                        cursor: self.cursor + 1,
                        terminal: self.terminal,
                    };
                    middleware.handle(message, next).await
                }
                None => (self.terminal)(message).await,
            }
        })
    }

    /// Stages left before the terminal.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.cursor)
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("cursor", &self.cursor)
            .field("len", &self.chain.len())
            .finish()
    }
}

// =============================================================================
// Closure middleware
// =============================================================================

/// Middleware backed by a closure.
pub struct FnMiddleware<F> {
    name: String,
    func: F,
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Message, Next) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: Message, next: Next) -> HandlerResult {
        (self.func)(message, next).await
    }
}

/// Wraps a closure as [`Middleware`].
pub fn middleware_fn<F, Fut>(func: F) -> FnMiddleware<F>
where
    F: Fn(Message, Next) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnMiddleware {
        name: "fn".to_string(),
        func,
    }
}

impl<F> FnMiddleware<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::message::{Chat, ChatKind, Content, MessageId, Participant};
    use parking_lot::Mutex;

    fn message(text: &str) -> Message {
        Message::new(
            MessageId::new("test", "c", "1"),
            Participant::new("u"),
            Chat::new("c", ChatKind::Direct),
            Content::text(text),
        )
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(log: &Log, label: &'static str) -> BoxedMiddleware {
        let log = log.clone();
        Arc::new(middleware_fn(move |msg, next: Next| {
            log.lock().push(label.to_string());
            next.run(msg)
        }))
    }

    fn terminal(log: &Log) -> Terminal {
        let log = log.clone();
        Box::new(move |msg| -> BoxFuture<'static, HandlerResult> {
            Box::pin(async move {
                log.lock().push(format!("end:{}", msg.text().unwrap_or_default()));
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_runs_in_registration_order() {
        let log: Log = Arc::default();
        let chain: Arc<[BoxedMiddleware]> =
            vec![recording(&log, "A"), recording(&log, "B"), recording(&log, "C")].into();

        Next::new(chain, terminal(&log)).run(message("hi")).await.unwrap();

        assert_eq!(*log.lock(), vec!["A", "B", "C", "end:hi"]);
    }

    #[tokio::test]
    async fn test_not_calling_next_stops_delivery() {
        let log: Log = Arc::default();
        let stop: BoxedMiddleware = Arc::new(middleware_fn(|_msg, _next| async { HandlerResult::Ok(()) }));
        let chain: Arc<[BoxedMiddleware]> = vec![recording(&log, "A"), stop, recording(&log, "C")].into();

        Next::new(chain, terminal(&log)).run(message("hi")).await.unwrap();

        assert_eq!(*log.lock(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_middleware_can_replace_message() {
        let log: Log = Arc::default();
        let upper: BoxedMiddleware = Arc::new(middleware_fn(|mut msg: Message, next: Next| {
            let text = msg.text().unwrap_or_default().to_uppercase();
            msg.content = Content::text(text);
            next.run(msg)
        }));

        Next::new(vec![upper].into(), terminal(&log))
            .run(message("hi"))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["end:HI"]);
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let log: Log = Arc::default();
        let failing: BoxedMiddleware =
            Arc::new(middleware_fn(|_msg, _next| async { HandlerResult::Err(anyhow::anyhow!("rejected")) }));

        let result = Next::new(vec![failing, recording(&log, "B")].into(), terminal(&log))
            .run(message("hi"))
            .await;

        assert_eq!(result.unwrap_err().to_string(), "rejected");
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain_goes_straight_to_terminal() {
        let log: Log = Arc::default();
        let next = Next::new(Arc::from(Vec::new()), terminal(&log));
        assert_eq!(next.remaining(), 0);
        next.run(message("x")).await.unwrap();
        assert_eq!(*log.lock(), vec!["end:x"]);
    }
}
