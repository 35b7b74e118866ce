use std::future::Future;
use std::pin::Pin;

use crate::error::BoxError;

/// Outcome of one handler invocation. `Ok(true)` acknowledges the execution;
/// `Ok(false)` and `Err(_)` leave it to the retry-timeout redelivery.
pub type HandlerResult = Result<bool, BoxError>;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// Callback bound to a task id.
///
/// Implemented for any `Fn(Option<String>) -> impl Future<Output = HandlerResult>`,
/// so closures and plain async functions can be bound directly.
///
/// # Example
///
/// ```rust
/// use baton_runtime::{BoxError, Handler, HandlerFuture};
///
/// struct Mailer {
///     from: String,
/// }
///
/// impl Handler for Mailer {
///     fn handle(&self, data: Option<String>) -> HandlerFuture<'_> {
///         Box::pin(async move {
///             let to = data.ok_or_else(|| BoxError::from("missing recipient"))?;
///             println!("{} -> {}", self.from, to);
///             Ok::<_, BoxError>(true)
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync {
    fn handle(&self, data: Option<String>) -> HandlerFuture<'_>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, data: Option<String>) -> HandlerFuture<'_> {
        Box::pin(self(data))
    }
}
