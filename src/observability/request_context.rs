//! Per-utterance correlation context.
//!
//! Every utterance runs inside a [`RequestContext`]. The context is carried as
//! a tokio task-local across `.await` points and mirrored into a thread-local
//! so synchronous code running on the same thread (storage calls, the
//! feedback loop) can stamp events with the same request ID.

use std::cell::RefCell;
use std::future::Future;
use uuid::Uuid;

/// Correlation data for one utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
    session_id: Option<String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Creates a context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::from_id(Uuid::new_v4().to_string())
    }

    /// Creates a context with an existing request ID.
    #[must_use]
    pub fn from_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
        }
    }

    /// Attaches the session that produced the utterance.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the session ID, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

tokio::task_local! {
    static TASK_CONTEXT: RequestContext;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// Restores the previous thread-local context on drop.
pub struct RequestContextGuard {
    previous: Option<RequestContext>,
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        THREAD_CONTEXT.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Enters a context for synchronous code on the current thread.
#[must_use]
pub fn enter_request_context(context: RequestContext) -> RequestContextGuard {
    let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    RequestContextGuard { previous }
}

/// Runs a future inside a context.
pub async fn scope_request_context<F, T>(context: RequestContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    TASK_CONTEXT.scope(context, fut).await
}

/// Returns the current context, preferring the task-local one.
#[must_use]
pub fn current_request_context() -> Option<RequestContext> {
    TASK_CONTEXT
        .try_with(Clone::clone)
        .ok()
        .or_else(|| THREAD_CONTEXT.with(|slot| slot.borrow().clone()))
}

/// Returns the current request ID, if set.
#[must_use]
pub fn current_request_id() -> Option<String> {
    current_request_context().map(|ctx| ctx.request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_guard_restores_previous() {
        assert_eq!(current_request_id(), None);
        {
            let _outer = enter_request_context(RequestContext::from_id("outer"));
            {
                let _inner = enter_request_context(RequestContext::from_id("inner"));
                assert_eq!(current_request_id().as_deref(), Some("inner"));
            }
            assert_eq!(current_request_id().as_deref(), Some("outer"));
        }
        assert_eq!(current_request_id(), None);
    }

    #[tokio::test]
    async fn test_task_context_survives_await() {
        let context = RequestContext::from_id("async").with_session("s1");
        let observed = scope_request_context(context, async {
            tokio::task::yield_now().await;
            current_request_context()
        })
        .await
        .expect("context in scope");
        assert_eq!(observed.request_id(), "async");
        assert_eq!(observed.session_id(), Some("s1"));
    }
}
