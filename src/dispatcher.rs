//! Server-side call pipeline.
//!
//! For every inbound [`CallRequest`] the [`Dispatcher`] resolves the method,
//! invokes it, awaits the result and packages it as exactly one
//! [`CallReply`]. Faults and panics never escape: both become error
//! descriptors through the [`ErrorMapper`]. The dispatcher keeps no state
//! between calls, so the connection can run any number of them at once.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::fault::{kinds, Fault};
use crate::handler::{Call, Handler};
use crate::mapper::ErrorMapper;
use crate::protocol::{CallReply, CallRequest};
use crate::Value;

/// Runs calls against a handler.
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
    mapper: Arc<ErrorMapper>,
    runtime: Handle,
    log_exceptions: bool,
    exclude_log_exceptions: HashSet<String>,
}

impl Dispatcher {
    /// Create a dispatcher that runs method invocations on `runtime`.
    pub fn new(handler: Arc<dyn Handler>, mapper: Arc<ErrorMapper>, runtime: Handle) -> Self {
        Self {
            handler,
            mapper,
            runtime,
            log_exceptions: false,
            exclude_log_exceptions: HashSet::new(),
        }
    }

    /// Log faults raised by methods at `warn` level, except those whose
    /// name is listed in `exclude`.
    pub fn log_exceptions<I, S>(mut self, enabled: bool, exclude: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_exceptions = enabled;
        self.exclude_log_exceptions = exclude.into_iter().map(Into::into).collect();
        self
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Process one call and produce its reply.
    pub async fn dispatch(&self, request: CallRequest) -> CallReply {
        let CallRequest {
            id,
            method,
            args,
            kwargs,
        } = request;

        if method.is_empty() {
            tracing::debug!(id, "Call with empty method name");
            return CallReply::not_found(id, "");
        }

        let resolved = match self.handler.resolve(&method) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(id, method = %method, "Resolve failed: {}", e);
                return CallReply::not_found(id, method);
            }
        };

        tracing::trace!(id, method = %method, "Invoking method");

        // Run the invocation as its own task so a panic unwinds there and
        // surfaces as a JoinError instead of tearing down the connection.
        let call = Call::new(args, kwargs);
        let mut task = AbortOnDrop(
            self.runtime
                .spawn(async move { resolved.invoke(call).await }),
        );

        let fault = match (&mut task.0).await {
            Ok(Ok(value)) => return CallReply::success(id, value),
            Ok(Err(fault)) => fault,
            Err(e) if e.is_panic() => {
                Fault::new(kinds::PANIC, vec![panic_message(e.into_panic())])
            }
            Err(_) => Fault::runtime(vec![Value::from("method task was cancelled")]),
        };

        self.log_fault(&method, &fault);
        CallReply::failure(id, self.mapper.encode(fault))
    }

    fn log_fault(&self, method: &str, fault: &Fault) {
        if self.log_exceptions && !self.exclude_log_exceptions.contains(fault.name()) {
            tracing::warn!(method = %method, "Method raised {}", fault);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("log_exceptions", &self.log_exceptions)
            .field("exclude_log_exceptions", &self.exclude_log_exceptions)
            .finish_non_exhaustive()
    }
}

/// Aborts the invocation if the dispatch future is dropped first.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> Value {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        Value::from(*s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Value::from(s.as_str())
    } else {
        Value::from("unknown panic")
    }
}
