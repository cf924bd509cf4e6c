//! Invocable methods and the arguments they receive.
//!
//! Every method, whether it completes immediately or only after awaiting,
//! is invoked the same way: [`Method::invoke`] returns a boxed future that
//! the dispatcher awaits.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fault::Fault;
use crate::{Kwargs, Value};

/// Boxed future for method results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a method: a value or the fault it raised.
pub type MethodResult = std::result::Result<Value, Fault>;

/// Positional and keyword arguments of one inbound call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Call {
    pub fn new(args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self { args, kwargs }
    }

    /// Call with positional arguments only.
    pub fn positional(args: Vec<Value>) -> Self {
        Self::new(args, Kwargs::new())
    }

    /// Deserialize positional argument `index`.
    ///
    /// A missing argument raises an `index` fault, a mistyped one a `type`
    /// fault.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, Fault> {
        let value = self.args.get(index).ok_or_else(|| {
            Fault::index(vec![
                Value::from(format!("missing positional argument {index}")),
                Value::from(index),
            ])
        })?;
        T::deserialize(value).map_err(|e| {
            Fault::type_error(vec![Value::from(format!("argument {index}: {e}"))])
        })
    }

    /// Deserialize keyword argument `name`; a missing one raises a `key` fault.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T, Fault> {
        self.kwarg_opt(name)?
            .ok_or_else(|| Fault::key(vec![Value::from(name)]))
    }

    /// Deserialize keyword argument `name` if present.
    pub fn kwarg_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, Fault> {
        match self.kwargs.get(name) {
            None => Ok(None),
            Some(value) => T::deserialize(value).map(Some).map_err(|e| {
                Fault::type_error(vec![Value::from(format!("argument {name:?}: {e}"))])
            }),
        }
    }

    /// Deserialize all positional arguments at once, e.g. into a tuple.
    pub fn args_as<T: DeserializeOwned>(&self) -> Result<T, Fault> {
        T::deserialize(Value::Array(self.args.clone()))
            .map_err(|e| Fault::type_error(vec![Value::from(e.to_string())]))
    }

    /// Number of arguments, positional and keyword together.
    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

trait Invocable: Send + Sync + 'static {
    fn invoke(&self, call: Call) -> BoxFuture<'static, MethodResult>;
}

struct SyncMethod<F>(F);

impl<F> Invocable for SyncMethod<F>
where
    F: Fn(Call) -> MethodResult + Send + Sync + 'static,
{
    fn invoke(&self, call: Call) -> BoxFuture<'static, MethodResult> {
        Box::pin(std::future::ready((self.0)(call)))
    }
}

struct AsyncMethod<F, Fut> {
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> Invocable for AsyncMethod<F, Fut>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    fn invoke(&self, call: Call) -> BoxFuture<'static, MethodResult> {
        Box::pin((self.f)(call))
    }
}

/// Wrapper that deserializes the positional arguments before calling the
/// function and serializes what it returns.
struct TypedMethod<F, A, R, Fut> {
    f: F,
    _phantom: PhantomData<fn(A) -> (Fut, R)>,
}

impl<F, A, R, Fut> Invocable for TypedMethod<F, A, R, Fut>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R, Fault>> + Send + 'static,
{
    fn invoke(&self, call: Call) -> BoxFuture<'static, MethodResult> {
        let parsed: A = match call.args_as() {
            Ok(v) => v,
            Err(fault) => return Box::pin(std::future::ready(Err(fault))),
        };

        let fut = (self.f)(parsed);
        Box::pin(async move {
            let value = fut.await?;
            serde_json::to_value(value).map_err(|e| Fault::from_error(&e))
        })
    }
}

/// A remotely callable method. Cloning is cheap.
#[derive(Clone)]
pub struct Method(Arc<dyn Invocable>);

impl Method {
    /// Wrap a function that completes immediately.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Call) -> MethodResult + Send + Sync + 'static,
    {
        Self(Arc::new(SyncMethod(f)))
    }

    /// Wrap a function returning a future.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        Self(Arc::new(AsyncMethod {
            f,
            _phantom: PhantomData,
        }))
    }

    /// Wrap an async function over typed arguments.
    ///
    /// The positional arguments are deserialized into `A` (usually a tuple);
    /// keyword arguments are ignored.
    ///
    /// ```
    /// use rpcwire::handler::Method;
    /// use rpcwire::Fault;
    ///
    /// let add = Method::typed(|(a, b): (i64, i64)| async move { Ok::<_, Fault>(a + b) });
    /// # let _ = add;
    /// ```
    pub fn typed<F, A, R, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    {
        Self(Arc::new(TypedMethod {
            f,
            _phantom: PhantomData,
        }))
    }

    /// Start the method. Synchronous methods run during this call; the
    /// returned future yields their result immediately.
    pub fn invoke(&self, call: Call) -> BoxFuture<'static, MethodResult> {
        self.0.invoke(call)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Method")
    }
}
