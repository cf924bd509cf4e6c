//! Method resolution.
//!
//! A [`Handler`] answers one question: "which method has this name?".
//! Two shapes satisfy it:
//!
//! - [`Registry`]: an explicit table built once, either by hand or from an
//!   object implementing [`Exposed`].
//! - Plain maps (`HashMap<String, Method>`, `BTreeMap<String, Method>`),
//!   where an absent key means the method does not exist.
//!
//! # Example
//!
//! ```
//! use rpcwire::handler::{Handler, Registry};
//! use serde_json::json;
//!
//! let mut registry = Registry::new();
//! registry.sync("func", |call| Ok(json!(call.arg::<i64>(0)? + 1)));
//!
//! assert!(registry.resolve("func").is_ok());
//! assert!(registry.resolve("unknown_method").is_err());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::BuildHasher;
use std::sync::Arc;

use super::method::{Call, Method, MethodResult};
use crate::error::{Result, RpcError};

/// Separator between a mounted namespace and the method inside it.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Resolves method names to invocable methods.
pub trait Handler: Send + Sync + 'static {
    /// Look up a method; `None` means no such method.
    fn lookup(&self, name: &str) -> Option<Method>;

    /// Resolve a method name, failing with [`RpcError::NotFound`].
    ///
    /// The empty name never resolves, whatever the handler contains.
    fn resolve(&self, name: &str) -> Result<Method> {
        if name.is_empty() {
            return Err(RpcError::NotFound(String::new()));
        }
        self.lookup(name)
            .ok_or_else(|| RpcError::NotFound(name.to_string()))
    }
}

/// Registry mapping method names to methods, with optional mounted
/// sub-handlers for dotted names.
#[derive(Default)]
pub struct Registry {
    /// Methods by exact name.
    methods: HashMap<String, Method>,
    /// Sub-handlers by namespace prefix.
    mounts: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the methods an object exposes.
    pub fn from_object<T: Exposed>(target: Arc<T>) -> Self {
        let mut methods = Methods {
            target,
            registry: Registry::new(),
        };
        T::expose(&mut methods);
        methods.registry
    }

    /// Register a method under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, method: Method) -> &mut Self {
        self.methods.insert(name.into(), method);
        self
    }

    /// Register a function that completes immediately.
    pub fn sync<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Call) -> MethodResult + Send + Sync + 'static,
    {
        self.register(name, Method::sync(f))
    }

    /// Register a function returning a future.
    pub fn asynchronous<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.register(name, Method::asynchronous(f))
    }

    /// Serve `handler` under `prefix`: `"prefix.method"` resolves to
    /// `handler.resolve("method")`.
    pub fn mount(&mut self, prefix: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.mounts.insert(prefix.into(), Arc::new(handler));
        self
    }

    /// Number of entries: registered methods plus mounted namespaces.
    pub fn len(&self) -> usize {
        self.methods.len() + self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of directly registered methods.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl Handler for Registry {
    fn lookup(&self, name: &str) -> Option<Method> {
        if let Some(method) = self.methods.get(name) {
            return Some(method.clone());
        }
        let (prefix, rest) = name.split_once(NAMESPACE_SEPARATOR)?;
        self.mounts.get(prefix)?.resolve(rest).ok()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("mounts", &self.mounts.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An object that lists its remotely callable methods.
///
/// `expose` runs once, when [`Registry::from_object`] builds the table;
/// nothing is looked up on the object per call.
///
/// ```
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use std::sync::Arc;
///
/// use rpcwire::handler::{Exposed, Handler, Methods, Registry};
/// use serde_json::json;
///
/// #[derive(Default)]
/// struct Counter(AtomicI64);
///
/// impl Exposed for Counter {
///     fn expose(methods: &mut Methods<Self>) {
///         methods.sync("add", |this, call| {
///             let n: i64 = call.arg(0)?;
///             Ok(json!(this.0.fetch_add(n, Ordering::SeqCst) + n))
///         });
///     }
/// }
///
/// let registry = Registry::from_object(Arc::new(Counter::default()));
/// assert!(registry.resolve("add").is_ok());
/// ```
pub trait Exposed: Send + Sync + Sized + 'static {
    fn expose(methods: &mut Methods<Self>);
}

/// Collects the methods of an [`Exposed`] object.
pub struct Methods<T> {
    target: Arc<T>,
    registry: Registry,
}

impl<T: Send + Sync + 'static> Methods<T> {
    /// Expose a method that completes immediately.
    pub fn sync<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&T, Call) -> MethodResult + Send + Sync + 'static,
    {
        let target = Arc::clone(&self.target);
        self.registry
            .register(name, Method::sync(move |call| f(&target, call)));
        self
    }

    /// Expose a method returning a future. The future owns a handle to the
    /// object.
    pub fn asynchronous<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Arc<T>, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let target = Arc::clone(&self.target);
        self.registry.register(
            name,
            Method::asynchronous(move |call| f(Arc::clone(&target), call)),
        );
        self
    }

    /// The object whose methods are being collected.
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }
}

impl<S> Handler for HashMap<String, Method, S>
where
    S: BuildHasher + Send + Sync + 'static,
{
    fn lookup(&self, name: &str) -> Option<Method> {
        self.get(name).cloned()
    }
}

impl Handler for BTreeMap<String, Method> {
    fn lookup(&self, name: &str) -> Option<Method> {
        self.get(name).cloned()
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn lookup(&self, name: &str) -> Option<Method> {
        (**self).lookup(name)
    }

    fn resolve(&self, name: &str) -> Result<Method> {
        (**self).resolve(name)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn lookup(&self, name: &str) -> Option<Method> {
        (**self).lookup(name)
    }

    fn resolve(&self, name: &str) -> Result<Method> {
        (**self).resolve(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn func() -> Method {
        Method::sync(|call| Ok(json!(call.arg::<i64>(0)? + 1)))
    }

    fn assert_not_found(result: Result<Method>, expected: &str) {
        match result {
            Err(RpcError::NotFound(name)) => assert_eq!(name, expected),
            other => panic!("expected NotFound({expected:?}), got {other:?}"),
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = Registry::new();
        registry.register("func", func());

        assert!(registry.resolve("func").is_ok());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["func"]);
    }

    #[test]
    fn test_len_counts_mounts() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        registry.mount("math", Registry::new());
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());

        registry.register("func", func());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().count(), 1);
    }

    #[test]
    fn test_unknown_method_not_found() {
        let registry = Registry::new();
        assert_not_found(registry.resolve("unknown_method"), "unknown_method");
    }

    #[test]
    fn test_empty_name_never_resolves() {
        let mut registry = Registry::new();
        registry.register("", func());

        assert_not_found(registry.resolve(""), "");
    }

    #[test]
    fn test_mounted_namespace() {
        let mut inner = Registry::new();
        inner.register("method", func());

        let mut registry = Registry::new();
        registry.mount("sub", inner);

        assert!(registry.resolve("sub.method").is_ok());
        assert_not_found(registry.resolve("sub.other"), "sub.other");
        assert_not_found(registry.resolve("sub."), "sub.");
        assert_not_found(registry.resolve("other.method"), "other.method");
    }

    #[test]
    fn test_exact_name_wins_over_mount() {
        let mut inner = Registry::new();
        inner.register("method", func());

        let mut registry = Registry::new();
        registry.mount("sub", inner);
        registry.register("sub.method", func());

        assert!(registry.lookup("sub.method").is_some());
    }

    #[test]
    fn test_mapping_handlers_match_registry() {
        let mut hash: HashMap<String, Method> = HashMap::new();
        hash.insert("func".into(), func());
        let mut tree: BTreeMap<String, Method> = BTreeMap::new();
        tree.insert("func".into(), func());

        assert!(hash.resolve("func").is_ok());
        assert!(tree.resolve("func").is_ok());
        assert_not_found(hash.resolve("missing"), "missing");
        assert_not_found(tree.resolve("missing"), "missing");
        assert_not_found(hash.resolve(""), "");
    }

    #[test]
    fn test_shared_handlers_forward() {
        let mut registry = Registry::new();
        registry.register("func", func());

        let shared: Arc<dyn Handler> = Arc::new(registry);
        assert!(shared.resolve("func").is_ok());

        let boxed: Box<dyn Handler> = Box::new(HashMap::<String, Method>::new());
        assert_not_found(boxed.resolve("func"), "func");
    }

    struct Greeter {
        greeting: String,
    }

    impl Exposed for Greeter {
        fn expose(methods: &mut Methods<Self>) {
            methods
                .sync("greet", |this, call| {
                    let name: String = call.arg(0)?;
                    Ok(json!(format!("{} {}", this.greeting, name)))
                })
                .asynchronous("greet_later", |this, call| async move {
                    let name: String = call.arg(0)?;
                    Ok::<_, crate::Fault>(json!(format!("{} {}", this.greeting, name)))
                });
        }
    }

    #[tokio::test]
    async fn test_from_object() {
        let registry = Registry::from_object(Arc::new(Greeter {
            greeting: "hello".into(),
        }));

        let greet = registry.resolve("greet").unwrap();
        let result = greet.invoke(Call::positional(vec![json!("bob")])).await;
        assert_eq!(result, Ok(json!("hello bob")));

        let later = registry.resolve("greet_later").unwrap();
        let result = later.invoke(Call::positional(vec![json!("amy")])).await;
        assert_eq!(result, Ok(json!("hello amy")));

        assert_not_found(registry.resolve("expose"), "expose");
    }
}
