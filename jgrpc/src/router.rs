use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use foldhash::fast::RandomState;
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::message::RpcRequest;

/// Boxed future returned by a method handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// One registered method: takes the decoded argument values, returns the
/// result value or the failure to report to the caller.
pub type Handler = Box<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Method lookup key: name plus argument type descriptors, matched
/// exactly, so overloads with the same name resolve unambiguously.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: String,
    pub param_types: Vec<String>,
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.param_types.join(","))
    }
}

/// The methods one implementation exposes under one interface name.
/// Built by `RpcService::export`.
pub struct ServiceExport {
    pub interface: String,
    methods: Vec<(MethodKey, Handler)>,
}

impl ServiceExport {
    #[must_use]
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            methods: Vec::new(),
        }
    }

    /// Adds a method under (name, argument type descriptors).
    #[must_use]
    pub fn method<F, Fut>(mut self, name: &str, param_types: &[&str], f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let key = MethodKey {
            name: name.to_string(),
            param_types: param_types.iter().map(|t| (*t).to_string()).collect(),
        };
        self.methods
            .push((key, Box::new(move |args| Box::pin(f(args)))));
        self
    }
}

/// A service implementation. `export` lists every interface the
/// implementation satisfies together with its method table; the same
/// implementation may serve several interfaces.
pub trait RpcService: Send + Sync + 'static {
    fn export(self: Arc<Self>) -> Vec<ServiceExport>;
}

type MethodTable = HashMap<MethodKey, Handler, RandomState>;

/// The server-side service map: interface name to method table. Written
/// only during setup, read concurrently by the dispatch engine.
#[derive(Default)]
pub struct Router {
    services: HashMap<String, MethodTable, RandomState>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation under every interface it exports.
    /// Returns the interface names, for directory publication.
    ///
    /// # Errors
    ///
    /// Fails if the implementation exports no interfaces.
    pub fn register<S: RpcService>(&mut self, service: Arc<S>) -> Result<Vec<String>> {
        let exports = service.export();
        if exports.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "service exports no interfaces".to_string(),
            ));
        }

        let mut names = Vec::with_capacity(exports.len());
        for export in exports {
            tracing::info!("registered service: {}", export.interface);
            let table = self.services.entry(export.interface.clone()).or_default();
            for (key, handler) in export.methods {
                table.insert(key, handler);
            }
            names.push(export.interface);
        }
        Ok(names)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &String> {
        self.services.keys()
    }

    /// Resolves a request to its handler invocation.
    ///
    /// # Errors
    ///
    /// `ServiceNotFound` when no implementation serves the interface,
    /// `MethodNotFound` when (name, type descriptors) match no method.
    /// Both carry the message the failed response reports to the caller.
    pub fn dispatch(&self, request: &RpcRequest) -> Result<HandlerFuture> {
        let table = self.services.get(&request.interface_name).ok_or_else(|| {
            Error::new(
                ErrorKind::ServiceNotFound,
                format!("Service not found: {}", request.interface_name),
            )
        })?;

        let key = MethodKey {
            name: request.method_name.clone(),
            param_types: request.param_types.clone(),
        };
        let handler = table.get(&key).ok_or_else(|| {
            Error::new(
                ErrorKind::MethodNotFound,
                format!("Method not found: {}.{key}", request.interface_name),
            )
        })?;

        Ok(handler(request.parameters.clone()))
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("services", &self.services.keys())
            .finish()
    }
}
