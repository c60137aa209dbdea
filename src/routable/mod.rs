//! Route registration.
//!
//! A [`Routable`] collects the route declarations of one handler class:
//! base path, suppressed route names, and per-route method/path/handler
//! chains. `build()` resolves the declarations into immutable
//! [`RouteDescriptor`]s; the framework instance binds every descriptor set
//! onto a single axum router at listen time, which is also where duplicate
//! routes across classes are rejected.
//!
//! Per request the execution order is fixed: authenticators, then the
//! before chain, then the primary handler, then the after chain. Each
//! stage runs strictly after the previous one completes.

mod authenticator;

pub use authenticator::{AuthError, AuthResult, Authenticator};

use crate::error::ConfigError;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodFilter;
use axum::Router;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The primary handler of a route.
pub type RouteHandler = Arc<dyn Fn(Request<Body>) -> BoxFuture<Response> + Send + Sync>;

/// A before-handler may rewrite the request or short-circuit with a
/// response of its own.
pub type BeforeHandler =
    Arc<dyn Fn(Request<Body>) -> BoxFuture<Result<Request<Body>, Response>> + Send + Sync>;

/// An after-handler observes and may replace the outgoing response.
pub type AfterHandler = Arc<dyn Fn(Response) -> BoxFuture<Response> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            "head" => Some(Self::Head),
            "options" => Some(Self::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    fn filter(&self) -> MethodFilter {
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
            Self::Put => MethodFilter::PUT,
            Self::Patch => MethodFilter::PATCH,
            Self::Delete => MethodFilter::DELETE,
            Self::Head => MethodFilter::HEAD,
            Self::Options => MethodFilter::OPTIONS,
        }
    }
}

/// One route declaration: a named handler plus its method, path and chains.
///
/// Method defaults to `get` and path to the class base path, mirroring a
/// bare declaration.
pub struct Route {
    name: String,
    method: String,
    path: Option<String>,
    handler: RouteHandler,
    before: Vec<BeforeHandler>,
    after: Vec<AfterHandler>,
    authenticators: Vec<Arc<dyn Authenticator>>,
    blacklisted: bool,
}

impl Route {
    pub fn new<F, Fut, R>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + 'static,
    {
        let handler: RouteHandler =
            Arc::new(move |req| Box::pin(wrap_response(handler(req))) as BoxFuture<Response>);
        Self {
            name: name.into(),
            method: "get".to_string(),
            path: None,
            handler,
            before: Vec::new(),
            after: Vec::new(),
            authenticators: Vec::new(),
            blacklisted: false,
        }
    }

    /// HTTP method name. Validated when the owning [`Routable`] builds.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Path relative to the class base path. Router-native parameter
    /// segments (`{id}`) pass through verbatim.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn before<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Request<Body>, Response>> + Send + 'static,
    {
        self.before
            .push(Arc::new(move |req| Box::pin(handler(req)) as _));
        self
    }

    pub fn after<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.after
            .push(Arc::new(move |resp| Box::pin(handler(resp)) as _));
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    /// Exclude this route from binding without removing its declaration.
    pub fn blacklisted(mut self) -> Self {
        self.blacklisted = true;
        self
    }
}

async fn wrap_response<R: IntoResponse>(fut: impl Future<Output = R>) -> Response {
    fut.await.into_response()
}

/// Route declarations for one handler class.
pub struct Routable {
    class: String,
    base_path: String,
    suppressed: HashSet<String>,
    authenticators: Vec<Arc<dyn Authenticator>>,
    routes: Vec<Route>,
}

impl Routable {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            base_path: "/".to_string(),
            suppressed: HashSet::new(),
            authenticators: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = path.into();
        self
    }

    /// Blacklist a route by name for the whole class.
    pub fn suppress(mut self, route_name: impl Into<String>) -> Self {
        self.suppressed.insert(route_name.into());
        self
    }

    /// Attach an authenticator to every route of this class. Class-level
    /// authenticators run before route-level ones.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Resolve the declarations into descriptors, in declaration order.
    /// Blacklisted routes (either level) are dropped here; an invalid
    /// method name is fatal.
    pub fn build(self) -> Result<Vec<RouteDescriptor>, ConfigError> {
        let mut descriptors = Vec::new();
        for route in self.routes {
            if route.blacklisted || self.suppressed.contains(&route.name) {
                continue;
            }
            let method =
                HttpMethod::parse(&route.method).ok_or_else(|| ConfigError::InvalidHttpMethod {
                    class: self.class.clone(),
                    route: route.name.clone(),
                    method: route.method.clone(),
                })?;
            let path = join_paths(&self.base_path, route.path.as_deref().unwrap_or(""));
            let mut authenticators = self.authenticators.clone();
            authenticators.extend(route.authenticators);
            descriptors.push(RouteDescriptor {
                class: self.class.clone(),
                name: route.name,
                method,
                path,
                handler: route.handler,
                before: route.before,
                after: route.after,
                authenticators,
            });
        }
        Ok(descriptors)
    }
}

pub(crate) fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_matches('/');
    let path = path.trim_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (false, true) => format!("/{base}"),
        (true, false) => format!("/{path}"),
        (false, false) => format!("/{base}/{path}"),
    }
}

/// An immutable, bindable route.
#[derive(Clone)]
pub struct RouteDescriptor {
    /// Declaring class name, for diagnostics.
    pub class: String,
    /// Declared route name, for diagnostics.
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
    handler: RouteHandler,
    before: Vec<BeforeHandler>,
    after: Vec<AfterHandler>,
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl RouteDescriptor {
    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    async fn dispatch(self: Arc<Self>, mut req: Request<Body>) -> Response {
        for authenticator in &self.authenticators {
            if let Err(err) = authenticator.authenticate(&req).await {
                let status = match err {
                    AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                    AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
                };
                return (status, err.to_string()).into_response();
            }
        }
        for before in &self.before {
            match before(req).await {
                Ok(next) => req = next,
                Err(resp) => return resp,
            }
        }
        let mut resp = (self.handler)(req).await;
        for after in &self.after {
            resp = after(resp).await;
        }
        resp
    }
}

/// Bind every descriptor set onto one router, in declaration order. A
/// `(method, path)` pair declared by two classes is fatal.
pub(crate) fn bind_router(sets: &[Vec<RouteDescriptor>]) -> Result<Router, ConfigError> {
    let mut seen: HashMap<(HttpMethod, String), String> = HashMap::new();
    // Grouped by path because axum takes one method router per path.
    let mut paths: Vec<(String, axum::routing::MethodRouter)> = Vec::new();

    for set in sets {
        for descriptor in set {
            let key = (descriptor.method, descriptor.path.clone());
            if let Some(first) = seen.get(&key) {
                return Err(ConfigError::DuplicateRoute {
                    method: descriptor.method.as_str().to_string(),
                    path: descriptor.path.clone(),
                    first: first.clone(),
                    second: descriptor.class.clone(),
                });
            }
            seen.insert(key, descriptor.class.clone());

            tracing::debug!(
                method = descriptor.method.as_str(),
                path = %descriptor.path,
                class = %descriptor.class,
                route = %descriptor.name,
                "binding route"
            );

            let shared = Arc::new(descriptor.clone());
            let service = move |req: Request<Body>| {
                let shared = shared.clone();
                async move { shared.dispatch(req).await }
            };
            let filter = descriptor.method.filter();
            match paths.iter_mut().find(|(p, _)| *p == descriptor.path) {
                Some((_, method_router)) => {
                    let taken = std::mem::take(method_router);
                    *method_router = taken.on(filter, service);
                }
                None => paths.push((
                    descriptor.path.clone(),
                    axum::routing::on(filter, service),
                )),
            }
        }
    }

    let mut router = Router::new();
    for (path, method_router) in paths {
        router = router.route(&path, method_router);
    }
    Ok(router)
}
