//! The framework instance.
//!
//! `Tsubaki` is the composition root: it owns the DI container, the named
//! store connections, every registered routable's descriptor set, and the
//! middleware stack. `listen` binds the router (this is where duplicate
//! routes surface), connects all stores, and starts serving; `close` shuts
//! the server down gracefully and treats "never started" as success.

use crate::config::ServerConfig;
use crate::di::{Container, Provide};
use crate::error::{Result, TsubakiError};
use crate::routable::{bind_router, join_paths, Routable, RouteDescriptor};
use crate::store::{DocumentStore, StoreConnections};
use axum::extract::Request;
use axum::response::IntoResponse;
use axum::Router;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::{Layer, Service};

type MiddlewareFn = Box<dyn Fn(Router) -> Router + Send + Sync>;

/// Per-`listen` settings. Anything left unset falls back to the env-backed
/// [`ServerConfig`] defaults.
#[derive(Default)]
pub struct ListenOptions {
    pub address: Option<String>,
    pub port: Option<u16>,
    /// Logged once at startup. `None` logs a default line; an empty string
    /// silences the message entirely.
    pub boot_message: Option<String>,
}

struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
    local_addr: SocketAddr,
}

/// The slot is reserved (`Starting`) before any await in `listen`, so a
/// concurrent `listen` cannot also pass the "already listening" check and
/// orphan a server task.
enum ServerState {
    Starting,
    Running(ServerHandle),
}

pub struct Tsubaki {
    container: Container,
    stores: Arc<StoreConnections>,
    routes: Vec<Vec<RouteDescriptor>>,
    middleware: Mutex<Vec<MiddlewareFn>>,
    server: Mutex<Option<ServerState>>,
}

impl Tsubaki {
    pub fn builder() -> TsubakiBuilder {
        TsubakiBuilder::new()
    }

    /// The store connections this instance owns. Handed to
    /// `Crud::synthesize` when wiring model persistence.
    pub fn stores(&self) -> &Arc<StoreConnections> {
        &self.stores
    }

    pub fn get_provider<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        Ok(self.container.get_provider::<T>()?)
    }

    pub fn get_provider_as<C: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<C>> {
        Ok(self.container.get_provider_as::<C>()?)
    }

    pub fn deregister_dependencies(&self) {
        self.container.deregister_dependencies();
    }

    /// Push a tower layer under every bound route. Layers apply in the
    /// order added, outermost first, when `listen` builds the router.
    pub fn add_middleware<L>(&self, layer: L)
    where
        L: Layer<axum::routing::Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        self.middleware
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(move |router| router.layer(layer.clone())));
    }

    /// Bind the router without serving it. Exposed so tests can drive the
    /// full request pipeline with `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Result<Router> {
        let mut router = bind_router(&self.routes)?;
        for apply in self
            .middleware
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            router = apply(router);
        }
        Ok(router)
    }

    /// Bind the router, connect every store, and start serving. A duplicate
    /// route or a store connection failure rejects startup; nothing serves
    /// and nothing stays connected.
    pub async fn listen(&self, options: ListenOptions) -> Result<()> {
        {
            let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
            if server.is_some() {
                return Err(TsubakiError::Startup("already listening".to_string()));
            }
            *server = Some(ServerState::Starting);
        }

        match self.start(options).await {
            Ok(handle) => {
                *self.server.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(ServerState::Running(handle));
                Ok(())
            }
            Err(err) => {
                *self.server.lock().unwrap_or_else(PoisonError::into_inner) = None;
                Err(err)
            }
        }
    }

    async fn start(&self, options: ListenOptions) -> Result<ServerHandle> {
        let router = self.router()?;

        if let Err(err) = self.stores.connect_all().await {
            // a partial connect can leave earlier stores open
            let _ = self.stores.disconnect_all().await;
            return Err(err.into());
        }

        let config = ServerConfig::from_env();
        let address = options.address.unwrap_or(config.address);
        let port = options.port.unwrap_or(config.port);

        let listener = match tokio::net::TcpListener::bind((address.as_str(), port)).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = self.stores.disconnect_all().await;
                return Err(TsubakiError::Startup(format!("bind {address}:{port}: {e}")));
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(e) => {
                let _ = self.stores.disconnect_all().await;
                return Err(TsubakiError::Startup(e.to_string()));
            }
        };

        match options.boot_message.as_deref() {
            Some("") => {}
            Some(message) => tracing::info!("{message}"),
            None => tracing::info!("tsubaki listening on {local_addr}"),
        }

        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        Ok(ServerHandle {
            shutdown,
            task,
            local_addr,
        })
    }

    /// The bound address while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(ServerState::Running(handle)) => Some(handle.local_addr),
            _ => None,
        }
    }

    /// Graceful shutdown. Closing an instance that never started (or is
    /// already closed) succeeds.
    pub async fn close(&self) -> Result<()> {
        let state = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = match state {
            None => return Ok(()),
            Some(ServerState::Starting) => {
                // a concurrent listen holds the slot; leave its claim intact
                *self.server.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(ServerState::Starting);
                return Err(TsubakiError::Shutdown("startup in progress".to_string()));
            }
            Some(ServerState::Running(handle)) => handle,
        };

        let _ = handle.shutdown.send(());
        match handle.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TsubakiError::Shutdown(e.to_string())),
            Err(e) => return Err(TsubakiError::Shutdown(e.to_string())),
        }
        self.stores
            .disconnect_all()
            .await
            .map_err(TsubakiError::from)?;
        tracing::info!("tsubaki closed");
        Ok(())
    }
}

pub struct TsubakiBuilder {
    providers: Vec<Provide>,
    routables: Vec<Routable>,
    stores: Vec<(String, Arc<dyn DocumentStore>)>,
    base_uri: String,
}

impl Default for TsubakiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TsubakiBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            routables: Vec::new(),
            stores: Vec::new(),
            base_uri: String::new(),
        }
    }

    /// Register a provider: `Provide::class` for a concrete injectable,
    /// `Provide::using` for a contract binding or substitution.
    pub fn provider(mut self, entry: Provide) -> Self {
        self.providers.push(entry);
        self
    }

    pub fn routable(mut self, routable: Routable) -> Self {
        self.routables.push(routable);
        self
    }

    /// Register a named store connection. Opened during `listen`.
    pub fn store(mut self, name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        self.stores.push((name.into(), store));
        self
    }

    /// Prefix prepended to every bound route path.
    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = base_uri.into();
        self
    }

    /// Construct the instance: builds the container (claiming injectable
    /// ownership) and resolves every routable into descriptors. Fatal
    /// configuration errors surface here, before anything serves.
    pub fn build(self) -> Result<Tsubaki> {
        let container = Container::new(self.providers)?;

        let connections = StoreConnections::new();
        for (name, store) in self.stores {
            connections.add(name, store);
        }

        let mut routes = Vec::with_capacity(self.routables.len());
        for routable in self.routables {
            let mut descriptors = routable.build()?;
            if !self.base_uri.is_empty() {
                for descriptor in &mut descriptors {
                    descriptor.path = join_paths(&self.base_uri, &descriptor.path);
                }
            }
            routes.push(descriptors);
        }

        Ok(Tsubaki {
            container,
            stores: Arc::new(connections),
            routes,
            middleware: Mutex::new(Vec::new()),
            server: Mutex::new(None),
        })
    }
}
