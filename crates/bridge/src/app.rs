use crate::config::ServerConfig;
use crate::handler::{RequestHandler, WireHandler};
use crate::lifecycle::{LifecycleHooks, RequestHook, ResponseHook};
use crate::route::RouteMetadata;
use crate::websocket::WebSocketHandler;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Routes, handlers, hooks and configuration collected before the bridge is built.
///
/// Routes accumulate in registration order; registering a handler name again replaces
/// the earlier handler.
#[derive(Clone, Default)]
pub struct App {
    routes: Vec<RouteMetadata>,
    handlers: HashMap<String, WireHandler>,
    websocket_routes: Vec<RouteMetadata>,
    websocket_handlers: HashMap<String, WebSocketHandler>,
    hooks: LifecycleHooks,
    config: Option<ServerConfig>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route<H: RequestHandler + 'static>(&mut self, metadata: RouteMetadata, handler: H) -> &mut Self {
        let name = metadata.handler_name.clone();
        self.handlers.insert(name.clone(), WireHandler::new(name, Arc::new(handler)));
        self.routes.push(metadata);
        self
    }

    pub fn websocket(&mut self, metadata: RouteMetadata, handler: WebSocketHandler) -> &mut Self {
        self.websocket_handlers.insert(metadata.handler_name.clone(), handler);
        self.websocket_routes.push(metadata);
        self
    }

    pub fn on_request<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.hooks.on_request(hook);
        self
    }

    pub fn pre_validation<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.hooks.pre_validation(hook);
        self
    }

    pub fn pre_handler<H: RequestHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.hooks.pre_handler(hook);
        self
    }

    pub fn on_response<H: ResponseHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.hooks.on_response(hook);
        self
    }

    pub fn on_error<H: ResponseHook + 'static>(&mut self, hook: H) -> &mut Self {
        self.hooks.on_error(hook);
        self
    }

    pub fn config(&mut self, config: ServerConfig) -> &mut Self {
        self.config = Some(config);
        self
    }

    /// A copy of the registered hooks; changing it does not affect the app.
    pub fn lifecycle_hooks(&self) -> LifecycleHooks {
        self.hooks.clone()
    }

    pub fn routes(&self) -> &[RouteMetadata] {
        &self.routes
    }

    pub fn handlers(&self) -> &HashMap<String, WireHandler> {
        &self.handlers
    }

    pub fn websocket_routes(&self) -> &[RouteMetadata] {
        &self.websocket_routes
    }

    pub fn websocket_handler(&self, name: &str) -> Option<&WebSocketHandler> {
        self.websocket_handlers.get(name)
    }

    pub fn server_config(&self) -> Option<&ServerConfig> {
        self.config.as_ref()
    }
}

impl Debug for App {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.routes)
            .field("websocket_routes", &self.websocket_routes)
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::handler::handler_fn;
    use crate::lifecycle::{HookStage, hook_fn};
    use micro_wire::Request;

    #[test]
    fn test_reregistering_handler_overwrites() {
        let mut app = App::new();
        app.add_route(RouteMetadata::get("/a", "h"), handler_fn(|_r: Request| async { Ok::<_, BoxError>("one") }))
            .add_route(RouteMetadata::get("/b", "h"), handler_fn(|_r: Request| async { Ok::<_, BoxError>("two") }));

        assert_eq!(app.routes().len(), 2);
        assert_eq!(app.handlers().len(), 1);
    }

    #[test]
    fn test_lifecycle_hooks_is_a_copy() {
        let mut app = App::new();
        app.on_request(hook_fn(|request: Request| async move { Ok::<_, BoxError>(request) }));

        let mut copy = app.lifecycle_hooks();
        copy.on_request(hook_fn(|request: Request| async move { Ok::<_, BoxError>(request) }));

        assert_eq!(app.lifecycle_hooks().len(HookStage::OnRequest), 1);
        assert_eq!(copy.len(HookStage::OnRequest), 2);
    }
}
