use std::sync::Arc;

use blazer_agent::LifecycleManager;

use crate::namespace::NamespaceClient;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LifecycleManager>,
    pub namespaces: NamespaceClient,
    pub read_only: bool,
}
