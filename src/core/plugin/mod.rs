mod contract;
mod loader;
mod wrapper;

pub use contract::{
    Handler, HandlerConfig, HandlerType, Hybrid, Plugin, PluginBody, PluginInstance, Sender,
    derive_job_id,
};
pub use loader::{CatalogEntry, PluginCatalog, PluginConstructor, PluginDeps, PluginLoader};
pub use wrapper::{ERROR_NOTICE, Invocation, InvocationContext, LifecycleWrapper, SkipReason};
