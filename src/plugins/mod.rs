//! Built-in plugins.

pub mod digest;
pub mod plugin_manager;
pub mod test_plugin;

use crate::core::plugin::{CatalogEntry, PluginCatalog, PluginDeps};
use crate::core::storage::PluginKind;

pub use digest::StatusDigest;
pub use plugin_manager::PluginManagerCommand;
pub use test_plugin::TestPlugin;

/// Every plugin this binary can restore, all seeded on first run.
pub fn builtin_catalog(deps: PluginDeps) -> PluginCatalog {
    PluginCatalog::new(deps)
        .with(CatalogEntry {
            kind: PluginKind::Outgoing,
            group: TestPlugin::GROUP,
            class: TestPlugin::CLASS,
            seed_on_first_run: true,
            construct: TestPlugin::instance,
        })
        .with(CatalogEntry {
            kind: PluginKind::Incoming,
            group: PluginManagerCommand::GROUP,
            class: PluginManagerCommand::CLASS,
            seed_on_first_run: true,
            construct: PluginManagerCommand::instance,
        })
        .with(CatalogEntry {
            kind: PluginKind::Hybrid,
            group: StatusDigest::GROUP,
            class: StatusDigest::CLASS,
            seed_on_first_run: true,
            construct: StatusDigest::instance,
        })
}
