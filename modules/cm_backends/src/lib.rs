//! Built-in configuration-management backends: Chef, Puppet and Puppet-Solo.
//!
//! Register them with [`register_builtin_backends`] before building the
//! registry.

pub mod chef;
pub mod descriptor;
pub mod puppet;
pub mod puppet_solo;

use std::sync::Arc;

use cmkit::RegistryBuilder;

pub use chef::{
    ChefApi, ChefAuth, ChefConfigManager, ChefConnector, ChefNode, ChefPlugin,
    InMemoryChefServer, NoChefClient,
};
pub use descriptor::BackendSpec;
pub use puppet::{PuppetConfigManager, PuppetPlugin};
pub use puppet_solo::{PuppetSoloConfigManager, PuppetSoloPlugin};

/// Add the Chef, Puppet and Puppet-Solo plugins to `builder`.
///
/// Without a connector Chef records still validate, but building a Chef
/// backend fails.
pub fn register_builtin_backends(
    builder: &mut RegistryBuilder,
    chef_connector: Option<Arc<dyn ChefConnector>>,
) -> &mut RegistryBuilder {
    let connector = chef_connector.unwrap_or_else(|| Arc::new(NoChefClient));
    builder
        .register(Arc::new(ChefPlugin::new(connector)))
        .register(Arc::new(PuppetPlugin))
        .register(Arc::new(PuppetSoloPlugin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_builtins_next_to_dummy() {
        let mut builder = RegistryBuilder::new();
        register_builtin_backends(&mut builder, None);
        let registry = builder.build().unwrap();
        assert_eq!(
            registry.protocols(),
            vec!["chef", "dummy", "puppet", "puppet_solo"]
        );
    }

    #[test]
    fn registering_twice_is_a_build_error() {
        let mut builder = RegistryBuilder::new();
        register_builtin_backends(&mut builder, None);
        register_builtin_backends(&mut builder, None);
        assert!(builder.build().is_err());
    }
}
