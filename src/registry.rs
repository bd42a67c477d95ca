//! Registry of driver kinds and power switch backends.
//!
//! Board descriptions name drivers by kind (`"ShellDriver"`) and outlets by
//! backend model (`"apc"`). The registry turns those names into instances
//! configured from one [`Settings`] value:
//!
//! ```text
//!  "SerialDriver"          ──▶ SerialDriver(transport opener)
//!  "ChromiumEcPowerDriver" ──▶ ChromiumEcPowerDriver(settings.chromium_ec)
//!  "NetworkPowerDriver"    ──▶ NetworkPowerDriver(settings.network_power, backends)
//!  "UBootDriver"           ──▶ UBootDriver(settings.uboot)
//!  "ShellDriver"           ──▶ ShellDriver(settings.shell)
//!  "ShellStorageDriver"    ──▶ ShellStorageDriver(settings.storage)
//!  "ProviderDriver"        ──▶ ProviderDriver
//! ```

use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::console::{SerialOpener, TransportOpener};
use crate::driver::{
    ChromiumEcPowerDriver, Driver, DriverHandle, NetworkPowerDriver, ProviderDriver, SerialDriver,
    ShellDriver, ShellStorageDriver, UBootDriver,
};
use crate::error::{Error, Result};
use crate::power::{PowerBackend, PowerBackends};
use crate::settings::Settings;
use crate::target::Target;

/// Builds a fresh driver instance.
pub type DriverFactory = Box<dyn Fn() -> Box<dyn Driver>>;

/// Driver kinds and power backends by name.
pub struct Registry {
    factories: BTreeMap<String, DriverFactory>,
    backends: Rc<PowerBackends>,
}
impl Registry {
    /// An empty registry knowing about `backends` only.
    pub fn new(backends: PowerBackends) -> Self {
        Registry {
            factories: BTreeMap::new(),
            backends: Rc::new(backends),
        }
    }

    /// All built-in drivers and backends, consoles on real serial ports.
    pub fn with_builtins(settings: &Settings) -> Self {
        Self::with_opener(settings, Rc::new(SerialOpener), PowerBackends::with_builtins())
    }

    /// All built-in drivers, consoles opened through `opener` and outlets
    /// switched through `backends`.
    pub fn with_opener(
        settings: &Settings,
        opener: Rc<dyn TransportOpener>,
        backends: PowerBackends,
    ) -> Self {
        let mut registry = Self::new(backends);
        let backends = Rc::clone(&registry.backends);

        registry.insert("SerialDriver", move || {
            Box::new(SerialDriver::new(Rc::clone(&opener)))
        });
        let config = settings.chromium_ec.clone();
        registry.insert("ChromiumEcPowerDriver", move || {
            Box::new(ChromiumEcPowerDriver::new(config.clone()))
        });
        let config = settings.network_power.clone();
        registry.insert("NetworkPowerDriver", move || {
            Box::new(NetworkPowerDriver::new(config.clone(), Rc::clone(&backends)))
        });
        let config = settings.uboot.clone();
        registry.insert("UBootDriver", move || Box::new(UBootDriver::new(config.clone())));
        let config = settings.shell.clone();
        registry.insert("ShellDriver", move || Box::new(ShellDriver::new(config.clone())));
        let config = settings.storage.clone();
        registry.insert("ShellStorageDriver", move || {
            Box::new(ShellStorageDriver::new(config.clone()))
        });
        registry.insert("ProviderDriver", || Box::new(ProviderDriver::new()));
        registry
    }

    fn insert<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn() -> Box<dyn Driver> + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Make `kind` known. Kinds are unique.
    pub fn register_driver<F>(&mut self, kind: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Driver> + 'static,
    {
        if self.factories.contains_key(kind) {
            return Err(Error::Configuration(format!(
                "driver kind `{}` is already registered",
                kind
            )));
        }
        self.insert(kind, factory);
        Ok(())
    }

    pub fn driver_kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create_driver(&self, kind: &str) -> Result<Box<dyn Driver>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown driver kind `{}`, known: {}",
                kind,
                self.driver_kinds().join(", ")
            ))
        })?;
        debug!("creating a {}", kind);
        Ok(factory())
    }

    /// Create a driver of `kind` and add it to `target` as `name`.
    pub fn add_driver(&self, target: &mut Target, kind: &str, name: &str) -> Result<DriverHandle> {
        let driver = self.create_driver(kind)?;
        target.add_driver(name, driver)
    }

    pub fn power_backend(&self, model: &str) -> Result<Rc<dyn PowerBackend>> {
        self.backends.get(model)
    }

    pub fn power_models(&self) -> Vec<&str> {
        self.backends.models()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedTransport;
    use crate::protocol::Protocol;
    use crate::settings::SettingsBuilder;

    fn registry() -> Registry {
        let settings = SettingsBuilder::new().finalize();
        Registry::with_opener(
            &settings,
            Rc::new(ScriptedTransport::new()),
            PowerBackends::with_builtins(),
        )
    }

    #[test]
    fn builtins_are_registered() {
        let registry = registry();
        assert_eq!(
            registry.driver_kinds(),
            vec![
                "ChromiumEcPowerDriver",
                "NetworkPowerDriver",
                "ProviderDriver",
                "SerialDriver",
                "ShellDriver",
                "ShellStorageDriver",
                "UBootDriver",
            ]
        );
        for kind in registry.driver_kinds() {
            assert_eq!(registry.create_driver(kind).unwrap().kind(), kind);
        }
        assert_eq!(registry.power_models(), vec!["apc"]);
        assert!(registry.power_backend("apc").is_ok());
    }

    #[test]
    fn unknown_kinds_are_configuration_errors() {
        let registry = registry();
        assert!(matches!(
            registry.create_driver("FastbootDriver"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            registry.power_backend("netio"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn custom_kinds_can_be_added_once() {
        let mut registry = registry();
        assert!(registry
            .register_driver("ShellDriver", || Box::new(ProviderDriver::new()))
            .is_err());
        registry
            .register_driver("TftpProvider", || Box::new(ProviderDriver::new()))
            .unwrap();

        let mut target = Target::new("board");
        let tftp = registry.add_driver(&mut target, "TftpProvider", "tftp").unwrap();
        assert!(tftp.provides(Protocol::FileProvider));
        assert_eq!(target.driver("tftp"), Some(&tftp));
    }
}
