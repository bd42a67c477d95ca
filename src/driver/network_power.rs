use std::rc::Rc;
use std::thread;

use log::info;

use super::{unbound, unknown_slot, Binding, Driver, Requirement, Supplier};
use crate::error::{Error, Result};
use crate::power::{power_get, power_set, PowerBackend, PowerBackends};
use crate::protocol::{PowerProtocol, Protocol};
use crate::resource::{Resource, ResourceClass, ResourceKind};
use crate::settings::NetworkPowerConfig;

const BINDINGS: &[Binding] = &[Binding {
    slot: "port",
    accepts: &[Requirement::Resource(ResourceClass::PowerOutlet)],
}];

/// Power through one outlet of a network power switch. The backend is the
/// one registered for the model named by the bound outlet.
pub struct NetworkPowerDriver {
    config: NetworkPowerConfig,
    backends: Rc<PowerBackends>,
    backend: Option<Rc<dyn PowerBackend>>,
    outlet: Option<Rc<Resource>>,
}
impl NetworkPowerDriver {
    pub fn new(config: NetworkPowerConfig, backends: Rc<PowerBackends>) -> Self {
        NetworkPowerDriver {
            config,
            backends,
            backend: None,
            outlet: None,
        }
    }

    fn backend(&self) -> Result<&dyn PowerBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| unbound("NetworkPowerDriver", "port"))
    }

    fn outlet(&self) -> Result<(&str, Option<u16>, u32)> {
        let outlet = self
            .outlet
            .as_ref()
            .ok_or_else(|| unbound("NetworkPowerDriver", "port"))?;
        match outlet.kind() {
            ResourceKind::PowerOutlet {
                host, port, index, ..
            } => Ok((host.as_str(), *port, *index)),
            other => Err(Error::Binding(format!(
                "resource `{}` is a {}, not a power outlet",
                outlet.name(),
                other.class()
            ))),
        }
    }

    fn switch(&self, on: bool) -> Result<()> {
        let (host, port, index) = self.outlet()?;
        info!(
            "switching outlet {} of {} {}",
            index,
            host,
            if on { "on" } else { "off" }
        );
        power_set(self.backend()?, host, port, index, on)
    }
}
impl Driver for NetworkPowerDriver {
    fn kind(&self) -> &'static str {
        "NetworkPowerDriver"
    }

    fn protocols(&self) -> &'static [Protocol] {
        &[Protocol::Power]
    }

    fn bindings(&self) -> &'static [Binding] {
        BINDINGS
    }

    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()> {
        match slot {
            "port" => {
                let outlet = supplier.into_resource(slot)?;
                self.backend = match outlet.kind() {
                    ResourceKind::PowerOutlet { model, .. } => Some(self.backends.get(model)?),
                    _ => None,
                };
                self.outlet = Some(outlet);
            }
            _ => return Err(unknown_slot(self.kind(), slot)),
        }
        Ok(())
    }

    fn on_activate(&mut self) -> Result<()> {
        self.outlet()?;
        self.backend().map(|_| ())
    }

    fn as_power(&mut self) -> Option<&mut dyn PowerProtocol> {
        Some(self)
    }
}
impl PowerProtocol for NetworkPowerDriver {
    fn on(&mut self) -> Result<()> {
        self.switch(true)
    }

    fn off(&mut self) -> Result<()> {
        self.switch(false)
    }

    fn cycle(&mut self) -> Result<()> {
        self.switch(false)?;
        thread::sleep(self.config.cycle_delay);
        self.switch(true)
    }

    fn get(&mut self) -> Result<bool> {
        let (host, port, index) = self.outlet()?;
        power_get(self.backend()?, host, port, index)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::Target;

    #[derive(Default)]
    struct Outlets {
        state: RefCell<Vec<(u32, bool)>>,
    }
    impl PowerBackend for Outlets {
        fn max_index(&self) -> u32 {
            8
        }
        fn set(&self, _host: &str, _port: Option<u16>, index: u32, on: bool) -> Result<()> {
            self.state.borrow_mut().push((index, on));
            Ok(())
        }
        fn get(&self, _host: &str, _port: Option<u16>, index: u32) -> Result<bool> {
            Ok(self
                .state
                .borrow()
                .iter()
                .rev()
                .find(|(i, _)| *i == index)
                .map_or(false, |(_, on)| *on))
        }
    }

    fn outlet(index: u32) -> Resource {
        Resource::new(
            "outlet",
            ResourceKind::PowerOutlet {
                model: "fake".into(),
                host: "pdu.lab".into(),
                port: None,
                index,
            },
        )
    }

    fn setup(index: u32, backend: &Rc<Outlets>) -> (Target, crate::DriverHandle) {
        let config = NetworkPowerConfig {
            cycle_delay: std::time::Duration::from_millis(0),
        };
        let mut backends = PowerBackends::new();
        backends.register("fake", backend.clone()).unwrap();
        let mut target = Target::new("board");
        target.add_resource(outlet(index)).unwrap();
        let power = target
            .add_driver(
                "pdu",
                Box::new(NetworkPowerDriver::new(config, Rc::new(backends))),
            )
            .unwrap();
        (target, power)
    }

    #[test]
    fn cycle_switches_off_then_on() {
        let backend = Rc::new(Outlets::default());
        let (mut target, power) = setup(3, &backend);
        target.activate(&power).unwrap();
        power.with_power(|p| p.cycle()).unwrap();
        assert!(power.with_power(|p| p.get()).unwrap());
        assert_eq!(*backend.state.borrow(), vec![(3, false), (3, true)]);
    }

    #[test]
    fn unknown_model_fails_activation() {
        let mut target = Target::new("board");
        target.add_resource(outlet(1)).unwrap();
        let power = target
            .add_driver(
                "pdu",
                Box::new(NetworkPowerDriver::new(
                    NetworkPowerConfig::default(),
                    Rc::new(PowerBackends::with_builtins()),
                )),
            )
            .unwrap();
        assert!(matches!(
            target.activate(&power),
            Err(Error::Configuration(_))
        ));
        assert!(!power.is_active());
    }

    #[test]
    fn out_of_range_outlet_fails_without_switching() {
        let backend = Rc::new(Outlets::default());
        let (mut target, power) = setup(9, &backend);
        target.activate(&power).unwrap();
        assert!(matches!(
            power.with_power(|p| p.on()),
            Err(Error::OutOfRange { index: 9, max: 8 })
        ));
        assert!(backend.state.borrow().is_empty());
    }
}
