use std::rc::Rc;
use std::time::Duration;

use log::debug;

use super::{unbound, unknown_slot, Binding, Driver, Requirement, Supplier};
use crate::console::{Match, Pattern, Session, TransportOpener};
use crate::error::{Error, Result};
use crate::protocol::{ConsoleProtocol, Protocol};
use crate::resource::{Resource, ResourceClass, ResourceKind};

const BINDINGS: &[Binding] = &[Binding {
    slot: "port",
    accepts: &[Requirement::Resource(ResourceClass::SerialPort)],
}];

/// Console over a serial port resource.
///
/// The port is opened on activation and closed on deactivation, so whatever
/// the board printed while no console driver was active is lost.
pub struct SerialDriver {
    opener: Rc<dyn TransportOpener>,
    port: Option<Rc<Resource>>,
    session: Option<Session>,
}
impl SerialDriver {
    pub fn new(opener: Rc<dyn TransportOpener>) -> Self {
        SerialDriver {
            opener,
            port: None,
            session: None,
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::NotActive("SerialDriver console".into()))
    }
}
impl Driver for SerialDriver {
    fn kind(&self) -> &'static str {
        "SerialDriver"
    }

    fn protocols(&self) -> &'static [Protocol] {
        &[Protocol::Console]
    }

    fn bindings(&self) -> &'static [Binding] {
        BINDINGS
    }

    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()> {
        match slot {
            "port" => self.port = Some(supplier.into_resource(slot)?),
            _ => return Err(unknown_slot(self.kind(), slot)),
        }
        Ok(())
    }

    fn on_activate(&mut self) -> Result<()> {
        let port = self.port.as_ref().ok_or_else(|| unbound("SerialDriver", "port"))?;
        let settings = match port.kind() {
            ResourceKind::SerialPort(settings) => settings,
            other => {
                return Err(Error::Binding(format!(
                    "resource `{}` is a {}, not a serial port",
                    port.name(),
                    other.class()
                )))
            }
        };
        debug!("opening console on `{}`", port.name());
        self.session = Some(Session::new(self.opener.open(settings)?));
        Ok(())
    }

    fn on_deactivate(&mut self) -> Result<()> {
        self.session = None;
        Ok(())
    }

    fn as_console(&mut self) -> Option<&mut dyn ConsoleProtocol> {
        Some(self)
    }
}
impl ConsoleProtocol for SerialDriver {
    fn write(&mut self, text: &str) -> Result<()> {
        self.session()?.send(text)
    }

    fn sendline(&mut self, line: &str) -> Result<()> {
        self.session()?.sendline(line)
    }

    fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> Result<Match> {
        self.session()?.expect(patterns, timeout)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedTransport;
    use crate::settings::SerialSettingsBuilder;
    use crate::Target;

    #[test]
    fn console_opens_on_activation_only() {
        let script = ScriptedTransport::new().on("version", "Chip: stm32\n");
        let mut target = Target::new("board");
        target
            .add_resource(Resource::new(
                "tty",
                ResourceKind::SerialPort(SerialSettingsBuilder::new().path("/dev/ttyUSB0").finalize()),
            ))
            .unwrap();
        let serial = target
            .add_driver("serial", Box::new(SerialDriver::new(Rc::new(script.clone()))))
            .unwrap();

        assert!(matches!(
            serial.with_console(|c| c.sendline("version")),
            Err(Error::NotActive(_))
        ));
        assert_eq!(script.open_count(), 0);

        target.activate(&serial).unwrap();
        let found = serial
            .with_console(|c| {
                c.sendline("version")?;
                c.expect(&[Pattern::regex(r"Chip: (\w+)")?], Duration::from_secs(1))
            })
            .unwrap();
        assert_eq!(found.groups, vec![Some("stm32".to_string())]);
        assert_eq!(script.open_count(), 1);

        target.deactivate(&serial).unwrap();
        target.activate(&serial).unwrap();
        assert_eq!(script.open_count(), 2);
    }
}
