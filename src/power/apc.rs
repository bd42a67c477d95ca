use std::rc::Rc;

use super::{CommandRunner, PowerBackend, ProcessRunner};
use crate::error::{Error, Result};

/// Outlet control of the APC rack PDU MIB (`sPDUOutletCtl`).
const OID: &str = ".1.3.6.1.4.1.318.1.1.12.3.3.1.1.4";
const OUTLETS: u32 = 24;

/// APC rack PDU (tested with AP8953), switched over SNMP v1 with the
/// net-snmp command line tools.
#[derive(Clone)]
pub struct ApcRpdu {
    runner: Rc<dyn CommandRunner>,
}
impl ApcRpdu {
    pub fn new() -> Self {
        Self::with_runner(Rc::new(ProcessRunner))
    }

    pub fn with_runner(runner: Rc<dyn CommandRunner>) -> Self {
        ApcRpdu { runner }
    }

    fn check_port(port: Option<u16>) -> Result<()> {
        match port {
            None => Ok(()),
            Some(port) => Err(Error::Configuration(format!(
                "APC PDUs are reached over SNMP, got port {}",
                port
            ))),
        }
    }
}
impl Default for ApcRpdu {
    fn default() -> Self {
        Self::new()
    }
}
impl PowerBackend for ApcRpdu {
    fn max_index(&self) -> u32 {
        OUTLETS
    }

    fn set(&self, host: &str, port: Option<u16>, index: u32, on: bool) -> Result<()> {
        Self::check_port(port)?;
        let value = if on { "1" } else { "2" };
        let args: Vec<String> = vec![
            "-v1".into(),
            "-c".into(),
            "private".into(),
            host.into(),
            format!("{}.{}", OID, index),
            "int".into(),
            value.into(),
        ];
        self.runner
            .run("snmpset", &args)
            .map_err(|e| Error::Execution(format!("failed to set SNMP value: {}", e)))?;
        Ok(())
    }

    fn get(&self, host: &str, port: Option<u16>, index: u32) -> Result<bool> {
        Self::check_port(port)?;
        let oid = format!("{}.{}", OID, index);
        let args: Vec<String> = vec![
            "-v1".into(),
            "-c".into(),
            "private".into(),
            "-O".into(),
            "qn".into(),
            host.into(),
            oid.clone(),
        ];
        let output = self.runner.run("snmpget", &args)?;
        let mut fields = output.trim().splitn(2, ' ');
        let (out_oid, value) = (fields.next(), fields.next());
        if out_oid != Some(oid.as_str()) {
            return Err(Error::Execution(format!(
                "snmpget answered for the wrong OID: {:?}",
                output.trim()
            )));
        }
        match value.map(str::trim) {
            Some("1") => Ok(true),
            Some("2") => Ok(false),
            _ => Err(Error::Execution(format!(
                "failed to get SNMP value: {:?}",
                output.trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::power::{power_get, power_set};

    #[derive(Default)]
    struct FakeSnmp {
        reply: String,
        calls: RefCell<Vec<String>>,
    }
    impl CommandRunner for FakeSnmp {
        fn run(&self, program: &str, args: &[String]) -> Result<String> {
            self.calls
                .borrow_mut()
                .push(format!("{} {}", program, args.join(" ")));
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn set_builds_the_snmpset_line() {
        let snmp = Rc::new(FakeSnmp::default());
        let pdu = ApcRpdu::with_runner(snmp.clone());
        power_set(&pdu, "pdu.lab", None, 3, true).unwrap();
        power_set(&pdu, "pdu.lab", None, 24, false).unwrap();
        assert_eq!(
            *snmp.calls.borrow(),
            vec![
                "snmpset -v1 -c private pdu.lab .1.3.6.1.4.1.318.1.1.12.3.3.1.1.4.3 int 1",
                "snmpset -v1 -c private pdu.lab .1.3.6.1.4.1.318.1.1.12.3.3.1.1.4.24 int 2",
            ]
        );
    }

    #[test]
    fn get_parses_the_value() {
        let snmp = Rc::new(FakeSnmp {
            reply: ".1.3.6.1.4.1.318.1.1.12.3.3.1.1.4.5 2\n".into(),
            ..FakeSnmp::default()
        });
        let pdu = ApcRpdu::with_runner(snmp.clone());
        assert!(!power_get(&pdu, "pdu.lab", None, 5).unwrap());
        assert!(matches!(
            power_get(&pdu, "pdu.lab", None, 6),
            Err(Error::Execution(_))
        ));
    }

    #[test]
    fn out_of_range_outlets_never_reach_snmp() {
        let snmp = Rc::new(FakeSnmp::default());
        let pdu = ApcRpdu::with_runner(snmp.clone());
        assert!(matches!(
            power_set(&pdu, "pdu.lab", None, 25, true),
            Err(Error::OutOfRange { index: 25, max: 24 })
        ));
        assert!(power_get(&pdu, "pdu.lab", None, 0).is_err());
        assert!(snmp.calls.borrow().is_empty());
    }

    #[test]
    fn port_is_rejected() {
        let pdu = ApcRpdu::with_runner(Rc::new(FakeSnmp::default()));
        assert!(matches!(
            pdu.set("pdu.lab", Some(161), 1, true),
            Err(Error::Configuration(_))
        ));
    }
}
