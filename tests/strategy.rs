//! End to end transitions of the U-Boot strategy against a scripted console.

use std::cell::RefCell;
use std::rc::Rc;

use hutctl::console::ScriptedTransport;
use hutctl::power::PowerBackends;
use hutctl::{
    Error, PowerBackend, Registry, Resource, ResourceKind, SerialSettingsBuilder, Settings,
    SettingsBuilder, Status, Strategy, Target, UBootConfig, UBootStrategy,
};

const SHELL_PROMPT: &str = "root@board:~# ";

const EC_REBOOT_LOG: &str = "[   42.000000] reboot: Restarting system\r\n\
     UART initialized after reboot\r\n\
     Reset cause: reset-pin soft\r\n\
     power state 4 = G3->S5\r\n\
     power state 3 = S0\r\n\
     \r\nU-Boot 2021.01\r\n\
     Hit any key to stop autoboot:  2 ";

fn settings() -> Settings {
    SettingsBuilder::new()
        .without_delays()
        .uboot(UBootConfig {
            interrupt: "stop\n".into(),
            ..UBootConfig::default()
        })
        .finalize()
}

/// A console answering like an EC-powered board booting into Linux.
fn board_console() -> ScriptedTransport {
    ScriptedTransport::new()
        .on("powerinfo", "power state 0 = G3\r\n> ")
        .on("reboot", EC_REBOOT_LOG)
        .on("stop", "\r\n=> ")
        .on("run bootcmd", "## Booting kernel\r\nStarting kernel ...\r\n\r\n")
        .on("", "\r\nboard login: ")
        .on("root", &format!("\r\n{}", SHELL_PROMPT))
}

fn ec_board(script: &ScriptedTransport) -> UBootStrategy {
    let settings = settings();
    let registry = Registry::with_opener(
        &settings,
        Rc::new(script.clone()),
        PowerBackends::with_builtins(),
    );
    let mut target = Target::new("hut");
    target
        .add_resource(Resource::new(
            "console",
            ResourceKind::SerialPort(SerialSettingsBuilder::new().path("/dev/ttyUSB0").finalize()),
        ))
        .unwrap();
    for (kind, name) in &[
        ("SerialDriver", "serial"),
        ("ChromiumEcPowerDriver", "power"),
        ("UBootDriver", "uboot"),
        ("ShellDriver", "shell"),
    ] {
        registry.add_driver(&mut target, kind, name).unwrap();
    }
    UBootStrategy::new(target, settings.strategy).unwrap()
}

fn is_system_running(line: &str) -> bool {
    line.starts_with("echo '") && line.contains("; systemctl is-system-running --wait; ")
}

#[test]
fn unknown_to_shell_walks_every_hop() {
    let script =
        board_console().on_command("systemctl is-system-running --wait", &["running"], 0, SHELL_PROMPT);
    let mut strategy = ec_board(&script);

    strategy.transition(Status::Shell).unwrap();
    assert_eq!(strategy.status(), Status::Shell);

    let writes = script.writes();
    assert_eq!(
        &writes[..8],
        &["apshutdown", "powerinfo", "powerinfo", "reboot", "stop", "run bootcmd", "", "root"]
    );
    assert_eq!(writes.len(), 9);
    assert!(is_system_running(&writes[8]), "{}", writes[8]);

    let target = strategy.target();
    assert!(target.driver("shell").unwrap().is_active());
    assert!(target.driver("power").unwrap().is_active());
    // the shell took over the command protocol from U-Boot
    assert!(!target.driver("uboot").unwrap().is_active());
    assert_eq!(script.open_count(), 1);
}

#[test]
fn transition_to_the_current_state_does_nothing() {
    let script =
        board_console().on_command("systemctl is-system-running --wait", &["degraded"], 1, SHELL_PROMPT);
    let mut strategy = ec_board(&script);
    strategy.transition(Status::Shell).unwrap();

    let before = script.writes().len();
    strategy.transition(Status::Shell).unwrap();
    assert_eq!(script.writes().len(), before);
    assert_eq!(script.open_count(), 1);
}

#[test]
fn startup_timeout_leaves_the_board_in_the_bootloader_state() {
    let script = board_console();
    let mut strategy = ec_board(&script);

    let err = strategy.transition(Status::Shell).unwrap_err();
    assert!(err.is_timeout(), "{}", err);
    match &err {
        Error::Transition { state, step, .. } => {
            assert_eq!(*state, Status::Shell);
            assert_eq!(step, "wait for system startup");
        }
        other => panic!("unexpected {}", other),
    }
    assert_eq!(strategy.status(), Status::Bootloader);
    assert!(is_system_running(script.writes().last().unwrap()));
}

#[test]
fn reboot_then_bootloader_skips_the_power_cycle() {
    let script =
        board_console().on_command("systemctl is-system-running --wait", &["running"], 0, SHELL_PROMPT);
    let mut strategy = ec_board(&script);
    strategy.transition(Status::Shell).unwrap();
    let cold_boot = script.writes().len();

    strategy.transition(Status::Reboot).unwrap();
    assert_eq!(strategy.status(), Status::Reboot);
    strategy.transition(Status::Bootloader).unwrap();
    assert_eq!(strategy.status(), Status::Bootloader);

    // no apshutdown, no powerinfo and no second reboot
    assert_eq!(&script.writes()[cold_boot..], &["reboot", "stop"]);
}

#[test]
fn poweroff_accepts_a_closed_console() {
    let script = board_console()
        .on_command("systemctl is-system-running --wait", &["running"], 0, SHELL_PROMPT)
        .close_on("poweroff");
    let mut strategy = ec_board(&script);
    strategy.transition(Status::Poweroff).unwrap();
    assert_eq!(strategy.status(), Status::Poweroff);
    assert_eq!(script.writes().last().unwrap(), "poweroff");
}

#[test]
fn forced_state_is_trusted() {
    let script = board_console();
    let mut strategy = ec_board(&script);

    strategy.force(Status::Shell).unwrap();
    assert_eq!(strategy.status(), Status::Shell);
    strategy.transition(Status::Shell).unwrap();
    assert!(script.writes().is_empty());

    // the shell is now reachable: rebooting goes straight to the console
    strategy.transition(Status::Reboot).unwrap();
    assert_eq!(script.writes(), vec!["reboot"]);
}

#[test]
fn unknown_states_are_rejected() {
    let script = board_console();
    let mut strategy = ec_board(&script);
    for state in &["unknown", "suspend"] {
        let err = hutctl::strategy::request(&mut strategy, state, false).unwrap_err();
        assert!(matches!(err, Error::Strategy(_)), "{}", err);
    }
    assert!(matches!(
        hutctl::strategy::request(&mut strategy, "reboot", true),
        Err(Error::Strategy(_))
    ));
    assert_eq!(strategy.status(), Status::Unknown);
    assert!(script.writes().is_empty());
}

// =============================================================================
// Network Power Switch
// =============================================================================

/// Records outlet switching and plays the bootloader banner on power up.
struct FakeSwitch {
    console: ScriptedTransport,
    calls: RefCell<Vec<(String, u32, bool)>>,
}
impl PowerBackend for FakeSwitch {
    fn max_index(&self) -> u32 {
        8
    }

    fn set(&self, host: &str, _port: Option<u16>, index: u32, on: bool) -> hutctl::Result<()> {
        self.calls.borrow_mut().push((host.to_owned(), index, on));
        if on {
            self.console.emit("U-Boot 2021.01\r\nHit any key to stop autoboot:  2 ");
        }
        Ok(())
    }

    fn get(&self, _host: &str, _port: Option<u16>, _index: u32) -> hutctl::Result<bool> {
        Ok(self.calls.borrow().last().map_or(false, |call| call.2))
    }
}

fn outlet_board(script: &ScriptedTransport, index: u32) -> (UBootStrategy, Rc<FakeSwitch>) {
    let switch = Rc::new(FakeSwitch {
        console: script.clone(),
        calls: RefCell::new(Vec::new()),
    });
    let mut backends = PowerBackends::new();
    backends.register("fake", switch.clone()).unwrap();

    let settings = settings();
    let registry = Registry::with_opener(&settings, Rc::new(script.clone()), backends);
    let mut target = Target::new("hut");
    target
        .add_resource(Resource::new(
            "console",
            ResourceKind::SerialPort(SerialSettingsBuilder::new().finalize()),
        ))
        .unwrap();
    target
        .add_resource(Resource::new(
            "outlet",
            ResourceKind::PowerOutlet {
                model: "fake".into(),
                host: "pdu.lab".into(),
                port: None,
                index,
            },
        ))
        .unwrap();
    for (kind, name) in &[
        ("SerialDriver", "serial"),
        ("NetworkPowerDriver", "power"),
        ("UBootDriver", "uboot"),
        ("ShellDriver", "shell"),
    ] {
        registry.add_driver(&mut target, kind, name).unwrap();
    }
    (UBootStrategy::new(target, settings.strategy).unwrap(), switch)
}

#[test]
fn outlet_power_reaches_the_bootloader() {
    let script = board_console();
    let (mut strategy, switch) = outlet_board(&script, 3);

    strategy.transition(Status::Off).unwrap();
    // powering off needs no console
    assert_eq!(script.open_count(), 0);

    strategy.transition(Status::Bootloader).unwrap();
    assert_eq!(
        *switch.calls.borrow(),
        vec![
            ("pdu.lab".to_string(), 3, false),
            ("pdu.lab".to_string(), 3, false),
            ("pdu.lab".to_string(), 3, true),
        ]
    );
    assert_eq!(script.writes(), vec!["stop"]);
    assert_eq!(strategy.status(), Status::Bootloader);
}

#[test]
fn outlet_out_of_range_fails_before_switching() {
    let script = board_console();
    let (mut strategy, switch) = outlet_board(&script, 9);

    let err = strategy.transition(Status::Off).unwrap_err();
    assert!(
        matches!(err.root_cause(), Error::OutOfRange { index: 9, max: 8 }),
        "{}",
        err
    );
    assert!(switch.calls.borrow().is_empty());
    assert_eq!(strategy.status(), Status::Unknown);
}

#[test]
fn console_closed_by_reboot_is_reopened_for_the_bootloader() {
    let script = ScriptedTransport::new()
        .close_on("reboot")
        .on("stop", "\r\n=> ")
        .on("run bootcmd", "## Booting kernel\r\nStarting kernel ...\r\n\r\n")
        .on("", "\r\nboard login: ")
        .on("root", &format!("\r\n{}", SHELL_PROMPT))
        .on_command("systemctl is-system-running --wait", &["running"], 0, SHELL_PROMPT);
    let (mut strategy, switch) = outlet_board(&script, 1);
    strategy.transition(Status::Shell).unwrap();
    let cold_boot = script.writes().len();

    strategy.transition(Status::Reboot).unwrap();
    assert_eq!(strategy.status(), Status::Reboot);
    assert!(!strategy.target().driver("serial").unwrap().is_active());
    assert!(!strategy.target().driver("shell").unwrap().is_active());

    script.emit("U-Boot 2021.01\r\nHit any key to stop autoboot:  2 ");
    strategy.transition(Status::Bootloader).unwrap();
    assert_eq!(strategy.status(), Status::Bootloader);
    assert_eq!(script.open_count(), 2);
    assert_eq!(&script.writes()[cold_boot..], &["reboot", "stop"]);
    // the outlet was only switched for the cold boot
    assert_eq!(switch.calls.borrow().len(), 3);
}
