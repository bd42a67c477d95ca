//! Hutctl command line interface.

use std::error::Error as _;
use std::process;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches,
};
use console::{style, Term};
use dialoguer::{theme::ColorfulTheme, Select};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, trace, warn, LevelFilter};
use simplelog::*;

use hutctl::{
    self as hc, DataBits, FlowControl, Parity, PortWait, Registry, Resource, ResourceKind,
    SerialSettings, Settings, Status, StopBits, Strategy, Target, UBootStrategy,
};

const CONSOLE_RESOURCE: &str = "console";
const OUTLET_RESOURCE: &str = "outlet";

fn main() {
    println!("[HUT] hutctl v{}", crate_version!());

    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(1);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Hutctl brings a board under test to the requested state, walking \
            through the states it depends on:\n\
            \n\
               \t* off        - the board supply is cut \n\
               \t* bootloader - the board sits at the U-Boot prompt \n\
               \t* shell      - logged in, all startup units settled \n\
               \t* reboot     - a reboot was issued from the shell \n\
               \t* poweroff   - a power down was issued from the shell \n\
            \n\
            The board console is a serial port. Power is switched either \
            through the ChromiumOS EC on that same console, or through an \
            outlet of a network power switch.\n\
            \n\
            With --force, the board is assumed to already be in the given \
            state and nothing is sent to it.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device of the board console")
                .long_help(
                    "the USB tty device of the board console; when not set, \
                     `hutctl` lets you select one of the serial ports present \
                     on the system.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("POWER")
                .help("how the board supply is switched")
                .long_help(
                    "how the board supply is switched: `ec` for the ChromiumOS \
                     embedded controller on the board console, or the model of \
                     a network power switch (e.g. `apc`), in which case \
                     --pdu-host and --outlet are required.",
                )
                .long("--power")
                .takes_value(true)
                .default_value("ec")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PDU_HOST")
                .help("host name or address of the network power switch")
                .long("--pdu-host")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PDU_PORT")
                .help("management port of the network power switch")
                .long("--pdu-port")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("OUTLET")
                .help("outlet of the network power switch feeding the board")
                .long("--outlet")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("SYSTEMD_TIMEOUT")
                .help("seconds to wait for all startup units to settle")
                .long("--systemd-timeout")
                .takes_value(true)
                .default_value("30")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FORCE")
                .help("record the state without touching the board")
                .long("--force"),
        )
        .arg(
            Arg::with_name("STATE")
                .help("the state to bring the board to")
                .long_help(
                    "the state to bring the board to; when not set, `hutctl` \
                     lets you select one.",
                )
                .possible_values(&["off", "bootloader", "uboot", "shell", "reboot", "poweroff"])
                .index(1),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'hutctl -v -v -v' or 'hutctl -vvv' vs 'hutctl -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value

    let baud_rate = numeric_or_exit::<u32>(&matches, "BAUD_RATE", "baud-rate");
    let systemd_timeout = numeric_or_exit::<u64>(&matches, "SYSTEMD_TIMEOUT", "systemd-timeout");

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    // END - Arguments with default values =====================================

    let mut serial = hc::SerialSettingsBuilder::new()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .finalize();

    let settings = hc::SettingsBuilder::new()
        .systemd_timeout(Duration::from_secs(systemd_timeout))
        .finalize();

    // START - Arguments with NO default values ================================

    let power = power_switch(&matches);

    let state = match matches.value_of("STATE") {
        Some(state) => state.to_owned(),
        None => select_state().unwrap_or_else(|| {
            println!("❌ No state selected");
            process::exit(1);
        }),
    };

    serial.path = Some(match matches.value_of("DEVICE_TTY") {
        Some(path) => path.to_owned(),
        None => loop {
            if let Some(path) = hc::select_port() {
                break path;
            }
        },
    });

    // END - Arguments =========================================================

    // Drive the board =========================================================

    let force = matches.is_present("FORCE");
    let exit_code = match run(serial, &settings, power, &state, force) {
        Ok(status) => {
            println!("👍 board is in state {}", style(status).green());
            0
        }
        Err(e) => {
            report(&e);
            1
        }
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

/// Where the board supply comes from.
enum PowerSwitch {
    Ec,
    Outlet {
        model: String,
        host: String,
        port: Option<u16>,
        index: u32,
    },
}

fn power_switch(matches: &ArgMatches<'_>) -> PowerSwitch {
    let model = matches.value_of("POWER").unwrap();
    if model == "ec" {
        return PowerSwitch::Ec;
    }

    let host = matches.value_of("PDU_HOST").unwrap_or_else(|| {
        println!(
            "{}: `{}` is required with --power={}",
            style("error").red(),
            style("pdu-host").cyan(),
            model
        );
        process::exit(1);
    });
    if !matches.is_present("OUTLET") {
        println!(
            "{}: `{}` is required with --power={}",
            style("error").red(),
            style("outlet").cyan(),
            model
        );
        process::exit(1);
    }
    let index = numeric_or_exit::<u32>(matches, "OUTLET", "outlet");
    let port = if matches.is_present("PDU_PORT") {
        Some(numeric_or_exit::<u16>(matches, "PDU_PORT", "pdu-port"))
    } else {
        None
    };

    PowerSwitch::Outlet {
        model: model.to_owned(),
        host: host.to_owned(),
        port,
        index,
    }
}

fn numeric_or_exit<T: std::str::FromStr>(matches: &ArgMatches<'_>, arg: &str, flag: &str) -> T {
    value_t!(matches.value_of(arg), T).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(flag).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of(arg).unwrap_or_default()).on_red()
        );
        process::exit(1);
    })
}

fn select_state() -> Option<String> {
    let states: Vec<&str> = Status::ALL.iter().skip(1).map(|s| s.name()).collect();
    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();
    let selection = Select::with_theme(&theme)
        .with_prompt("Bring the board to")
        .items(&states)
        .default(0)
        .interact_on_opt(&term);
    match selection {
        Ok(selection) => selection.map(|index| states[index].to_owned()),
        Err(e) => {
            warn!("state selection failed: {}", e);
            None
        }
    }
}

/// Assemble the board, wait for its console and run the request.
fn run(
    serial: SerialSettings,
    settings: &Settings,
    power: PowerSwitch,
    state: &str,
    force: bool,
) -> hc::Result<Status> {
    let path = serial.path.clone().unwrap_or_default();
    let mut target = board(serial, settings, power)?;

    match hc::wait_for_port(&path) {
        PortWait::Ready => target.detect(CONSOLE_RESOURCE)?,
        PortWait::Cancelled | PortWait::Interrupted => {
            return Err(hc::Error::Strategy(format!(
                "gave up waiting for the console on {}",
                path
            )))
        }
    }

    let mut strategy = UBootStrategy::new(target, settings.strategy.clone())?;

    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[HUT] {spinner:.blue} {msg}"),
    );
    pb.set_message(format!("Bringing the board to {}...", style(state).cyan()));
    let result = hc::strategy::request(&mut strategy, state, force);
    pb.finish_and_clear();

    if let Err(e) = strategy.target_mut().deactivate_all() {
        warn!("failed to release the board drivers: {}", e);
    }
    result.map(|_| strategy.status())
}

fn board(serial: SerialSettings, settings: &Settings, power: PowerSwitch) -> hc::Result<Target> {
    let registry = Registry::with_builtins(settings);
    let mut target = Target::new("hut");

    target.add_resource(Resource::managed(
        CONSOLE_RESOURCE,
        ResourceKind::SerialPort(serial),
    ))?;
    registry.add_driver(&mut target, "SerialDriver", "serial")?;

    match power {
        PowerSwitch::Ec => {
            registry.add_driver(&mut target, "ChromiumEcPowerDriver", "power")?;
        }
        PowerSwitch::Outlet {
            model,
            host,
            port,
            index,
        } => {
            registry.power_backend(&model)?;
            target.add_resource(Resource::new(
                OUTLET_RESOURCE,
                ResourceKind::PowerOutlet {
                    model,
                    host,
                    port,
                    index,
                },
            ))?;
            registry.add_driver(&mut target, "NetworkPowerDriver", "power")?;
        }
    }

    registry.add_driver(&mut target, "UBootDriver", "uboot")?;
    registry.add_driver(&mut target, "ShellDriver", "shell")?;
    Ok(target)
}

fn report(e: &hc::Error) {
    println!("{}: {}", style("error").red(), e);
    let mut cause = e.source();
    while let Some(inner) = cause {
        println!("   {} {}", style("caused by").cyan(), inner);
        cause = inner.source();
    }
}
