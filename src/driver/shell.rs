use std::time::Duration;

use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::{bound, unknown_slot, Binding, Driver, DriverHandle, Requirement, Supplier};
use crate::console::Pattern;
use crate::error::{Error, Result};
use crate::protocol::{CommandOutput, CommandProtocol, Protocol};
use crate::settings::ShellConfig;

const BINDINGS: &[Binding] = &[Binding {
    slot: "console",
    accepts: &[Requirement::Protocol(Protocol::Console)],
}];

const MARKER_LEN: usize = 10;

/// Run `cmd` at a prompt matching `prompt` and collect its output.
///
/// The command line is framed by a random marker, echoed split in two so
/// the terminal echo of the line itself never matches:
///
/// ```text
///  -> echo 'aBcD''e1F2g3'; ls /; echo "$?"; echo 'aBcD''e1F2g3';
///  <- aBcDe1F2g3
///     bin
///     ...
///     0
///     aBcDe1F2g3
///     root@board:~#
/// ```
pub(crate) fn run_framed(
    console: &DriverHandle,
    cmd: &str,
    prompt: &str,
    timeout: Duration,
) -> Result<CommandOutput> {
    let marker: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MARKER_LEN)
        .map(char::from)
        .collect();
    let (head, tail) = marker.split_at(4);
    let line = format!(
        "echo '{h}''{t}'; {cmd}; echo \"$?\"; echo '{h}''{t}';",
        h = head,
        t = tail,
        cmd = cmd
    );
    let framed = Pattern::regex(&format!(r"(?s){m}(.*){m}\s+(?:{p})", m = marker, p = prompt))?;

    debug!("running `{}`", cmd);
    let found = console.with_console(|c| {
        c.sendline(&line)?;
        c.expect(&[framed], timeout)
    })?;
    let body = found
        .groups
        .first()
        .cloned()
        .flatten()
        .unwrap_or_default();
    parse_framed(&body)
}

fn parse_framed(body: &str) -> Result<CommandOutput> {
    let lines: Vec<&str> = body.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    if lines.len() < 3 {
        return Err(Error::Execution(format!(
            "malformed command output: {:?}",
            body
        )));
    }
    let mut stdout: Vec<String> = lines[1..lines.len() - 1]
        .iter()
        .map(|l| (*l).to_owned())
        .collect();
    let status = stdout.pop().unwrap_or_default();
    let exit_code = status.trim().parse().map_err(|_| {
        Error::Execution(format!("command exit status is not a number: {:?}", status))
    })?;
    Ok(CommandOutput { stdout, exit_code })
}

/// Linux shell on a console: logs in on activation, then runs commands.
pub struct ShellDriver {
    config: ShellConfig,
    console: Option<DriverHandle>,
}
impl ShellDriver {
    pub fn new(config: ShellConfig) -> Self {
        ShellDriver {
            config,
            console: None,
        }
    }

    fn console(&self) -> Result<&DriverHandle> {
        bound(&self.console, "ShellDriver", "console")
    }

    /// Poke the console and log in if a login prompt shows up.
    fn login(&self) -> Result<()> {
        let config = &self.config;
        let prompt = Pattern::regex(&config.prompt)?;
        let login_prompt = Pattern::regex(&config.login_prompt)?;
        let password_prompt = Pattern::regex(&config.password_prompt)?;
        let timeout = config.login_timeout;

        self.console()?.with_console(|c| {
            c.sendline("")?;
            let found = c.expect(&[login_prompt, prompt.clone()], timeout)?;
            if found.index == 1 {
                debug!("shell already logged in");
                return Ok(());
            }

            info!("logging in as {}", config.username);
            c.sendline(&config.username)?;
            if let Some(password) = &config.password {
                c.expect(&[password_prompt], timeout)?;
                c.sendline(password)?;
            }
            c.expect(&[prompt], timeout)?;
            Ok(())
        })
    }
}
impl Driver for ShellDriver {
    fn kind(&self) -> &'static str {
        "ShellDriver"
    }

    fn protocols(&self) -> &'static [Protocol] {
        &[Protocol::Shell, Protocol::Command]
    }

    fn bindings(&self) -> &'static [Binding] {
        BINDINGS
    }

    fn bind(&mut self, slot: &str, supplier: Supplier) -> Result<()> {
        match slot {
            "console" => self.console = Some(supplier.into_driver(slot)?),
            _ => return Err(unknown_slot(self.kind(), slot)),
        }
        Ok(())
    }

    fn on_activate(&mut self) -> Result<()> {
        self.login()
    }

    fn on_adopt(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_command(&mut self) -> Option<&mut dyn CommandProtocol> {
        Some(self)
    }
}
impl CommandProtocol for ShellDriver {
    fn run(&mut self, cmd: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
        let timeout = timeout.unwrap_or(self.config.command_timeout);
        run_framed(self.console()?, cmd, &self.config.prompt, timeout)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::console::ScriptedTransport;
    use crate::driver::SerialDriver;
    use crate::resource::{Resource, ResourceKind};
    use crate::settings::SerialSettingsBuilder;
    use crate::Target;

    const PROMPT: &str = "root@board:~# ";

    fn setup(script: &ScriptedTransport, config: ShellConfig) -> (Target, DriverHandle) {
        let mut target = Target::new("board");
        target
            .add_resource(Resource::new(
                "tty",
                ResourceKind::SerialPort(SerialSettingsBuilder::new().finalize()),
            ))
            .unwrap();
        target
            .add_driver("serial", Box::new(SerialDriver::new(Rc::new(script.clone()))))
            .unwrap();
        let shell = target
            .add_driver("shell", Box::new(ShellDriver::new(config)))
            .unwrap();
        (target, shell)
    }

    #[test]
    fn parses_framed_output() {
        let out = parse_framed("\r\nbin\r\netc\r\n0\r\n").unwrap();
        assert_eq!(out.stdout, vec!["bin", "etc"]);
        assert_eq!(out.exit_code, 0);

        let out = parse_framed("\n127\n").unwrap();
        assert!(out.stdout.is_empty());
        assert_eq!(out.exit_code, 127);

        assert!(parse_framed("\ngarbage\n").is_err());
    }

    #[test]
    fn logs_in_with_password() {
        let script = ScriptedTransport::new()
            .on("", "\r\nboard login: ")
            .on("root", "Password: ")
            .on("secret", &format!("Last login: never\r\n{}", PROMPT));
        let config = ShellConfig {
            password: Some("secret".into()),
            ..ShellConfig::default()
        };
        let (mut target, shell) = setup(&script, config);
        target.activate(&shell).unwrap();
        assert_eq!(script.writes(), vec!["", "root", "secret"]);
    }

    #[test]
    fn skips_login_at_prompt() {
        let script = ScriptedTransport::new().on("", PROMPT);
        let (mut target, shell) = setup(&script, ShellConfig::default());
        target.activate(&shell).unwrap();
        assert_eq!(script.writes(), vec![""]);
    }

    #[test]
    fn adoption_is_silent() {
        let script = ScriptedTransport::new();
        let (mut target, shell) = setup(&script, ShellConfig::default());
        target.adopt(&shell).unwrap();
        assert!(shell.is_active());
        assert!(script.writes().is_empty());
    }

    #[test]
    fn run_collects_output_and_status() {
        let script = ScriptedTransport::new()
            .on("", PROMPT)
            .on_command("cat /etc/hostname", &["board"], 0, PROMPT)
            .on_command("false", &[], 1, PROMPT);
        let (mut target, shell) = setup(&script, ShellConfig::default());
        target.activate(&shell).unwrap();

        let out = shell
            .with_command(|c| c.run("cat /etc/hostname", None))
            .unwrap();
        assert_eq!(out.stdout, vec!["board"]);
        assert_eq!(out.exit_code, 0);

        assert!(matches!(
            shell.with_command(|c| c.run_check("false", None)),
            Err(Error::Execution(_))
        ));
    }

    #[test]
    fn prompt_alternatives_stay_inside_the_frame() {
        let script = ScriptedTransport::new()
            .on("", PROMPT)
            .on_command("uname", &["Linux"], 0, PROMPT);
        let config = ShellConfig {
            prompt: r"\$ |root@board:~# ".into(),
            ..ShellConfig::default()
        };
        let (mut target, shell) = setup(&script, config);
        target.activate(&shell).unwrap();

        let out = shell.with_command(|c| c.run("uname", None)).unwrap();
        assert_eq!(out.stdout, vec!["Linux"]);
        assert_eq!(out.exit_code, 0);
    }
}
