use std::path::PathBuf;

use anyhow::{bail, Context};

use calblink_common::{PrefsOverrides, ResponseState};

pub const USAGE: &str = "\
Usage: calblink [options]

  --debug                       Show debug messages
  --config <path>               Preferences file (default conf.json, or $CALBLINK_CONFIG)
  --events <path>               Calendar event file (default events.json, or $CALBLINK_EVENTS)
  --calendar <id>               Calendar to watch (overrides the preferences file)
  --poll_interval <seconds>     Seconds between calendar polls (overrides the preferences file)
  --response_state <state>      Events to consider: all, accepted or notRejected
  --device_failure_retries <n>  Device failures tolerated before quitting
  --show_dots[=<bool>]          Print a progress symbol after every check
  --runAsService[=<bool>]       Run headless: no progress symbols
  --service <action>            Not supported; use a service manager with --runAsService
  --help                        Show this message
";

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub debug: bool,
    pub config: PathBuf,
    pub events: PathBuf,
    pub run_as_service: bool,
    pub overrides: PrefsOverrides,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            debug: false,
            config: std::env::var("CALBLINK_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("conf.json")),
            events: std::env::var("CALBLINK_EVENTS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("events.json")),
            run_as_service: false,
            overrides: PrefsOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(CliArgs),
    Help,
}

/// Accepts `--flag value`, `--flag=value` and single-dash spellings.
/// Boolean switches default to true when given without a value.
pub fn parse<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            bail!("unexpected argument {arg:?}\n\n{USAGE}");
        };
        let (name, inline) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag, None),
        };

        match name {
            "help" | "h" => return Ok(Command::Help),
            "debug" => cli.debug = switch(name, inline)?,
            "runAsService" => cli.run_as_service = switch(name, inline)?,
            "show_dots" => cli.overrides.show_dots = Some(switch(name, inline)?),
            "config" => cli.config = value(name, inline, &mut args)?.into(),
            "events" => cli.events = value(name, inline, &mut args)?.into(),
            "calendar" => cli.overrides.calendar = Some(value(name, inline, &mut args)?),
            "poll_interval" => {
                let raw = value(name, inline, &mut args)?;
                let seconds = raw
                    .parse::<u64>()
                    .with_context(|| format!("invalid --poll_interval {raw:?}"))?;
                if seconds == 0 {
                    bail!("--poll_interval must be greater than zero");
                }
                cli.overrides.poll_interval = Some(seconds);
            }
            "response_state" => {
                let raw = value(name, inline, &mut args)?;
                cli.overrides.response_state = Some(raw.parse::<ResponseState>()?);
            }
            "device_failure_retries" => {
                let raw = value(name, inline, &mut args)?;
                let retries = raw
                    .parse::<u32>()
                    .with_context(|| format!("invalid --device_failure_retries {raw:?}"))?;
                cli.overrides.device_failure_retries = Some(retries);
            }
            "service" => bail!(
                "service control is not supported in this build; \
                 run calblink under a service manager with --runAsService"
            ),
            other => bail!("unknown flag --{other}\n\n{USAGE}"),
        }
    }

    Ok(Command::Run(cli))
}

fn switch(name: &str, inline: Option<String>) -> anyhow::Result<bool> {
    match inline {
        None => Ok(true),
        Some(raw) => raw
            .parse::<bool>()
            .with_context(|| format!("invalid boolean for --{name}: {raw:?}")),
    }
}

fn value<I>(name: &str, inline: Option<String>, rest: &mut I) -> anyhow::Result<String>
where
    I: Iterator<Item = String>,
{
    match inline {
        Some(value) => Ok(value),
        None => rest
            .next()
            .with_context(|| format!("--{name} requires a value")),
    }
}
