//! AT command surface
//!
//! Lines look like `AT+<NAME>=<args>`: the name is matched without regard
//! to case and arguments are `:`-separated. `=?` queries a value.
//!
//! | Command          | Query (`=?`)                 | Set                        |
//! |------------------|------------------------------|----------------------------|
//! | `AT+SENDINT`     | interval in seconds          | `<secs>`, persisted        |
//! | `AT+GNSS`        | location payload format      | `0..=3`, persisted         |
//! | `AT+STATUS`      | status report, triggers read |                            |
//! | `AT+RTC`         | clock read from the module   | `yyyy:mm:dd:hh:MM`         |
//! | `AT+RESCAN`      |                              | rescan the bus             |
//! | `AT+READ`        |                              | read all modules now       |
//!
//! Commands never touch the bus except through the [`Clock`] they are
//! handed. Anything else that needs it comes back as an [`Effect`] for the
//! control loop to carry out.

use core::fmt::Write;

use hal_abstractions::{SettingsStore, StoreError};

use crate::catalog::{Catalog, ModuleKind};
use crate::settings::{GnssFormat, Settings};
use crate::status;
use crate::error::DriverError;
use crate::time::{Clock, DateTime};

pub const OK: &str = "OK";

/// Years accepted by `AT+RTC`
const RTC_YEARS: core::ops::RangeInclusive<u16> = 2022..=3000;

/// Command failures, each with its AT response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Unknown command, or one whose module isn't active
    NotFound,
    /// Missing or malformed arguments
    Param,
    /// Setting could not be persisted
    Store(StoreError),
    /// Response didn't fit the output buffer
    Output,
    /// Clock module could not be read
    Clock(DriverError),
}

impl CommandError {
    /// Response line sent for this error.
    pub const fn response(&self) -> &'static str {
        match self {
            Self::NotFound => "AT_COMMAND_NOT_FOUND",
            Self::Param => "AT_PARAM_ERROR",
            Self::Store(_) | Self::Output | Self::Clock(_) => "AT_ERROR",
        }
    }
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.response())
    }
}

impl core::error::Error for CommandError {}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<core::fmt::Error> for CommandError {
    fn from(_: core::fmt::Error) -> Self {
        Self::Output
    }
}

/// A parsed command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Bare `AT`
    Attention,
    GetSendInterval,
    /// Interval in seconds, 0 turns periodic reads off
    SetSendInterval(u32),
    GetGnssFormat,
    SetGnssFormat(GnssFormat),
    Status,
    GetClock,
    SetClock(DateTime),
    Rescan,
    Read,
}

/// Work a command leaves for the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Effect {
    /// Send interval changed; restart the periodic timer with this many ms
    IntervalChanged(u32),
    /// Run a read cycle right away
    ReadNow,
    /// Set the RTC module's clock
    SetClock(DateTime),
    /// Re-probe the bus and re-arbitrate
    Rescan,
}

/// All-digit decimal number.
fn number<T: core::str::FromStr>(arg: &str) -> Result<T, CommandError> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommandError::Param);
    }
    arg.parse().map_err(|_| CommandError::Param)
}

/// `yyyy:mm:dd:hh:MM`, seconds set to zero.
fn parse_clock(args: &str) -> Result<DateTime, CommandError> {
    let mut fields = args.split(':');
    let mut next = || fields.next().ok_or(CommandError::Param);
    let year: u16 = number(next()?)?;
    let month: u8 = number(next()?)?;
    let day: u8 = number(next()?)?;
    let hour: u8 = number(next()?)?;
    let minute: u8 = number(next()?)?;
    if fields.next().is_some() || !RTC_YEARS.contains(&year) {
        return Err(CommandError::Param);
    }
    DateTime::new(year, month, day, hour, minute, 0).map_err(|_| CommandError::Param)
}

impl Command {
    /// Parse one line, surrounding whitespace ignored.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.eq_ignore_ascii_case("AT") {
            return Ok(Self::Attention);
        }
        let rest = match line.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("AT+") => &line[3..],
            _ => return Err(CommandError::NotFound),
        };
        let (name, args) = match rest.split_once('=') {
            Some((name, args)) => (name, Some(args)),
            None => (rest, None),
        };
        let is = |expected: &str| name.eq_ignore_ascii_case(expected);

        if is("SENDINT") {
            match args {
                Some("?") => Ok(Self::GetSendInterval),
                Some(secs) => Ok(Self::SetSendInterval(number(secs)?)),
                None => Err(CommandError::Param),
            }
        } else if is("GNSS") {
            match args {
                Some("?") => Ok(Self::GetGnssFormat),
                Some(format) => GnssFormat::from_u8(number(format)?)
                    .map(Self::SetGnssFormat)
                    .ok_or(CommandError::Param),
                None => Err(CommandError::Param),
            }
        } else if is("STATUS") {
            match args {
                Some("?") | None => Ok(Self::Status),
                Some(_) => Err(CommandError::Param),
            }
        } else if is("RTC") {
            match args {
                Some("?") => Ok(Self::GetClock),
                Some(clock) => parse_clock(clock).map(Self::SetClock),
                None => Err(CommandError::Param),
            }
        } else if is("RESCAN") {
            args.map_or(Ok(Self::Rescan), |_| Err(CommandError::Param))
        } else if is("READ") {
            args.map_or(Ok(Self::Read), |_| Err(CommandError::Param))
        } else {
            Err(CommandError::NotFound)
        }
    }
}

/// Assembles console bytes into command lines
///
/// A line ends at `\r` or `\n`; empty lines are skipped. A line longer than
/// `N` is dropped whole.
#[derive(Debug, Default)]
pub struct LineBuffer<const N: usize> {
    line: heapless::String<N>,
    overflow: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            line: heapless::String::new(),
            overflow: false,
        }
    }

    /// Feed one byte, returns the line it completes.
    pub fn push(&mut self, byte: u8) -> Option<heapless::String<N>> {
        match byte {
            b'\r' | b'\n' => {
                let line = core::mem::take(&mut self.line);
                if core::mem::take(&mut self.overflow) {
                    warn!("Console line too long, dropped");
                    return None;
                }
                (!line.is_empty()).then_some(line)
            }
            _ if self.overflow => None,
            // Commands are ASCII; anything else can't match one anyway
            _ if !byte.is_ascii() => {
                self.overflow = true;
                None
            }
            _ => {
                if self.line.push(char::from(byte)).is_err() {
                    self.overflow = true;
                }
                None
            }
        }
    }
}

/// State a command reads or changes
pub struct CommandContext<'a, S, const N: usize> {
    pub settings: &'a mut Settings,
    pub store: &'a mut S,
    pub catalog: &'a Catalog<N>,
    /// RTC module, read on every query
    pub clock: &'a mut dyn Clock,
}

impl<S: SettingsStore, const N: usize> CommandContext<'_, S, N> {
    fn rtc_active(&self) -> bool {
        self.catalog.active().any(|slot| slot.kind() == ModuleKind::Rak12002)
    }

    /// Run `command`, writing query output to `out`.
    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> Result<Option<Effect>, CommandError> {
        match command {
            Command::Attention => Ok(None),
            Command::GetSendInterval => {
                write!(out, "AT+SENDINT={}s\r\n", self.settings.send_interval_ms / 1000)?;
                Ok(None)
            }
            Command::SetSendInterval(secs) => {
                let ms = secs.checked_mul(1000).ok_or(CommandError::Param)?;
                self.settings.send_interval_ms = ms;
                self.settings.save_send_interval(&mut *self.store)?;
                info!("Send interval now {=u32} s", secs);
                Ok(Some(Effect::IntervalChanged(ms)))
            }
            Command::GetGnssFormat => {
                write!(out, "AT+GNSS={}\r\n", self.settings.gnss_format.description())?;
                Ok(None)
            }
            Command::SetGnssFormat(format) => {
                self.settings.gnss_format = format;
                self.settings.save_gnss_format(&mut *self.store)?;
                Ok(None)
            }
            Command::Status => {
                status::write_status(out, self.catalog, self.settings)?;
                Ok(Some(Effect::ReadNow))
            }
            Command::GetClock => {
                if !self.rtc_active() {
                    return Err(CommandError::NotFound);
                }
                let now = self.clock.now().map_err(CommandError::Clock)?;
                write!(out, "AT+RTC={now}\r\n")?;
                Ok(None)
            }
            Command::SetClock(time) => {
                if !self.rtc_active() {
                    return Err(CommandError::NotFound);
                }
                Ok(Some(Effect::SetClock(time)))
            }
            Command::Rescan => Ok(Some(Effect::Rescan)),
            Command::Read => Ok(Some(Effect::ReadNow)),
        }
    }

    /// Parse and run one line, finishing with `OK` or the error response.
    pub fn handle<W: Write>(&mut self, line: &str, out: &mut W) -> Option<Effect> {
        let result = Command::parse(line).and_then(|command| self.execute(command, out));
        let status = match &result {
            Ok(_) => OK,
            Err(e) => {
                warn!("{=str} -> {}", line, e);
                e.response()
            }
        };
        // Nothing left to report to if the output itself is broken
        let _ = write!(out, "{status}\r\n");
        result.ok().flatten()
    }
}
