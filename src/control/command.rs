//! Administrative commands
//!
//! Commands arrive as chat text such as `!addgroup -1001234 30`. The
//! [`COMMANDS`] table maps each keyword to its [`CommandTag`], usage line and
//! argument parser. Parsing validates argument shape and ranges only; checks
//! that depend on state happen when the command is applied.

use std::fmt;
use std::str::FromStr;

use super::error::ValidationError;
use crate::models::{PeerId, SelectionMode};
use crate::storage::MAX_CADENCE_MINUTES;

/// Prefix that marks a message as a command
pub const COMMAND_PREFIX: char = '!';

/// Longest log window accepted by `!log`
pub const MAX_LOG_DAYS: u32 = 365;

/// Highest daily cap accepted by `!setcap`
pub const MAX_DAILY_CAP: u32 = 1440;

// ============================================================================
// Command Model
// ============================================================================

/// A fully parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Changes state, always followed by a persist
    Write(Mutation),
    /// Reads state only
    Read(Query),
    /// Moves the whole document in or out
    Transfer(Transfer),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AddDestination { id: PeerId, cadence: Option<u32> },
    RemoveDestination { id: PeerId },
    /// Register the group the command was written in
    SelfRegister,
    SetGlobalCadence { minutes: u32 },
    SetDestinationCadence { id: PeerId, minutes: u32 },
    SetDailyCap { id: PeerId, cap: u32 },
    SetSelectionMode(SelectionMode),
    SetBroadcastAll(bool),
    AddAdmin { id: PeerId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    ListDestinations,
    ShowStatus,
    QueryLog { days: u32 },
    ShowUptime,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Export,
    Import,
}

/// Stable name of each command, used for help, logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    AddGroup,
    RemoveGroup,
    Join,
    SetFrequency,
    SetCap,
    SetMode,
    AllGroup,
    AddAdmin,
    Groups,
    Status,
    Log,
    Uptime,
    Help,
    Backup,
    Restore,
}

impl CommandTag {
    pub fn as_str(&self) -> &'static str {
        self.entry().keyword
    }

    /// Table entry for this tag
    pub fn entry(&self) -> &'static CommandEntry {
        COMMANDS
            .iter()
            .find(|entry| entry.tag == *self)
            .unwrap_or(&COMMANDS[COMMANDS.len() - 1])
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        match self {
            Self::Write(m) => match m {
                Mutation::AddDestination { .. } => CommandTag::AddGroup,
                Mutation::RemoveDestination { .. } => CommandTag::RemoveGroup,
                Mutation::SelfRegister => CommandTag::Join,
                Mutation::SetGlobalCadence { .. } | Mutation::SetDestinationCadence { .. } => {
                    CommandTag::SetFrequency
                }
                Mutation::SetDailyCap { .. } => CommandTag::SetCap,
                Mutation::SetSelectionMode(_) => CommandTag::SetMode,
                Mutation::SetBroadcastAll(_) => CommandTag::AllGroup,
                Mutation::AddAdmin { .. } => CommandTag::AddAdmin,
            },
            Self::Read(q) => match q {
                Query::ListDestinations => CommandTag::Groups,
                Query::ShowStatus => CommandTag::Status,
                Query::QueryLog { .. } => CommandTag::Log,
                Query::ShowUptime => CommandTag::Uptime,
                Query::Help => CommandTag::Help,
            },
            Self::Transfer(Transfer::Export) => CommandTag::Backup,
            Self::Transfer(Transfer::Import) => CommandTag::Restore,
        }
    }
}

// ============================================================================
// Command Table
// ============================================================================

type ArgParser = fn(&CommandEntry, &[&str]) -> Result<Command, ValidationError>;

/// One row of the command table
pub struct CommandEntry {
    pub tag: CommandTag,
    pub keyword: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    parse: ArgParser,
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("tag", &self.tag)
            .field("keyword", &self.keyword)
            .finish()
    }
}

/// Every command the surface understands, in help order
pub static COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        tag: CommandTag::AddGroup,
        keyword: "addgroup",
        usage: "!addgroup <id> [minutes]",
        summary: "Register a destination, optionally with its own cadence",
        parse: parse_add_group,
    },
    CommandEntry {
        tag: CommandTag::RemoveGroup,
        keyword: "rmgroup",
        usage: "!rmgroup <id>",
        summary: "Remove a destination",
        parse: parse_remove_group,
    },
    CommandEntry {
        tag: CommandTag::Join,
        keyword: "join",
        usage: "!join",
        summary: "Register the group this is sent in",
        parse: parse_join,
    },
    CommandEntry {
        tag: CommandTag::SetFrequency,
        keyword: "setfreq",
        usage: "!setfreq <minutes> | !setfreq <id> <minutes>",
        summary: "Set the global cadence or one destination's cadence",
        parse: parse_set_frequency,
    },
    CommandEntry {
        tag: CommandTag::SetCap,
        keyword: "setcap",
        usage: "!setcap <id> <count>",
        summary: "Set a destination's daily cap",
        parse: parse_set_cap,
    },
    CommandEntry {
        tag: CommandTag::SetMode,
        keyword: "setmode",
        usage: "!setmode random|order",
        summary: "Choose random or sequential selection",
        parse: parse_set_mode,
    },
    CommandEntry {
        tag: CommandTag::AllGroup,
        keyword: "allgroup",
        usage: "!allgroup on|off",
        summary: "Send to every joined group instead of the registry",
        parse: parse_all_group,
    },
    CommandEntry {
        tag: CommandTag::AddAdmin,
        keyword: "addadmin",
        usage: "!addadmin <id>",
        summary: "Allow another user to issue commands",
        parse: parse_add_admin,
    },
    CommandEntry {
        tag: CommandTag::Groups,
        keyword: "groups",
        usage: "!groups",
        summary: "List registered destinations",
        parse: parse_groups,
    },
    CommandEntry {
        tag: CommandTag::Status,
        keyword: "status",
        usage: "!status",
        summary: "Show settings and per-destination state",
        parse: parse_status,
    },
    CommandEntry {
        tag: CommandTag::Log,
        keyword: "log",
        usage: "!log [days]",
        summary: "List deliveries of the last days (default 1)",
        parse: parse_log,
    },
    CommandEntry {
        tag: CommandTag::Uptime,
        keyword: "uptime",
        usage: "!uptime",
        summary: "Show how long the service has been running",
        parse: parse_uptime,
    },
    CommandEntry {
        tag: CommandTag::Backup,
        keyword: "backup",
        usage: "!backup",
        summary: "Receive the state document as a file",
        parse: parse_backup,
    },
    CommandEntry {
        tag: CommandTag::Restore,
        keyword: "restore",
        usage: "!restore",
        summary: "Replace the state with an uploaded document",
        parse: parse_restore,
    },
    CommandEntry {
        tag: CommandTag::Help,
        keyword: "help",
        usage: "!help",
        summary: "Show this menu",
        parse: parse_help,
    },
];

/// Parse a chat message.
///
/// Returns `Ok(None)` when the text is not a command at all.
pub fn parse(text: &str) -> Result<Option<Command>, ValidationError> {
    let Some(body) = text.trim().strip_prefix(COMMAND_PREFIX) else {
        return Ok(None);
    };

    let mut words = body.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(None);
    };
    // `!status@somebot` style suffixes
    let keyword = keyword
        .split('@')
        .next()
        .unwrap_or(keyword)
        .to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let entry = COMMANDS
        .iter()
        .find(|entry| entry.keyword == keyword)
        .ok_or(ValidationError::Unknown { keyword })?;

    (entry.parse)(entry, &args).map(Some)
}

/// Help menu text
pub fn help_text() -> String {
    let mut text = String::from("Available commands:\n");
    for entry in COMMANDS {
        text.push_str(&format!("{} - {}\n", entry.usage, entry.summary));
    }
    text.trim_end().to_string()
}

// ============================================================================
// Argument Parsers
// ============================================================================

fn no_args(entry: &CommandEntry, args: &[&str], command: Command) -> Result<Command, ValidationError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(usage(entry))
    }
}

fn parse_join(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    no_args(entry, args, Command::Write(Mutation::SelfRegister))
}

fn parse_groups(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    no_args(entry, args, Command::Read(Query::ListDestinations))
}

fn parse_status(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    no_args(entry, args, Command::Read(Query::ShowStatus))
}

fn parse_uptime(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    no_args(entry, args, Command::Read(Query::ShowUptime))
}

fn parse_help(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    no_args(entry, args, Command::Read(Query::Help))
}

fn parse_backup(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    no_args(entry, args, Command::Transfer(Transfer::Export))
}

fn parse_restore(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    no_args(entry, args, Command::Transfer(Transfer::Import))
}

fn parse_add_group(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    match args {
        [id] => Ok(Command::Write(Mutation::AddDestination {
            id: peer(entry, id)?,
            cadence: None,
        })),
        [id, minutes] => Ok(Command::Write(Mutation::AddDestination {
            id: peer(entry, id)?,
            cadence: Some(bounded(entry, "minutes", minutes, 1, MAX_CADENCE_MINUTES)?),
        })),
        _ => Err(usage(entry)),
    }
}

fn parse_remove_group(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    match args {
        [id] => Ok(Command::Write(Mutation::RemoveDestination {
            id: peer(entry, id)?,
        })),
        _ => Err(usage(entry)),
    }
}

fn parse_set_frequency(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    match args {
        [minutes] => Ok(Command::Write(Mutation::SetGlobalCadence {
            minutes: bounded(entry, "minutes", minutes, 1, MAX_CADENCE_MINUTES)?,
        })),
        [id, minutes] => Ok(Command::Write(Mutation::SetDestinationCadence {
            id: peer(entry, id)?,
            minutes: bounded(entry, "minutes", minutes, 1, MAX_CADENCE_MINUTES)?,
        })),
        _ => Err(usage(entry)),
    }
}

fn parse_set_cap(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    match args {
        [id, cap] => Ok(Command::Write(Mutation::SetDailyCap {
            id: peer(entry, id)?,
            cap: bounded(entry, "count", cap, 1, MAX_DAILY_CAP)?,
        })),
        _ => Err(usage(entry)),
    }
}

fn parse_set_mode(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    match args {
        [mode] => SelectionMode::parse(mode)
            .map(|mode| Command::Write(Mutation::SetSelectionMode(mode)))
            .ok_or_else(|| usage(entry)),
        _ => Err(usage(entry)),
    }
}

fn parse_all_group(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    let enabled = match args {
        [flag] => match flag.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => true,
            "off" | "false" | "0" => false,
            _ => return Err(usage(entry)),
        },
        _ => return Err(usage(entry)),
    };
    Ok(Command::Write(Mutation::SetBroadcastAll(enabled)))
}

fn parse_add_admin(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    match args {
        [id] => Ok(Command::Write(Mutation::AddAdmin {
            id: peer(entry, id)?,
        })),
        _ => Err(usage(entry)),
    }
}

fn parse_log(entry: &CommandEntry, args: &[&str]) -> Result<Command, ValidationError> {
    let days = match args {
        [] => 1,
        [days] => bounded(entry, "days", days, 1, MAX_LOG_DAYS)?,
        _ => return Err(usage(entry)),
    };
    Ok(Command::Read(Query::QueryLog { days }))
}

fn usage(entry: &CommandEntry) -> ValidationError {
    ValidationError::Usage { usage: entry.usage }
}

fn peer(entry: &CommandEntry, raw: &str) -> Result<PeerId, ValidationError> {
    PeerId::from_str(raw).map_err(|_| usage(entry))
}

fn bounded(
    entry: &CommandEntry,
    field: &'static str,
    raw: &str,
    min: u32,
    max: u32,
) -> Result<u32, ValidationError> {
    let value = i64::from_str(raw).map_err(|_| usage(entry))?;
    if value < i64::from(min) || value > i64::from(max) {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(value as u32)
}
