use std::str::FromStr;

use thiserror::Error;

use crate::domain::{label::UnknownLabel, Label};

pub const HELP: &str = "\
Commands:
  status                   show current settings
  key <value>              save the OpenRouter API key (blank clears it)
  enable | disable         turn filtering on or off
  filter <label> on|off    toggle one filter category
  blur on|off              blur filtered posts instead of hiding them
  show                     toggle display of hidden posts
  debug on|off             toggle verbose logging
  stats                    filtered posts in the last 24 hours
  help                     this list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Status,
    SetKey(String),
    Enable(bool),
    Filter(Label, bool),
    Blur(bool),
    ShowFiltered,
    Debug(bool),
    Stats,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("usage: filter <label> on|off")]
    FilterUsage,
    #[error("expected on|off, got `{0}`")]
    BadSwitch(String),
    #[error(transparent)]
    Label(#[from] UnknownLabel),
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(word, rest)| (word, rest.trim()))
            .unwrap_or((line, ""));

        let command = match word.to_ascii_lowercase().as_str() {
            "status" => ConsoleCommand::Status,
            "key" => ConsoleCommand::SetKey(rest.to_string()),
            "enable" => ConsoleCommand::Enable(true),
            "disable" => ConsoleCommand::Enable(false),
            "filter" => {
                let (label, state) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(CommandError::FilterUsage)?;
                let label = label.parse::<Label>()?;
                ConsoleCommand::Filter(label, parse_switch(state)?)
            }
            "blur" => ConsoleCommand::Blur(parse_switch(rest)?),
            "show" => ConsoleCommand::ShowFiltered,
            "debug" => ConsoleCommand::Debug(parse_switch(rest)?),
            "stats" => ConsoleCommand::Stats,
            "help" | "?" => ConsoleCommand::Help,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn parse_switch(value: &str) -> Result<bool, CommandError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(CommandError::BadSwitch(other.to_string())),
    }
}
