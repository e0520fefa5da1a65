//! Line-oriented command harness over the bookstore multimap.
//!
//! A script starts with a command count `n` followed by up to `n` commands,
//! one per line:
//!
//! ```text
//! insert <key> <value>
//! delete <key> <value>
//! find <key>
//! ```
//!
//! `find` prints the values of a key ascending and separated by single
//! spaces, or `null` when it has none. A line that cannot be parsed prints
//! `Invalid` and the script carries on.

use std::io::{BufRead, Write};
use std::num::ParseIntError;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use btree::BLinkTree;
use thiserror::Error;
use types::{FixedString, RecordError};

/// Key type of the harness: book titles, ISBNs, user ids.
pub type Title = FixedString<64>;

/// The multimap driven by the harness.
pub type Bookshelf = BLinkTree<Title, i32>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Insert { key: Title, value: i32 },
    Delete { key: Title, value: i32 },
    Find { key: Title },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("unexpected trailing input `{0}`")]
    Trailing(String),
    #[error("bad value: {0}")]
    Value(#[from] ParseIntError),
    #[error("bad key: {0}")]
    Key(#[from] RecordError),
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(ParseError::Missing("command"))?;
        let key = Title::new(words.next().ok_or(ParseError::Missing("key"))?)?;

        let command = match verb {
            "insert" | "delete" => {
                let value = words.next().ok_or(ParseError::Missing("value"))?.parse()?;
                if verb == "insert" {
                    Command::Insert { key, value }
                } else {
                    Command::Delete { key, value }
                }
            }
            "find" => Command::Find { key },
            other => return Err(ParseError::Unknown(other.to_string())),
        };

        match words.next() {
            Some(extra) => Err(ParseError::Trailing(extra.to_string())),
            None => Ok(command),
        }
    }
}

/// Counts reported after a script has run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub commands: usize,
    pub invalid: usize,
}

/// Apply one command, writing any output line to `out`.
pub fn execute<W: Write>(shelf: &mut Bookshelf, command: &Command, out: &mut W) -> Result<()> {
    match command {
        Command::Insert { key, value } => {
            shelf
                .insert(key.clone(), *value)
                .with_context(|| format!("insert {key} {value}"))?;
        }
        Command::Delete { key, value } => {
            shelf
                .erase(key, value)
                .with_context(|| format!("delete {key} {value}"))?;
        }
        Command::Find { key } => {
            let values = shelf.find(key).with_context(|| format!("find {key}"))?;
            if values.is_empty() {
                writeln!(out, "null")?;
            } else {
                let line: Vec<String> = values.iter().map(i32::to_string).collect();
                writeln!(out, "{}", line.join(" "))?;
            }
        }
    }
    Ok(())
}

/// Run a whole script read from `input`.
///
/// Storage faults abort the script; malformed lines do not.
pub fn run_script<R: BufRead, W: Write>(
    shelf: &mut Bookshelf,
    input: R,
    out: &mut W,
) -> Result<Summary> {
    let mut lines = input.lines();

    let count = loop {
        let Some(line) = lines.next() else {
            return Ok(Summary::default());
        };
        let line = line.context("failed to read command count")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.parse::<usize>() {
            Ok(count) => break count,
            Err(err) => bail!("expected a command count, found `{trimmed}`: {err}"),
        }
    };

    let mut summary = Summary::default();
    while summary.commands < count {
        let Some(line) = lines.next() else {
            tracing::warn!(expected = count, read = summary.commands, "script ended early");
            break;
        };
        let line = line.context("failed to read command")?;
        if line.trim().is_empty() {
            continue;
        }
        summary.commands += 1;

        match line.parse::<Command>() {
            Ok(command) => execute(shelf, &command, out)?,
            Err(err) => {
                tracing::debug!(line = %line.trim(), %err, "rejected command");
                summary.invalid += 1;
                writeln!(out, "Invalid")?;
            }
        }
    }

    Ok(summary)
}
