//! Parsing of interactive shell commands.
//!
//! ```text
//! PUT key [1, 2, 3]
//! GET key
//! MULTIPUT key1 [1] key2 [-1, 2]
//! MULTIGET key1 key2
//! GETWHEN key keyCond [1]
//! ```
//!
//! Command names are case-insensitive. A trailing `&` runs the command in
//! the background. Keys are non-empty ASCII alphanumeric strings; values are
//! arrays of signed bytes.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use thiserror::Error;

use crate::store::{Key, Value};

/// Errors produced while parsing a command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The command name is not recognised.
    #[error("Unknown command")]
    UnknownCommand,

    /// Too few or too many arguments.
    #[error("Wrong number of {command} arguments")]
    WrongArgumentCount {
        /// Command name.
        command: &'static str,
    },

    /// A key contains characters other than ASCII letters and digits.
    #[error("Non-alphanumeric {command} {role}: {key}")]
    NonAlphanumericKey {
        /// Command name.
        command: &'static str,
        /// Which key argument.
        role: &'static str,
        /// The offending key.
        key: String,
    },

    /// An argument is not a `[..]` array.
    #[error("Invalid array in {command} command: {array}")]
    InvalidArray {
        /// Command name.
        command: &'static str,
        /// The offending argument.
        array: String,
    },

    /// An array element is not a signed byte.
    #[error("Invalid byte in array in {command} command: {element}")]
    InvalidByte {
        /// Command name.
        command: &'static str,
        /// The offending element.
        element: String,
    },
}

/// A database operation requested from the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `PUT key [..]`
    Put {
        /// Key to write.
        key: Key,
        /// Value to store.
        value: Value,
    },
    /// `GET key`
    Get {
        /// Key to read.
        key: Key,
    },
    /// `MULTIPUT k1 [..] k2 [..] ...`
    MultiPut {
        /// Pairs to store.
        pairs: HashMap<Key, Value>,
    },
    /// `MULTIGET k1 k2 ...`
    MultiGet {
        /// Keys to read.
        keys: HashSet<Key>,
    },
    /// `GETWHEN key keyCond [..]`
    GetWhen {
        /// Key to read.
        key: Key,
        /// Key whose value is awaited.
        key_cond: Key,
        /// Awaited value.
        value_cond: Value,
    },
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// What to run.
    pub operation: Operation,
    /// Whether the command was suffixed with `&`.
    pub background: bool,
}

impl Command {
    /// Parses one command line.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut line = line.trim();
        let background = line.ends_with('&');
        if background {
            line = line[..line.len() - 1].trim_end();
        }

        let (name, arguments) = split_word(line);
        let operation = match name.to_ascii_uppercase().as_str() {
            "PUT" => parse_put(arguments)?,
            "GET" => parse_get(arguments)?,
            "MULTIPUT" => parse_multi_put(arguments)?,
            "MULTIGET" => parse_multi_get(arguments)?,
            "GETWHEN" => parse_get_when(arguments)?,
            _ => return Err(CommandError::UnknownCommand),
        };

        Ok(Self {
            operation,
            background,
        })
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], s[end..].trim_start()),
        None => (s, ""),
    }
}

fn check_key(command: &'static str, role: &'static str, key: &str) -> Result<Key, CommandError> {
    if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(key.to_owned())
    } else {
        Err(CommandError::NonAlphanumericKey {
            command,
            role,
            key: key.to_owned(),
        })
    }
}

/// Parses `[b1, b2, ...]` into bytes. `[]` is the empty value.
fn parse_value(command: &'static str, array: &str) -> Result<Value, CommandError> {
    let inner = array
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| CommandError::InvalidArray {
            command,
            array: array.to_owned(),
        })?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(str::trim)
        .map(|element| {
            element
                .parse::<i8>()
                .map(|byte| u8::from_be_bytes(byte.to_be_bytes()))
                .map_err(|_| CommandError::InvalidByte {
                    command,
                    element: element.to_owned(),
                })
        })
        .collect()
}

fn parse_put(arguments: &str) -> Result<Operation, CommandError> {
    const NAME: &str = "PUT";
    let (key, rest) = split_word(arguments);
    if rest.is_empty() {
        return Err(CommandError::WrongArgumentCount { command: NAME });
    }
    Ok(Operation::Put {
        key: check_key(NAME, "key", key)?,
        value: parse_value(NAME, rest)?,
    })
}

fn parse_get(arguments: &str) -> Result<Operation, CommandError> {
    const NAME: &str = "GET";
    let (key, rest) = split_word(arguments);
    if key.is_empty() || !rest.is_empty() {
        return Err(CommandError::WrongArgumentCount { command: NAME });
    }
    Ok(Operation::Get {
        key: check_key(NAME, "key", key)?,
    })
}

fn parse_multi_put(arguments: &str) -> Result<Operation, CommandError> {
    const NAME: &str = "MULTIPUT";
    let mut pairs = HashMap::new();
    let mut remaining = arguments.trim();

    while !remaining.is_empty() {
        let (key, rest) = split_word(remaining);
        if rest.is_empty() {
            return Err(CommandError::WrongArgumentCount { command: NAME });
        }
        let key = check_key(NAME, "key", key)?;

        let end = rest
            .find(']')
            .ok_or(CommandError::WrongArgumentCount { command: NAME })?;
        let value = parse_value(NAME, rest[..=end].trim())?;

        pairs.insert(key, value);
        remaining = rest[end + 1..].trim_start();
    }

    if pairs.is_empty() {
        return Err(CommandError::WrongArgumentCount { command: NAME });
    }
    Ok(Operation::MultiPut { pairs })
}

fn parse_multi_get(arguments: &str) -> Result<Operation, CommandError> {
    const NAME: &str = "MULTIGET";
    let keys = arguments
        .split_whitespace()
        .map(|key| check_key(NAME, "key", key))
        .collect::<Result<HashSet<_>, _>>()?;

    if keys.is_empty() {
        return Err(CommandError::WrongArgumentCount { command: NAME });
    }
    Ok(Operation::MultiGet { keys })
}

fn parse_get_when(arguments: &str) -> Result<Operation, CommandError> {
    const NAME: &str = "GETWHEN";
    let (key, rest) = split_word(arguments);
    let (key_cond, array) = split_word(rest);
    if key_cond.is_empty() || array.is_empty() {
        return Err(CommandError::WrongArgumentCount { command: NAME });
    }
    Ok(Operation::GetWhen {
        key: check_key(NAME, "key", key)?,
        key_cond: check_key(NAME, "conditional key", key_cond)?,
        value_cond: parse_value(NAME, array)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(line: &str) -> Operation {
        Command::parse(line).unwrap().operation
    }

    #[test]
    fn parse_put() {
        assert_eq!(
            op("PUT abc [1, -2, 127]"),
            Operation::Put {
                key: "abc".to_string(),
                value: vec![1, 0xFE, 127],
            }
        );
        assert_eq!(
            op("put k []"),
            Operation::Put {
                key: "k".to_string(),
                value: Vec::new(),
            }
        );
    }

    #[test]
    fn background_suffix() {
        let command = Command::parse("GET key &").unwrap();
        assert!(command.background);
        assert_eq!(command.operation, Operation::Get { key: "key".to_string() });

        let command: Command = "GET key".parse().unwrap();
        assert!(!command.background);
    }

    #[test]
    fn multi_put_pairs() {
        let Operation::MultiPut { pairs } = op("MULTIPUT a [1] b [2, 3]  c []") else {
            panic!("expected MULTIPUT");
        };
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs["b"], vec![2, 3]);
        assert!(pairs["c"].is_empty());
    }

    #[test]
    fn multi_get_collapses_duplicates() {
        assert_eq!(
            op("multiget a b a"),
            Operation::MultiGet {
                keys: HashSet::from(["a".to_string(), "b".to_string()]),
            }
        );
    }

    #[test]
    fn get_when_arguments() {
        assert_eq!(
            op("GETWHEN data flag [1]"),
            Operation::GetWhen {
                key: "data".to_string(),
                key_cond: "flag".to_string(),
                value_cond: vec![1],
            }
        );
    }

    #[test]
    fn errors_name_the_command() {
        assert_eq!(Command::parse("DELETE a"), Err(CommandError::UnknownCommand));
        assert_eq!(
            Command::parse("PUT onlykey").unwrap_err().to_string(),
            "Wrong number of PUT arguments"
        );
        assert_eq!(
            Command::parse("GET a-b").unwrap_err().to_string(),
            "Non-alphanumeric GET key: a-b"
        );
        assert_eq!(
            Command::parse("PUT a 1,2").unwrap_err().to_string(),
            "Invalid array in PUT command: 1,2"
        );
        assert_eq!(
            Command::parse("PUT a [1, 128]").unwrap_err().to_string(),
            "Invalid byte in array in PUT command: 128"
        );
        assert_eq!(
            Command::parse("GETWHEN a b_c [1]").unwrap_err().to_string(),
            "Non-alphanumeric GETWHEN conditional key: b_c"
        );
    }

    #[test]
    fn missing_arguments() {
        for line in ["GET", "MULTIGET", "MULTIPUT", "MULTIPUT a", "MULTIPUT a [1", "GETWHEN a [1]"] {
            assert!(
                matches!(
                    Command::parse(line),
                    Err(CommandError::WrongArgumentCount { .. } | CommandError::InvalidArray { .. })
                ),
                "{line}"
            );
        }
    }
}
