//! Execution of parsed shell commands.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::command::{Command, CommandError, Operation};
use crate::error::DbError;
use crate::store::{Key, KeyValueDb, Value};

/// Receives the outcome of every command a [`CommandRunner`] executes.
///
/// Background commands report from their own thread, so implementations
/// must tolerate concurrent calls.
pub trait Reporter: Send + Sync {
    /// A command was moved to the background.
    fn backgrounded(&self);

    /// A command failed.
    fn error(&self, error: &DbError);

    /// `GET` finished.
    fn get(&self, key: &str, value: Option<&[u8]>);

    /// `PUT` finished.
    fn put(&self, key: &str, value: &[u8]);

    /// `MULTIGET` finished.
    fn multi_get(&self, keys: &HashSet<Key>, values: &HashMap<Key, Value>);

    /// `MULTIPUT` finished.
    fn multi_put(&self, pairs: &HashMap<Key, Value>);

    /// `GETWHEN` finished.
    fn get_when(&self, key: &str, key_cond: &str, value_cond: &[u8], value: Option<&[u8]>);
}

/// Runs commands against a database and reports their results.
#[derive(Clone)]
pub struct CommandRunner {
    database: Arc<dyn KeyValueDb>,
    reporter: Arc<dyn Reporter>,
}

impl CommandRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(database: Arc<dyn KeyValueDb>, reporter: Arc<dyn Reporter>) -> Self {
        Self { database, reporter }
    }

    /// Parses `line` and runs it.
    ///
    /// Returns the handle of the background thread for `&` commands.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a valid command. Database errors
    /// go to the reporter instead.
    pub fn parse_and_run(&self, line: &str) -> Result<Option<JoinHandle<()>>, CommandError> {
        let command = Command::parse(line)?;
        Ok(self.run(command))
    }

    /// Runs a parsed command, in a new thread if it is a background command.
    pub fn run(&self, command: Command) -> Option<JoinHandle<()>> {
        if !command.background {
            self.execute(command.operation);
            return None;
        }

        let runner = self.clone();
        let operation = command.operation;
        match thread::Builder::new()
            .name("kvdb-background".to_string())
            .spawn(move || runner.execute(operation))
        {
            Ok(handle) => {
                self.reporter.backgrounded();
                Some(handle)
            }
            Err(e) => {
                self.reporter.error(&DbError::Io(e));
                None
            }
        }
    }

    fn execute(&self, operation: Operation) {
        let db = self.database.as_ref();
        let reporter = self.reporter.as_ref();

        let result = match &operation {
            Operation::Put { key, value } => db.put(key, value).map(|()| reporter.put(key, value)),
            Operation::Get { key } => db
                .get(key)
                .map(|value| reporter.get(key, value.as_deref())),
            Operation::MultiPut { pairs } => {
                db.multi_put(pairs).map(|()| reporter.multi_put(pairs))
            }
            Operation::MultiGet { keys } => db
                .multi_get(keys)
                .map(|values| reporter.multi_get(keys, &values)),
            Operation::GetWhen {
                key,
                key_cond,
                value_cond,
            } => db
                .get_when(key, key_cond, value_cond)
                .map(|value| reporter.get_when(key, key_cond, value_cond, value.as_deref())),
        };

        if let Err(e) = result {
            reporter.error(&e);
        }
    }
}

/// Formats a value as a signed byte list, or `null` when absent.
#[must_use]
pub fn format_value(value: Option<&[u8]>) -> String {
    let Some(value) = value else {
        return "null".to_string();
    };

    let mut out = String::from("[");
    for (i, byte) in value.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", i8::from_be_bytes([*byte]));
    }
    out.push(']');
    out
}

type SharedWriter = Mutex<Box<dyn Write + Send>>;

/// Prints results followed by the shell prompt.
///
/// Each report is written in one piece while holding the writer's lock, so
/// output from background commands never interleaves.
pub struct LoggerReporter {
    prompt: String,
    out: SharedWriter,
    err: SharedWriter,
}

impl LoggerReporter {
    /// Reports to the given writers.
    pub fn new(
        prompt: impl Into<String>,
        out: impl Write + Send + 'static,
        err: impl Write + Send + 'static,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            out: Mutex::new(Box::new(out)),
            err: Mutex::new(Box::new(err)),
        }
    }

    /// Reports to standard output and standard error.
    pub fn stdio(prompt: impl Into<String>) -> Self {
        Self::new(prompt, io::stdout(), io::stderr())
    }

    /// The shell prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn emit(writer: &SharedWriter, text: &str) {
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.write_all(text.as_bytes()).and_then(|()| writer.flush()) {
            debug!(error = %e, "Failed to write report");
        }
    }

    fn report(&self, line: &str) {
        Self::emit(&self.out, &format!("{line}\n{}", self.prompt));
    }
}

fn sorted<'a>(keys: impl IntoIterator<Item = &'a Key>) -> Vec<&'a Key> {
    let mut keys: Vec<_> = keys.into_iter().collect();
    keys.sort_unstable();
    keys
}

impl Reporter for LoggerReporter {
    fn backgrounded(&self) {
        self.report("Request backgrounded");
    }

    fn error(&self, error: &DbError) {
        Self::emit(&self.err, &format!("{error}\n{}", self.prompt));
    }

    fn get(&self, key: &str, value: Option<&[u8]>) {
        self.report(&format!("GET {key} completed: {}", format_value(value)));
    }

    fn put(&self, key: &str, value: &[u8]) {
        self.report(&format!("PUT {key} {} completed", format_value(Some(value))));
    }

    fn multi_get(&self, keys: &HashSet<Key>, values: &HashMap<Key, Value>) {
        let keys = sorted(keys);
        let mut text = format!(
            "MULTIGET {} completed:",
            keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(" ")
        );
        for key in keys {
            let _ = write!(
                text,
                "\n  {key}: {}",
                format_value(values.get(key).map(Vec::as_slice))
            );
        }
        self.report(&text);
    }

    fn multi_put(&self, pairs: &HashMap<Key, Value>) {
        let listed: Vec<String> = sorted(pairs.keys())
            .into_iter()
            .map(|key| format!("{key} {}", format_value(Some(&pairs[key]))))
            .collect();
        self.report(&format!("MULTIPUT {} completed", listed.join(" ")));
    }

    fn get_when(&self, key: &str, key_cond: &str, value_cond: &[u8], value: Option<&[u8]>) {
        self.report(&format!(
            "GETWHEN {key} {key_cond} {} completed: {}",
            format_value(Some(value_cond)),
            format_value(value)
        ));
    }
}

impl std::fmt::Debug for LoggerReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerReporter")
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BackendKind, SimpleHashMapBackend};

    /// Writer whose contents stay readable after being boxed.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn runner(db: Arc<dyn KeyValueDb>) -> (CommandRunner, Captured, Captured) {
        let out = Captured::default();
        let err = Captured::default();
        let reporter = Arc::new(LoggerReporter::new("> ", out.clone(), err.clone()));
        (CommandRunner::new(db, reporter), out, err)
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(None), "null");
        assert_eq!(format_value(Some(&[])), "[]");
        assert_eq!(format_value(Some(&[1, 0xFE, 0x80])), "[1, -2, -128]");
    }

    #[test]
    fn foreground_commands_report_results() {
        let (runner, out, err) = runner(Arc::new(SimpleHashMapBackend::new()));

        runner.parse_and_run("PUT a [1, -1]").unwrap();
        runner.parse_and_run("GET a").unwrap();
        runner.parse_and_run("GET b").unwrap();
        runner.parse_and_run("MULTIGET b a").unwrap();

        assert_eq!(
            out.text(),
            "PUT a [1, -1] completed\n> \
             GET a completed: [1, -1]\n> \
             GET b completed: null\n> \
             MULTIGET a b completed:\n  a: [1, -1]\n  b: null\n> "
        );
        assert!(err.text().is_empty());
    }

    #[test]
    fn background_command_reports_from_its_thread() {
        let db = Arc::new(SimpleHashMapBackend::new());
        let (runner, out, _) = runner(db.clone());

        let handle = runner.parse_and_run("GETWHEN x flag [1] &").unwrap().unwrap();
        db.put("flag", &[1]).unwrap();
        handle.join().unwrap();

        let text = out.text();
        assert!(text.starts_with("Request backgrounded\n> "), "{text}");
        assert!(text.ends_with("GETWHEN x flag [1] completed: null\n> "), "{text}");
    }

    #[test]
    fn database_errors_go_to_error_output() {
        let (runner, out, err) = runner(BackendKind::Sharded { shards: 2 }.build());
        runner.parse_and_run("GETWHEN a b [1]").unwrap();

        assert!(out.text().is_empty());
        assert!(err.text().contains("not supported"), "{}", err.text());
    }

    #[test]
    fn parse_errors_are_returned() {
        let (runner, _, _) = runner(Arc::new(SimpleHashMapBackend::new()));
        assert!(runner.parse_and_run("FLY away").is_err());
    }
}
