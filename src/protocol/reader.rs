//! Runner output stream
//!
//! The headless runner writes one event per line:
//!
//! ```text
//! #_#TestDone#_#{"testName":"adds","testResults":[{"passed":true}]}
//! ```
//!
//! Anything else on stdout (page console output, runner chatter) is ignored,
//! and so is a tagged line whose JSON does not parse, or any line longer
//! than [`MAX_LINE_BYTES`]. Reading always carries on with the next line.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::Instant;

use super::types::{FileEvent, TestCase, TestError, TestLog, TestSummary};
use crate::common::paths::path_key;
use crate::common::Result;
use crate::references::{FilePosition, ReferencedFile};
use crate::runner::RunCallback;

/// Delimiter around the event kind
pub const EVENT_DELIMITER: &str = "#_#";

/// Longest line kept in memory; longer lines are skipped whole
pub const MAX_LINE_BYTES: usize = 1 << 20;

fn event_regex() -> &'static Regex {
    static EVENT: OnceLock<Regex> = OnceLock::new();
    EVENT.get_or_init(|| {
        Regex::new(r"#_#(?<kind>[A-Za-z]+)#_#\s*(?<json>.*?)\s*$").expect("event pattern is valid")
    })
}

/// Event kinds the runner emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    FileStart,
    FileDone,
    TestStart,
    TestDone,
    Log,
    Error,
}

impl EventKind {
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "filestart" => Some(Self::FileStart),
            "filedone" => Some(Self::FileDone),
            "teststart" => Some(Self::TestStart),
            "testdone" => Some(Self::TestDone),
            "log" => Some(Self::Log),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileStart => "FileStart",
            Self::FileDone => "FileDone",
            Self::TestStart => "TestStart",
            Self::TestDone => "TestDone",
            Self::Log => "Log",
            Self::Error => "Error",
        }
    }
}

/// Render one protocol line, as the runner would print it
pub fn format_event(kind: EventKind, json: &str) -> String {
    format!("{}{}{}{}", EVENT_DELIMITER, kind.as_str(), EVENT_DELIMITER, json)
}

/// What a unit's events are attributed to
#[derive(Debug, Clone, Default)]
pub struct StreamContext {
    input_files: Vec<PathBuf>,
    /// Test declaration positions keyed by normalized file path
    positions: HashMap<String, Vec<FilePosition>>,
}

impl StreamContext {
    pub fn new(input_files: Vec<PathBuf>) -> Self {
        Self {
            input_files,
            positions: HashMap::new(),
        }
    }

    /// Take positions from the files under test of a flattened reference list
    pub fn from_references(input_files: Vec<PathBuf>, references: &[ReferencedFile]) -> Self {
        let positions = references
            .iter()
            .filter(|f| f.is_file_under_test && !f.file_positions.is_empty())
            .map(|f| (f.key(), f.file_positions.clone()))
            .collect();
        Self {
            input_files,
            positions,
        }
    }

    pub fn with_positions(mut self, path: &Path, positions: Vec<FilePosition>) -> Self {
        self.positions.insert(path_key(path), positions);
        self
    }

    fn primary_file(&self) -> Option<&PathBuf> {
        self.input_files.first()
    }
}

/// How reading a stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The writer closed the stream
    Closed,
    /// The deadline passed first; the writer may still be running
    DeadlineElapsed,
}

/// Accumulates one unit's events into a [`TestSummary`]
pub struct ProtocolReader<'a> {
    context: &'a StreamContext,
    callback: &'a dyn RunCallback,
    summary: TestSummary,
    /// Events since the last `FileStart`
    file: TestSummary,
    file_path: Option<PathBuf>,
    /// `TestDone` arrivals per file, used to index into positions
    arrivals: HashMap<String, usize>,
}

impl<'a> ProtocolReader<'a> {
    pub fn new(context: &'a StreamContext, callback: &'a dyn RunCallback) -> Self {
        Self {
            context,
            callback,
            summary: TestSummary::default(),
            file: TestSummary::default(),
            file_path: None,
            arrivals: HashMap::new(),
        }
    }

    /// Read a whole stream and return the unit summary
    pub async fn read<R: AsyncBufRead + Unpin>(
        context: &'a StreamContext,
        callback: &'a dyn RunCallback,
        reader: R,
    ) -> Result<TestSummary> {
        let mut protocol = Self::new(context, callback);
        protocol.read_stream(reader, None).await?;
        Ok(protocol.finish())
    }

    /// Process lines until the stream closes or `deadline` passes
    pub async fn read_stream<R: AsyncBufRead + Unpin>(
        &mut self,
        mut reader: R,
        deadline: Option<Instant>,
    ) -> Result<StreamEnd> {
        let mut buf = Vec::new();
        loop {
            let read = next_line(&mut reader, &mut buf);
            let line = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, read).await {
                    Ok(result) => result?,
                    Err(_) => return Ok(StreamEnd::DeadlineElapsed),
                },
                None => read.await?,
            };
            match line {
                Line::Eof => return Ok(StreamEnd::Closed),
                Line::Oversized => {
                    tracing::debug!(limit = MAX_LINE_BYTES, "skipping oversized runner output line");
                }
                Line::Complete => {
                    let line = String::from_utf8_lossy(&buf);
                    self.process_line(line.trim_end_matches(['\r', '\n']));
                }
            }
        }
    }

    /// Handle one line of runner output
    pub fn process_line(&mut self, line: &str) {
        let Some(caps) = event_regex().captures(line) else {
            return;
        };
        let Some(kind) = EventKind::parse(&caps["kind"]) else {
            tracing::debug!(kind = &caps["kind"], "ignoring unknown event kind");
            return;
        };
        let json = &caps["json"];

        match kind {
            EventKind::FileStart => {
                let Some(event) = file_payload(kind, json) else {
                    return;
                };
                self.flush_file();
                let path = event
                    .input_test_file
                    .or_else(|| self.context.primary_file().cloned())
                    .unwrap_or_default();
                self.callback.file_started(&path);
                self.file_path = Some(path);
            }
            EventKind::FileDone => {
                let Some(event) = file_payload(kind, json) else {
                    return;
                };
                let path = event
                    .input_test_file
                    .or_else(|| self.file_path.clone())
                    .or_else(|| self.context.primary_file().cloned())
                    .unwrap_or_default();
                self.file.time_taken = event
                    .time_taken
                    .unwrap_or_else(|| self.file.tests.iter().map(|t| t.time_taken).sum());
                self.callback.file_finished(&path, &self.file);
                self.summary.append(std::mem::take(&mut self.file));
                self.file_path = None;
            }
            EventKind::TestStart => {
                let Some(mut test) = payload::<TestCase>(kind, json) else {
                    return;
                };
                test.input_test_file = self.stamp(test.input_test_file.take());
                self.callback.test_started(&test);
            }
            EventKind::TestDone => {
                let Some(mut test) = payload::<TestCase>(kind, json) else {
                    return;
                };
                test.input_test_file = self.stamp(test.input_test_file.take());
                self.annotate(&mut test);
                self.callback.test_finished(&test);
                self.file.tests.push(test);
            }
            EventKind::Log => {
                let Some(mut log) = payload::<TestLog>(kind, json) else {
                    return;
                };
                log.input_test_file = self.stamp(log.input_test_file.take());
                self.callback.file_log(&log);
                self.file.logs.push(log);
            }
            EventKind::Error => {
                let Some(mut error) = payload::<TestError>(kind, json) else {
                    return;
                };
                error.input_test_file = self.stamp(error.input_test_file.take());
                self.callback.file_error(&error);
                self.file.errors.push(error);
            }
        }
    }

    /// Summary of everything read so far, including an unfinished file
    pub fn finish(mut self) -> TestSummary {
        self.flush_file();
        self.summary
    }

    fn flush_file(&mut self) {
        if !self.file.is_empty() {
            self.summary.append(std::mem::take(&mut self.file));
        }
    }

    fn stamp(&self, reported: Option<PathBuf>) -> Option<PathBuf> {
        reported
            .or_else(|| self.file_path.clone().filter(|p| !p.as_os_str().is_empty()))
            .or_else(|| self.context.primary_file().cloned())
    }

    fn annotate(&mut self, test: &mut TestCase) {
        let Some(file) = test.input_test_file.as_deref() else {
            return;
        };
        let key = path_key(file);
        let Some(positions) = self.context.positions.get(&key) else {
            return;
        };
        let index = self.arrivals.entry(key).or_insert(0);
        if let Some(position) = positions.get(*index) {
            test.line.get_or_insert(position.line);
            test.column.get_or_insert(position.column);
        }
        *index += 1;
    }
}

fn payload<T: DeserializeOwned>(kind: EventKind, json: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(kind = kind.as_str(), "skipping malformed payload: {}", e);
            None
        }
    }
}

/// File events may come without a payload at all
fn file_payload(kind: EventKind, json: &str) -> Option<FileEvent> {
    if json.is_empty() {
        return Some(FileEvent::default());
    }
    payload(kind, json)
}

enum Line {
    Complete,
    Oversized,
    Eof,
}

/// Read one line into `buf`, never holding more than [`MAX_LINE_BYTES`]
async fn next_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Line> {
    buf.clear();
    let limit = MAX_LINE_BYTES as u64;
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(Line::Eof);
    }
    if buf.len() < MAX_LINE_BYTES || buf.ends_with(b"\n") {
        return Ok(Line::Complete);
    }

    // Drain the rest of the line in bounded chunks
    loop {
        buf.clear();
        let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if read == 0 || buf.ends_with(b"\n") {
            buf.clear();
            return Ok(Line::Oversized);
        }
    }
}
