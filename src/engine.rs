//! External rule engine adapter
//!
//! The engine is consumed as a black box: given a fixture file and a rule
//! file it returns the violations it found, or an error. [`PmdCli`] runs the
//! PMD command line as a subprocess and reads its XML report.

use crate::config::PmdConfig;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exit codes PMD uses when the run itself succeeded
const SUCCESS_EXIT_CODES: &[i32] = &[0, 4];

/// A violation reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolViolation {
    pub line: usize,
    pub column: usize,
    pub rule: String,
    pub message: String,
    pub priority: u8,
}

/// Successful engine run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineReport {
    pub violations: Vec<ToolViolation>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Engine timed out after {0}s")]
    Timeout(u64),

    #[error("Engine exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("Unparsable engine report: {0}")]
    Report(String),

    #[error("Engine could not process the fixture: {0}")]
    Processing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs a rule against a fixture file
pub trait EngineAdapter: Send + Sync {
    fn run(&self, fixture: &Path, rule: &Path) -> Result<EngineReport, EngineError>;
}

/// Captured result of a finished subprocess
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command with a hard timeout, capturing its output through files
pub(crate) fn run_with_timeout(
    command: &str,
    args: &[String],
    timeout: Duration,
) -> Result<ProcessOutput, EngineError> {
    let mut stdout_file = tempfile::tempfile()?;
    let mut stderr_file = tempfile::tempfile()?;

    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file.try_clone()?))
        .stderr(Stdio::from(stderr_file.try_clone()?))
        .spawn()
        .map_err(|source| EngineError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() >= timeout {
                    abandon(&mut child);
                    return Err(EngineError::Timeout(timeout.as_secs()));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                abandon(&mut child);
                return Err(e.into());
            }
        }
    };

    Ok(ProcessOutput {
        code: status.code(),
        stdout: read_back(&mut stdout_file)?,
        stderr: read_back(&mut stderr_file)?,
    })
}

/// Kill and reap a child that is no longer waited on
fn abandon(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("Could not kill engine process {}: {}", child.id(), e);
    }
    let _ = child.wait();
}

fn read_back(file: &mut File) -> std::io::Result<String> {
    use std::io::{Seek, SeekFrom};

    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// PMD command-line adapter
#[derive(Debug, Clone)]
pub struct PmdCli {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl PmdCli {
    pub fn new(config: &PmdConfig, timeout_secs: u64) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// Arguments with placeholders substituted
    pub fn arguments(&self, fixture: &Path, rule: &Path) -> Vec<String> {
        let fixture = fixture.to_string_lossy();
        let rule = rule.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{rule}", &rule).replace("{fixture}", &fixture))
            .collect()
    }
}

impl EngineAdapter for PmdCli {
    fn run(&self, fixture: &Path, rule: &Path) -> Result<EngineReport, EngineError> {
        let args = self.arguments(fixture, rule);
        log::debug!("Running {} {}", self.command, args.join(" "));

        let output = run_with_timeout(&self.command, &args, self.timeout)?;
        match output.code {
            Some(code) if SUCCESS_EXIT_CODES.contains(&code) => parse_report(&output.stdout),
            code => Err(EngineError::Exit {
                code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

/// Parse PMD's XML report
///
/// `<error>` elements mean the fixture could not be processed and are
/// reported as an engine failure.
pub fn parse_report(xml: &str) -> Result<EngineReport, EngineError> {
    if xml.trim().is_empty() {
        return Err(EngineError::Report("empty output".to_string()));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut violations = Vec::new();
    let mut current: Option<ToolViolation> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"pmd" => saw_root = true,
                b"violation" => current = Some(violation_from(&e)?),
                b"error" => return Err(processing_error(&e)),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pmd" => saw_root = true,
                b"violation" => violations.push(violation_from(&e)?),
                b"error" => return Err(processing_error(&e)),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(violation) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| EngineError::Report(err.to_string()))?;
                    violation.message.push_str(text.trim());
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(violation) = current.as_mut() {
                    violation.message.push_str(String::from_utf8_lossy(&e).trim());
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"violation" {
                    if let Some(violation) = current.take() {
                        violations.push(violation);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Report(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(EngineError::Report("missing <pmd> root element".to_string()));
    }
    Ok(EngineReport { violations })
}

fn attr(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn violation_from(e: &BytesStart) -> Result<ToolViolation, EngineError> {
    let line = attr(e, "beginline")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| EngineError::Report("violation without beginline".to_string()))?;

    Ok(ToolViolation {
        line,
        column: attr(e, "begincolumn").and_then(|v| v.parse().ok()).unwrap_or(0),
        rule: attr(e, "rule").unwrap_or_default(),
        message: String::new(),
        priority: attr(e, "priority").and_then(|v| v.parse().ok()).unwrap_or(3),
    })
}

fn processing_error(e: &BytesStart) -> EngineError {
    let message = attr(e, "msg").unwrap_or_else(|| "unknown processing error".to_string());
    EngineError::Processing(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<pmd xmlns="http://pmd.sourceforge.net/report/2.0.0" version="7.0.0">
<file name="/tmp/Fixture1.cls">
<violation beginline="3" endline="3" begincolumn="17" endcolumn="18" rule="AvoidMagicNumbers" ruleset="custom" priority="2">
Avoid magic numbers
</violation>
<violation beginline="7" begincolumn="5" rule="AvoidMagicNumbers" priority="3">second &amp; last</violation>
</file>
</pmd>
"#;

    #[test]
    fn test_parse_report() {
        let report = parse_report(REPORT).unwrap();
        assert_eq!(report.violations.len(), 2);

        let first = &report.violations[0];
        assert_eq!(first.line, 3);
        assert_eq!(first.column, 17);
        assert_eq!(first.rule, "AvoidMagicNumbers");
        assert_eq!(first.message, "Avoid magic numbers");
        assert_eq!(first.priority, 2);

        assert_eq!(report.violations[1].line, 7);
        assert_eq!(report.violations[1].message, "second & last");
    }

    #[test]
    fn test_parse_report_without_violations() {
        let report = parse_report(r#"<pmd version="7.0.0"></pmd>"#).unwrap();
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_parse_report_processing_error() {
        let xml = r#"<pmd><error filename="F.cls" msg="ParseException: unexpected token"/></pmd>"#;
        match parse_report(xml) {
            Err(EngineError::Processing(msg)) => assert!(msg.contains("ParseException")),
            other => panic!("expected processing error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_report_garbage() {
        assert!(matches!(parse_report(""), Err(EngineError::Report(_))));
        assert!(matches!(
            parse_report("Exception in thread main"),
            Err(EngineError::Report(_))
        ));
    }

    #[test]
    fn test_arguments_substitution() {
        let pmd = PmdCli::new(&PmdConfig::default(), 30);
        let args = pmd.arguments(&PathBuf::from("/tmp/F.cls"), &PathBuf::from("rules/R.xml"));
        assert_eq!(
            args,
            vec!["check", "--no-cache", "-f", "xml", "-R", "rules/R.xml", "-d", "/tmp/F.cls"]
        );
    }

    #[test]
    fn test_missing_command_is_spawn_error() {
        let config = PmdConfig {
            command: "rulecov-no-such-binary".to_string(),
            ..PmdConfig::default()
        };
        let pmd = PmdCli::new(&config, 5);
        let result = pmd.run(Path::new("F.cls"), Path::new("R.xml"));
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let result = run_with_timeout("sleep", &["5".to_string()], Duration::from_millis(200));
        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_abandon_reaps_child() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        abandon(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_captured() {
        let output = run_with_timeout(
            "sh",
            &["-c".to_string(), "echo out; echo err >&2; exit 4".to_string()],
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(output.code, Some(4));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
