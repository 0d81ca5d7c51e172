//! Human and JSON rendering for studysync commands.
//!
//! Every command builds a [`Report`] for people and hands a serializable
//! payload for `--json`. Both outcomes share one envelope:
//!
//! ```json
//! { "schema_version": "studysync.v1", "command": "task add",
//!   "status": "success", "data": { ... } }
//! ```

use serde::Serialize;

use crate::channels::Toast;
use crate::error::{Error, JsonError, Result};

pub const SCHEMA_VERSION: &str = "studysync.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// What a command prints when not in JSON mode.
#[derive(Debug, Clone, Default)]
pub struct Report {
    headline: String,
    fields: Vec<(String, String)>,
    items: Vec<String>,
    warnings: Vec<String>,
    hints: Vec<String>,
}

impl Report {
    pub fn new(headline: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            ..Self::default()
        }
    }

    pub fn field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn item(&mut self, line: impl Into<String>) {
        self.items.push(line.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// A follow-up command worth running next.
    pub fn hint(&mut self, command: impl Into<String>) {
        self.hints.push(command.into());
    }

    /// Headline, then aligned `key  value` fields, indented items,
    /// warnings and hints.
    pub fn render(&self) -> String {
        let mut lines = vec![self.headline.clone()];

        let width = self.fields.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in &self.fields {
            if value.is_empty() {
                lines.push(format!("  {key}"));
            } else {
                lines.push(format!("  {key:<width$}  {value}"));
            }
        }
        lines.extend(self.items.iter().map(|item| format!("    {item}")));
        lines.extend(self.warnings.iter().map(|warning| format!("warning: {warning}")));
        lines.extend(self.hints.iter().map(|hint| format!("next: {hint}")));

        lines.join("\n")
    }
}

/// One line per toast, as `watch` prints them.
pub fn render_toast(toast: &Toast) -> String {
    format!("[{}] {}", toast.level, toast.message)
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    warnings: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    next_steps: &'a [String],
}

fn print_envelope<T: Serialize>(envelope: &Envelope<'_, T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    report: Option<&Report>,
) -> Result<()> {
    if options.json {
        return print_envelope(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data: Some(data),
            error: None,
            warnings: report.map(|r| r.warnings.as_slice()).unwrap_or_default(),
            next_steps: report.map(|r| r.hints.as_slice()).unwrap_or_default(),
        });
    }

    if let (false, Some(report)) = (options.quiet, report) {
        println!("{}", report.render());
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let hints = recovery_hints(err);
    if json {
        return print_envelope::<()>(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            data: None,
            error: Some(ErrorBody {
                message: err.to_string(),
                code: err.exit_code(),
                kind: error_kind(err),
                details: JsonError::from(err).details,
            }),
            warnings: &[],
            next_steps: &hints,
        });
    }

    eprintln!("error: {err}");
    if let Some(hint) = hints.first() {
        eprintln!("try: {hint}");
    }
    Ok(())
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        2 => "user_error",
        3 => "blocked",
        _ => "operation_failed",
    }
}

fn recovery_hints(err: &Error) -> Vec<String> {
    let hint = match err {
        Error::NotInitialized(_) => "studysync init",
        Error::InvalidConfig(_) => "fix .studysync.toml then retry",
        Error::TaskNotFound(_) => "studysync task list",
        Error::CourseNotFound(_) => "studysync course list",
        Error::LockFailed(_) => "retry once the other studysync process finishes",
        _ => return Vec::new(),
    };
    vec![hint.to_string()]
}
