//! Purpose: `recstore` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Each command prints one JSON document on stdout (export may print raw bytes).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All store access goes through `api::Store` (lock + integrity guard).
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod store_paths;

use recstore::api::{
    Error, ErrorKind, ErrorPolicy, ExportFormat, ExportOptions, Store, StoreOptions, VerifyReport,
    VerifyStatus, to_exit_code,
};
use recstore::notice::{Notice, export_skip_notice, notice_json, notice_time_now, recovery_notices};
use store_paths::{default_store_dir, resolve_store_ref, store_label};

const DEFAULT_WAIT_MS: u64 = 5_000;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint(clap_error_hint(&err)));
            }
        },
    };

    let ctx = Context {
        store_dir: cli.dir.unwrap_or_else(default_store_dir),
        wait: Duration::from_millis(cli.wait_ms),
    };

    command_dispatch::dispatch_command(cli.command, &ctx)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| match value {
                "---help" => Some("--help"),
                "---version" => Some("--version"),
                _ => None,
            });
            replacement.map(OsString::from).unwrap_or_else(|| arg)
        })
        .collect()
}

#[derive(Parser)]
#[command(
    name = "recstore",
    version,
    about = "Crash-consistent local JSON record store",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Records are JSON objects addressed by id. Every write is journaled and fsynced
before it returns, so a crash leaves each record at its old or its new value.
"#,
    after_help = r#"EXAMPLES
  $ recstore init grades
  $ recstore put grades s1 '{"name": "An", "score": 8.5}'
  $ recstore get grades s1
  $ recstore export grades --format csv --out grades.csv

LEARN MORE
  $ recstore <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Store directory for named stores (default: ~/.recstore/stores)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[arg(
        long = "wait-ms",
        global = true,
        default_value_t = DEFAULT_WAIT_MS,
        help = "How long to wait for another process holding the store lock"
    )]
    wait_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatCli {
    Json,
    Jsonl,
    Csv,
    Html,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ErrorPolicyCli {
    Abort,
    Skip,
}

impl From<FormatCli> for ExportFormat {
    fn from(value: FormatCli) -> Self {
        match value {
            FormatCli::Json => ExportFormat::Json,
            FormatCli::Jsonl => ExportFormat::Jsonl,
            FormatCli::Csv => ExportFormat::Csv,
            FormatCli::Html => ExportFormat::Html,
        }
    }
}

impl From<ErrorPolicyCli> for ErrorPolicy {
    fn from(value: ErrorPolicyCli) -> Self {
        match value {
            ErrorPolicyCli::Abort => ErrorPolicy::Abort,
            ErrorPolicyCli::Skip => ErrorPolicy::Skip,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Create an empty store",
        after_help = r#"EXAMPLES
  $ recstore init grades
  $ recstore init ./data/grades

NOTES
  - A bare name resolves to <dir>/<name>.recstore; anything with a slash is a path"#
    )]
    Init {
        #[arg(help = "Store name or path")]
        store: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Insert or replace a record",
        after_help = r#"EXAMPLES
  $ recstore put grades s1 '{"name": "An"}'
  $ recstore put grades s1 -f record.json
  $ echo '{"name": "An"}' | recstore put grades s1 -f -

NOTES
  - The payload must be a JSON object
  - Prints the new version; versions start at 1 and increase on every put"#
    )]
    Put {
        #[arg(help = "Store name or path")]
        store: String,
        #[arg(help = "Record id")]
        id: String,
        #[arg(help = "Inline JSON object")]
        data: Option<String>,
        #[arg(
            short = 'f',
            long = "file",
            help = "Read the JSON object from a file (use - for stdin)",
            conflicts_with = "data",
            value_hint = ValueHint::FilePath
        )]
        file: Option<String>,
        #[arg(long, help = "Create the store if it is missing")]
        create: bool,
    },
    #[command(arg_required_else_help = true, about = "Print one record")]
    Get {
        #[arg(help = "Store name or path")]
        store: String,
        #[arg(help = "Record id")]
        id: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Remove a record",
        after_help = r#"NOTES
  - Deleting a missing record succeeds with "deleted": false"#
    )]
    Delete {
        #[arg(help = "Store name or path")]
        store: String,
        #[arg(help = "Record id")]
        id: String,
    },
    #[command(arg_required_else_help = true, about = "Show store state and the last recovery report")]
    Info {
        #[arg(help = "Store name or path")]
        store: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Export a consistent snapshot of all records",
        after_help = r#"EXAMPLES
  $ recstore export grades                                  # JSON document on stdout
  $ recstore export grades --format jsonl > grades.jsonl
  $ recstore export grades --format csv --errors skip --out grades.csv
  $ recstore export grades --format csv --out-dir reports   # export_grades_<seq>.csv
  $ recstore export grades --format html --out grades.html

NOTES
  - Records are ordered by id; exporting the same state twice yields identical bytes
  - CSV and HTML tables cannot hold nested arrays/objects; `--errors skip` leaves those records out"#
    )]
    Export {
        #[arg(help = "Store name or path")]
        store: String,
        #[arg(
            long,
            default_value = "json",
            value_enum,
            help = "Output format: json|jsonl|csv|html"
        )]
        format: FormatCli,
        #[arg(
            short = 'e',
            long = "errors",
            default_value = "abort",
            value_enum,
            help = "Per-record error policy: abort|skip"
        )]
        errors: ErrorPolicyCli,
        #[arg(
            long,
            help = "Write to this file atomically instead of stdout",
            conflicts_with = "out_dir",
            value_hint = ValueHint::FilePath
        )]
        out: Option<PathBuf>,
        #[arg(
            long = "out-dir",
            help = "Write to a default-named file in this directory",
            value_hint = ValueHint::DirPath
        )]
        out_dir: Option<PathBuf>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Check store files without opening or repairing them",
        after_help = r#"NOTES
  - Exit code 0 when the store is ok or only needs recovery; 7 when it is corrupt"#
    )]
    Verify {
        #[arg(help = "Store name or path")]
        store: String,
    },
    #[command(arg_required_else_help = true, about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

struct Context {
    store_dir: PathBuf,
    wait: Duration,
}

impl Context {
    fn store_path(&self, store: &str) -> PathBuf {
        resolve_store_ref(store, &self.store_dir)
    }

    fn options(&self) -> StoreOptions {
        StoreOptions::new().with_lock_timeout(self.wait)
    }

    /// Opens an existing store and reports anything recovery had to do.
    fn open(&self, store: &str, cmd: &str) -> Result<Store, Error> {
        let path = self.store_path(store);
        let opened = Store::open(&path, self.options()).map_err(|err| add_missing_store_hint(err, store))?;
        emit_recovery_notices(&opened, cmd);
        Ok(opened)
    }

    fn create(&self, store: &str) -> Result<Store, Error> {
        let path = self.store_path(store);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to create store directory")
                    .with_path(parent)
                    .with_source(err)
            })?;
        }
        Store::create(&path, self.options())
    }

    fn open_or_create(&self, store: &str, cmd: &str) -> Result<Store, Error> {
        match self.open(store, cmd) {
            Err(err) if err.kind() == ErrorKind::NotFound => self.create(store),
            other => other,
        }
    }
}

fn emit_recovery_notices(store: &Store, cmd: &str) {
    let report = store.recovery_report();
    if report.is_clean() {
        return;
    }
    let time = notice_time_now().unwrap_or_default();
    for notice in recovery_notices(report, cmd, &store_label(store.path()), &time) {
        emit_notice(&notice);
    }
}

fn emit_skip_notices(store: &Path, failures: &[recstore::api::RecordFailure]) {
    let time = notice_time_now().unwrap_or_default();
    let label = store_label(store);
    for failure in failures {
        emit_notice(&export_skip_notice(failure, &label, &time));
    }
}

fn read_payload(data: Option<String>, file: Option<String>) -> Result<Value, Error> {
    match (data, file) {
        (Some(data), _) => parse_inline_json(&data),
        (None, Some(file)) => {
            let mut reader = open_payload_reader(&file)?;
            let mut text = String::new();
            reader.read_to_string(&mut text).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read payload")
                    .with_path(&file)
                    .with_source(err)
            })?;
            parse_inline_json(&text)
        }
        (None, None) => Err(Error::new(ErrorKind::Usage)
            .with_message("missing record data")
            .with_hint("Pass a JSON object inline, or use -f <file> (or -f - for stdin).")),
    }
}

fn open_payload_reader(path: &str) -> Result<Box<dyn Read>, Error> {
    if path == "-" {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to open payload file")
            .with_path(path)
            .with_source(err)
    })?;
    Ok(Box::new(file))
}

fn parse_inline_json(data: &str) -> Result<Value, Error> {
    serde_json::from_str(data).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid json")
            .with_hint("Provide a single JSON object (e.g. '{\"x\":1}').")
            .with_source(err)
    })
}

fn export_options(format: FormatCli, errors: ErrorPolicyCli) -> ExportOptions {
    ExportOptions::new(format.into()).with_errors(errors.into())
}

fn verify_exit_code(report: &VerifyReport) -> i32 {
    if report.status == VerifyStatus::Corrupt {
        to_exit_code(ErrorKind::Corrupt)
    } else {
        0
    }
}

fn write_stdout(bytes: &[u8]) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(bytes)
        .and_then(|()| stdout.flush())
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write output")
                .with_source(err)
        })
}

fn add_missing_store_hint(err: Error, store: &str) -> Error {
    if err.kind() != ErrorKind::NotFound || err.id().is_some() {
        return err;
    }
    err.with_hint(format!(
        "Create it first: recstore init {store} (or pass --dir to look elsewhere)."
    ))
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check directory permissions or use --dir to a writable location.",
        ),
        ErrorKind::Busy => err.with_hint(
            "Store is busy (another process holds the lock). Retry or raise --wait-ms.",
        ),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Store files appear corrupt. Run `recstore verify` for details.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("recstore {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(json!({
            "name": "recstore",
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_notice(notice: &Notice) {
    if io::stderr().is_terminal() {
        eprintln!("notice: {} (store: {})", notice.message, notice.store);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::StoreClosed => "store is closed".to_string(),
        ErrorKind::InvalidPayload => "invalid payload".to_string(),
        ErrorKind::WriteFailed => "write failed".to_string(),
        ErrorKind::Export => "export failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(id) = err.id() {
        inner.insert("id".to_string(), json!(id));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(seq) = err.seq() {
        inner.insert("seq".to_string(), json!(seq));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(id) = err.id() {
        lines.push(format!("id: {id}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(seq) = err.seq() {
        lines.push(format!("seq: {seq}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `recstore --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "recstore") else {
        return "Try `recstore --help`.".to_string();
    };

    let parts = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect::<Vec<_>>();

    if parts.is_empty() {
        return "Try `recstore --help`.".to_string();
    }
    format!("Try `recstore {} --help`.", parts.join(" "))
}
