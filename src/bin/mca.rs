//! MCA CLI - Command-line interface for the MCA engine
//!
//! Commands:
//! - orchestrate: Run one analysis pass over a request file
//! - run: Drive the engine from an NDJSON command stream on stdin
//! - prior: Print a user's historical prior from a history file
//! - doctor: Diagnose configuration and history health
//! - schema: Print request/response schema information

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use mca_engine::api::ActionRequest;
use mca_engine::error::REQUIRED_FIELDS_MESSAGE;
use mca_engine::{
    EngineConfig, EngineError, InterventionEngine, MemoryStore, OrchestrateRequest, StoreError,
    ENGINE_VERSION, PRODUCER_NAME,
};

/// MCA - usage-pattern detection and tiered interventions
#[derive(Parser)]
#[command(name = "mca")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Detect AI-usage patterns and schedule interventions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one analysis pass over an orchestrate request
    Orchestrate {
        /// Request file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Evaluation time (RFC 3339); defaults to the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load pattern history from file
        #[arg(long)]
        load_history: Option<PathBuf>,

        /// Save pattern history to file after the pass
        #[arg(long)]
        save_history: Option<PathBuf>,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },

    /// Process an NDJSON command stream from stdin
    Run {
        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load pattern history from file
        #[arg(long)]
        load_history: Option<PathBuf>,

        /// Save pattern history to file on exit
        #[arg(long)]
        save_history: Option<PathBuf>,

        /// Flush output after each record (`--flush false` to buffer)
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        flush: bool,
    },

    /// Print a user's historical prior
    Prior {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Pattern history file
        #[arg(long)]
        history: PathBuf,

        /// Evaluation time (RFC 3339); defaults to the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Diagnose configuration and history health
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a pattern history file
        #[arg(long)]
        history: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Orchestrate request body
    Input,
    /// Orchestrate response body
    Output,
}

/// One line of the `run` command stream
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamCommand {
    /// Immediate analysis pass
    Orchestrate {
        at: Option<DateTime<Utc>>,
        request: OrchestrateRequest,
    },
    /// Debounced analysis pass, fired by a later `tick`
    Submit {
        at: Option<DateTime<Utc>>,
        request: OrchestrateRequest,
    },
    /// User action on an open intervention
    Action {
        at: Option<DateTime<Utc>>,
        request: ActionRequest,
    },
    /// Fire due timers
    Tick { at: Option<DateTime<Utc>> },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable. Filter with `MCA_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("MCA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), McaCliError> {
    match cli.command {
        Commands::Orchestrate {
            input,
            now,
            config,
            load_history,
            save_history,
            pretty,
        } => cmd_orchestrate(
            &input,
            now.unwrap_or_else(Utc::now),
            config.as_deref(),
            load_history.as_deref(),
            save_history.as_deref(),
            pretty,
        ),
        Commands::Run {
            config,
            load_history,
            save_history,
            flush,
        } => cmd_run(
            config.as_deref(),
            load_history.as_deref(),
            save_history.as_deref(),
            flush,
        ),
        Commands::Prior {
            user,
            history,
            now,
            config,
        } => cmd_prior(&user, &history, now.unwrap_or_else(Utc::now), config.as_deref()),
        Commands::Doctor {
            config,
            history,
            json,
        } => cmd_doctor(config.as_deref(), history.as_deref(), json),
        Commands::Schema {
            schema_type,
            json_schema,
        } => {
            cmd_schema(schema_type, json_schema);
            Ok(())
        }
    }
}

fn build_engine(
    config: Option<&Path>,
    load_history: Option<&Path>,
) -> Result<InterventionEngine<MemoryStore>, McaCliError> {
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let store = match load_history {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            let store = MemoryStore::from_json(&json)?;
            info!(path = %path.display(), "loaded pattern history");
            store
        }
        None => MemoryStore::new(),
    };

    Ok(InterventionEngine::with_store(config, Arc::new(store)))
}

fn save_history(engine: &InterventionEngine<MemoryStore>, path: &Path) -> Result<(), McaCliError> {
    let json = engine.store().to_json()?;
    fs::write(path, json)?;
    info!(path = %path.display(), "saved pattern history");
    Ok(())
}

fn read_input(input: &Path) -> Result<String, McaCliError> {
    if input.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_orchestrate(
    input: &Path,
    now: DateTime<Utc>,
    config: Option<&Path>,
    load_history: Option<&Path>,
    save_history_to: Option<&Path>,
    pretty: bool,
) -> Result<(), McaCliError> {
    let mut engine = build_engine(config, load_history)?;
    let body = read_input(input)?;
    let request: OrchestrateRequest = serde_json::from_str(&body)?;

    let response = engine.orchestrate(&request, now)?;

    let output = if pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", output);

    if let Some(path) = save_history_to {
        save_history(&engine, path)?;
    }
    Ok(())
}

fn cmd_run(
    config: Option<&Path>,
    load_history: Option<&Path>,
    save_history_to: Option<&Path>,
    flush: bool,
) -> Result<(), McaCliError> {
    let mut engine = build_engine(config, load_history)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let command: StreamCommand = serde_json::from_str(trimmed).map_err(|e| {
            McaCliError::ParseError(format!("line {}: {}", line_no + 1, e))
        })?;
        debug!(line = line_no + 1, ?command, "stream command");

        let outputs: Vec<serde_json::Value> = match command {
            StreamCommand::Orchestrate { at, request } => {
                let response = engine.orchestrate(&request, at.unwrap_or_else(Utc::now))?;
                vec![serde_json::json!({ "type": "analysis", "response": response })]
            }
            StreamCommand::Submit { at, request } => {
                let due = engine.submit_turns(request, at.unwrap_or_else(Utc::now))?;
                vec![serde_json::json!({ "type": "scheduled", "due": due })]
            }
            StreamCommand::Action { at, request } => {
                let response = engine.record_action(
                    &request.user_id,
                    request.intervention_id,
                    request.action,
                    at.unwrap_or_else(Utc::now),
                )?;
                vec![serde_json::json!({ "type": "action", "response": response })]
            }
            StreamCommand::Tick { at } => engine
                .tick(at.unwrap_or_else(Utc::now))
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
        };

        for output in outputs {
            writeln!(stdout, "{}", serde_json::to_string(&output)?)?;
        }
        if flush {
            stdout.flush()?;
        }
    }

    let status = engine.status();
    info!(
        users = status.users,
        active_sessions = status.active_sessions,
        persistence_degraded = status.persistence_degraded,
        persistence_failures = status.total_persistence_failures,
        "stream finished"
    );

    if let Some(path) = save_history_to {
        save_history(&engine, path)?;
    }
    Ok(())
}

fn cmd_prior(
    user: &str,
    history: &Path,
    now: DateTime<Utc>,
    config: Option<&Path>,
) -> Result<(), McaCliError> {
    let engine = build_engine(config, Some(history))?;
    let prior = engine.load_prior(user, now);
    let (top, probability) = prior.top();

    let report = serde_json::json!({
        "userId": user,
        "at": now,
        "top": top,
        "probability": probability,
        "probabilities": prior,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

fn check_config(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Config file does not exist (defaults will be used)".to_string(),
        };
    }
    match EngineConfig::load(path) {
        Ok(config) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Config valid (tiers {}/{}/{}, debounce {} ms)",
                config.tiers.soft_min, config.tiers.medium_min, config.tiers.hard_min, config.debounce_ms
            ),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

fn check_history(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: "history".to_string(),
            status: CheckStatus::Warning,
            message: "History file does not exist".to_string(),
        };
    }
    let loaded = fs::read_to_string(path)
        .map_err(StoreError::from)
        .and_then(|json| MemoryStore::from_json(&json))
        .and_then(|store| store.snapshot());
    match loaded {
        Ok(snapshot) => DoctorCheck {
            name: "history".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "History file valid ({} detections, {} outcomes, {} audits)",
                snapshot.detections.len(),
                snapshot.outcomes.len(),
                snapshot.audits.len()
            ),
        },
        Err(e) => DoctorCheck {
            name: "history".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot load history: {}", e),
        },
    }
}

fn cmd_doctor(config: Option<&Path>, history: Option<&Path>, json: bool) -> Result<(), McaCliError> {
    let mut checks: Vec<DoctorCheck> = vec![DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("MCA engine version {}", ENGINE_VERSION),
    }];

    if let Some(path) = config {
        checks.push(check_config(path));
    }
    if let Some(path) = history {
        checks.push(check_history(path));
    }

    // Check stdin is available (for streaming mode)
    let stdin_message = if atty::is(atty::Stream::Stdin) {
        "stdin is a TTY (interactive mode)"
    } else {
        "stdin is a pipe (streaming mode ready)"
    };
    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: stdin_message.to_string(),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("MCA Doctor Report");
        println!("=================");
        println!();
        for check in &report.checks {
            let icon = match check.status {
                CheckStatus::Ok => "✓",
                CheckStatus::Warning => "⚠",
                CheckStatus::Error => "✗",
            };
            println!("{} {}: {}", icon, check.name, check.message);
        }
    }

    if report.checks.iter().any(|c| c.status == CheckStatus::Error) {
        return Err(McaCliError::DoctorFailed);
    }
    Ok(())
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) {
    match (schema_type, json_schema) {
        (SchemaType::Input, true) => println!("{}", get_input_json_schema()),
        (SchemaType::Output, true) => println!("{}", get_output_json_schema()),
        (SchemaType::Input, false) => {
            println!("Input: POST /orchestrate request body");
            println!();
            println!("- sessionId: Conversation identifier (required)");
            println!("- userId: User identifier (required)");
            println!("- conversationTurns: Chronological array of turns (required, may be empty):");
            println!("  - role: \"user\" or \"ai\"");
            println!("  - content: Turn text");
            println!("  - timestamp: RFC 3339 time");
            println!("  - wasVerified, wasModified, wasRejected: User reaction to an AI turn");
            println!();
            println!("Missing fields are rejected with: {}", REQUIRED_FIELDS_MESSAGE);
        }
        (SchemaType::Output, false) => {
            println!("Output: POST /orchestrate response body");
            println!();
            println!("- pattern: Most probable usage pattern (A-F)");
            println!("- probability: Posterior probability of that pattern");
            println!("- confidence: Evidence confidence in [0, 1]");
            println!("- activeInterventions: Interventions currently open for the user");
            println!("- turnCount: Number of turns analysed");
            println!("- decision: {{ shouldDisplay, tier, mrType, reason, adjustments, message, interventionId }}");
            println!("- probabilities: {{ A, B, C, D, E, F }}");
            println!("- triggeredRules, recommendedTier, mixedWith, signals");
        }
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "mca.orchestrate_request.v1",
        "description": "Conversation turns submitted for pattern analysis",
        "type": "object",
        "required": ["sessionId", "userId", "conversationTurns"],
        "properties": {
            "sessionId": { "type": "string", "minLength": 1 },
            "userId": { "type": "string", "minLength": 1 },
            "conversationTurns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["role", "timestamp"],
                    "properties": {
                        "role": { "type": "string", "enum": ["user", "ai", "assistant"] },
                        "content": { "type": "string" },
                        "timestamp": { "type": "string", "format": "date-time" },
                        "wasVerified": { "type": "boolean" },
                        "wasModified": { "type": "boolean" },
                        "wasRejected": { "type": "boolean" }
                    }
                }
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    let probabilities = serde_json::json!({
        "type": "object",
        "properties": {
            "A": { "type": "number" }, "B": { "type": "number" }, "C": { "type": "number" },
            "D": { "type": "number" }, "E": { "type": "number" }, "F": { "type": "number" }
        }
    });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "mca.orchestrate_response.v1",
        "description": "Pattern detection and intervention decision",
        "type": "object",
        "required": ["pattern", "probability", "confidence", "activeInterventions", "turnCount", "decision"],
        "properties": {
            "pattern": { "type": "string", "enum": ["A", "B", "C", "D", "E", "F"] },
            "probability": { "type": "number" },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "activeInterventions": { "type": "array", "items": { "type": "object" } },
            "turnCount": { "type": "integer", "minimum": 0 },
            "decision": {
                "type": "object",
                "required": ["shouldDisplay", "reason"],
                "properties": {
                    "shouldDisplay": { "type": "boolean" },
                    "tier": { "type": ["string", "null"], "enum": ["soft", "medium", "hard", null] },
                    "mrType": { "type": ["string", "null"] },
                    "reason": { "type": "string" },
                    "adjustments": { "type": "array", "items": { "type": "string" } },
                    "interventionId": { "type": ["string", "null"] }
                }
            },
            "probabilities": probabilities,
            "triggeredRules": { "type": "array", "items": { "type": "string" } },
            "recommendedTier": { "type": ["string", "null"] },
            "mixedWith": { "type": "string" },
            "signals": { "type": "object" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum McaCliError {
    Io(io::Error),
    Engine(EngineError),
    Store(StoreError),
    Json(serde_json::Error),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for McaCliError {
    fn from(e: io::Error) -> Self {
        McaCliError::Io(e)
    }
}

impl From<EngineError> for McaCliError {
    fn from(e: EngineError) -> Self {
        McaCliError::Engine(e)
    }
}

impl From<StoreError> for McaCliError {
    fn from(e: StoreError) -> Self {
        McaCliError::Store(e)
    }
}

impl From<serde_json::Error> for McaCliError {
    fn from(e: serde_json::Error) -> Self {
        McaCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<McaCliError> for CliError {
    fn from(e: McaCliError) -> Self {
        match e {
            McaCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            McaCliError::Engine(e @ EngineError::Config(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'mca doctor --config <file>' for details".to_string()),
            },
            McaCliError::Engine(e) if e.is_client_error() => CliError {
                code: "VALIDATION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'mca schema input' for the request format".to_string()),
            },
            McaCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            McaCliError::Store(e) => CliError {
                code: "HISTORY_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'mca doctor --history <file>' for details".to_string()),
            },
            McaCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            McaCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            McaCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be an orchestrate, submit, action or tick command".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_flush(args: &[&str]) -> bool {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Run { flush, .. } => flush,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_run_flush_defaults_on() {
        assert!(run_flush(&["mca", "run"]));
    }

    #[test]
    fn test_run_flush_can_be_disabled() {
        assert!(!run_flush(&["mca", "run", "--flush", "false"]));
        assert!(run_flush(&["mca", "run", "--flush", "true"]));
    }
}
