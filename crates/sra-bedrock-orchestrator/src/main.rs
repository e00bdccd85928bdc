//! sra-bedrock-org: SRA Bedrock multi-account security baseline
//!
//! Runs one lifecycle or fan-out event through the orchestrator, validates
//! event properties offline, and inspects the managed-resource ledger.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use sra_bedrock_common::defaults::{DEFAULT_EXECUTION_ROLE, SOLUTION_NAME, STATE_TABLE};
use sra_bedrock_orchestrator::aws::{AwsContext, SessionCache, SsmParameters, classify_anyhow_error};
use sra_bedrock_orchestrator::config::{
    AwsSettings, FanOutMode, FunctionIdentity, HandlerConfig, HandlerFlags, LedgerBackend,
};
use sra_bedrock_orchestrator::params::{BaselineParams, LogLevel};
use sra_bedrock_orchestrator::prereq::Prerequisites;
use sra_bedrock_orchestrator::reconcile::PolicyCompare;
use sra_bedrock_orchestrator::router::{self, Trigger};
use sra_bedrock_orchestrator::state::{DynamoLedger, SqliteLedger, list_records, open_db};
use std::io::Read;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sra-bedrock-org")]
#[command(about = "SRA Bedrock multi-account security baseline")]
#[command(version)]
struct Args {
    /// Log verbosity (default: the event's LOG_LEVEL, else INFO)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Arguments for the handle command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct HandleArgs {
    /// Event JSON file, or - for stdin
    #[arg(long, default_value = "-")]
    event: String,

    /// Home region of the handler
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// AWS partition
    #[arg(long, default_value = "aws")]
    partition: String,

    /// How per-region work is dispatched
    #[arg(long, value_enum, default_value_t = FanOutMode::Topic)]
    fan_out: FanOutMode,

    /// Where the managed-resource ledger lives
    #[arg(long, value_enum, default_value_t = LedgerBackend::Dynamodb)]
    ledger: LedgerBackend,

    /// How policy and configuration bodies are compared
    #[arg(long, value_enum, default_value_t = PolicyCompare::Exact)]
    policy_compare: PolicyCompare,

    /// Name of the handler function, used to derive its ARN
    #[arg(long, env = "AWS_LAMBDA_FUNCTION_NAME")]
    function_name: Option<String>,

    /// ARN of the handler function (overrides --function-name)
    #[arg(long, env = "SRA_FUNCTION_ARN")]
    function_arn: Option<String>,
}

impl From<HandleArgs> for HandlerConfig {
    fn from(args: HandleArgs) -> Self {
        Self {
            aws: AwsSettings {
                region: args.region,
                partition: args.partition,
            },
            function: FunctionIdentity {
                name: args.function_name,
                arn: args.function_arn,
            },
            flags: HandlerFlags {
                fan_out: args.fan_out,
                ledger: args.ledger,
                policy_compare: args.policy_compare,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one lifecycle or fan-out event and print the handler response
    Handle(Box<HandleArgs>),

    /// Decode and validate an event's properties without calling AWS
    Validate {
        /// Event JSON file, or - for stdin
        #[arg(long, default_value = "-")]
        event: String,
    },

    /// Inspect the managed-resource ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// List tracked resources
    List {
        /// Also show resources that were torn down
        #[arg(long)]
        include_removed: bool,

        /// Ledger backend to read
        #[arg(long, value_enum, default_value_t = LedgerBackend::Sqlite)]
        ledger: LedgerBackend,

        /// Home region (where the ledger table lives)
        #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
        region: String,

        /// AWS partition
        #[arg(long, default_value = "aws")]
        partition: String,

        /// Role assumed in the security account
        #[arg(long, default_value = DEFAULT_EXECUTION_ROLE)]
        execution_role: String,

        /// Solution whose records to list
        #[arg(long, default_value = SOLUTION_NAME)]
        solution: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");
    for cause in e.chain().skip(1) {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
    }

    if let Some(hint) = classify_anyhow_error(e).suggestion() {
        let _ = writeln!(stderr, "\n\x1b[1;36mHint:\x1b[0m {hint}");
    }

    let backtrace = e.backtrace();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
    }
}

fn read_event(path: &str) -> Result<Value> {
    let raw = if path == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read event from stdin")?;
        raw
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read event file {path}"))?
    };
    serde_json::from_str(&raw).context("Event is not valid JSON")
}

/// `LOG_LEVEL` as carried by a lifecycle event or a region message
fn event_log_level(event: &Value) -> Option<LogLevel> {
    let level = match event.get("ResourceProperties") {
        Some(properties) => properties.get("LOG_LEVEL").cloned(),
        None => event
            .pointer("/Records/0/Sns/Message")
            .and_then(Value::as_str)
            .and_then(|m| serde_json::from_str::<Value>(m).ok())
            .and_then(|m| m.pointer("/ResourceProperties/LOG_LEVEL").cloned()),
    };
    level.and_then(|l| l.as_str().and_then(|s| s.parse().ok()))
}

fn init_tracing(level: LogLevel, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(level.tracing_level().into())
        // Reduce noise from the AWS SDK
        .add_directive("aws_config=warn".parse()?)
        .add_directive("aws_smithy_runtime=warn".parse()?);

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let event = match &args.command {
        Command::Handle(handle) => Some(read_event(&handle.event)?),
        Command::Validate { event } => Some(read_event(event)?),
        Command::Ledger { .. } => None,
    };
    let level = args
        .log_level
        .or_else(|| event.as_ref().and_then(event_log_level))
        .unwrap_or_default();
    init_tracing(level, args.log_format)?;

    match args.command {
        Command::Handle(handle) => {
            let event = event.context("No event to handle")?;
            handle_command(&event, (*handle).into()).await?;
        }

        Command::Validate { .. } => {
            let event = event.context("No event to validate")?;
            validate_command(&event)?;
        }

        Command::Ledger {
            command:
                LedgerCommand::List {
                    include_removed,
                    ledger,
                    region,
                    partition,
                    execution_role,
                    solution,
                },
        } => {
            list_command(ledger, &region, &partition, &execution_role, &solution, include_removed).await?;
        }
    }

    Ok(())
}

/// Run one event and print the handler response
async fn handle_command(event: &Value, config: HandlerConfig) -> Result<()> {
    info!(
        region = %config.region(),
        fan_out = %config.fan_out(),
        ledger = %config.ledger(),
        "Handling event"
    );
    let response = router::handle_event(event, &config).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.status_code != 200 {
        anyhow::bail!("Invocation failed; see the log for details");
    }
    Ok(())
}

/// Print the decoded plan of an event
fn validate_command(event: &Value) -> Result<()> {
    let trigger = router::parse_event(event)?;
    let params = BaselineParams::from_value(trigger.properties())?;

    let kind = match &trigger {
        Trigger::Lifecycle { request, .. } => request.to_string(),
        Trigger::FanOut(messages) => format!("FanOut ({} regions)", messages.len()),
    };
    let checks: Vec<_> = params.deployed_checks().map(|c| &c.rule_name).collect();
    let filters: Vec<_> = params.deployed_filters().map(|f| &f.filter_name).collect();

    let plan = json!({
        "event": kind,
        "dry_run": params.dry_run(),
        "deployed_checks": checks,
        "deployed_filters": filters,
        "central_observability": params.observability.deploy,
        "params": params,
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// Print the records of one solution
async fn list_command(
    backend: LedgerBackend,
    region: &str,
    partition: &str,
    execution_role: &str,
    solution: &str,
    include_removed: bool,
) -> Result<()> {
    match backend {
        LedgerBackend::Sqlite => {
            let ledger = SqliteLedger::new(open_db().await?, STATE_TABLE);
            list_records(&ledger, solution, include_removed).await
        }
        LedgerBackend::Dynamodb => {
            let base = AwsContext::new(region).await;
            let prereqs = Prerequisites::load(&SsmParameters::from_context(&base)).await?;
            let sessions = SessionCache::new(base, partition, execution_role, SOLUTION_NAME);
            let security = sessions.session(&prereqs.security_account, region).await?;
            let ledger = DynamoLedger::new(security.dynamodb_client(), STATE_TABLE);
            list_records(&ledger, solution, include_removed).await
        }
    }
}
