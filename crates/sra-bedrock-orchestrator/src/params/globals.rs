//! Solution-wide scalar properties

use super::{Problems, element_errors, text};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static REPO_ZIP_URL: LazyLock<Regex> = LazyLock::new(|| pattern(r"^https://.*\.zip$"));
static BOOLEAN: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(true|false)$"));
static EXECUTION_ROLE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^sra-execution$"));
static SOLUTION_NAME: LazyLock<Regex> = LazyLock::new(|| pattern(r"^sra-bedrock-org$"));
static SEMVER: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[0-9]+\.[0-9]+\.[0-9]+$"));
static RETENTION: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^(1|3|5|7|14|30|60|90|120|150|180|365|400|545|731|1096|1827|2192|2557|2922|3288|3653)$",
    )
});
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"));
pub(super) static ACCOUNT_ID: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[0-9]+$"));
pub(super) static REGION_NAME: LazyLock<Regex> = LazyLock::new(|| pattern(r"^[a-z0-9-]+$"));

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("property patterns are valid regular expressions")
}

/// Log verbosity carried by the `LOG_LEVEL` property
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

/// Scalar properties shared by every phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalParams {
    pub repo_zip_url: String,
    pub dry_run: bool,
    pub execution_role: String,
    pub solution_name: String,
    pub solution_version: String,
    pub log_level: LogLevel,
    /// Validated only; the function's own log group belongs to the stack
    pub log_group_deploy: Option<bool>,
    pub log_group_retention: Option<i32>,
    /// Email subscribed to the alarm topic, when set
    pub alarm_email: Option<String>,
    /// Bedrock accounts fanned out to
    pub accounts: Vec<String>,
    /// Regions fanned out to (one message each)
    pub regions: Vec<String>,
}

/// Look up a property and check it against `re`.
///
/// Returns the value only when it is present and valid.
fn matching(
    properties: &Map<String, Value>,
    key: &str,
    re: &Regex,
    required: bool,
    problems: &mut Problems,
) -> Option<String> {
    let Some(value) = properties.get(key).map(text) else {
        if required {
            problems.push(format!("Parameter '{key}' is missing."));
        }
        return None;
    };
    if re.is_match(&value) {
        Some(value)
    } else {
        problems.push(format!(
            "Parameter '{key}' with value '{value}' does not match the expected pattern"
        ));
        None
    }
}

/// Decode a property holding a JSON list of identifiers
fn id_list(
    properties: &Map<String, Value>,
    key: &str,
    re: &Regex,
    problems: &mut Problems,
) -> Vec<String> {
    let Some(raw) = properties.get(key).map(text) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(ids) => {
            let errors = element_errors(key, &ids, re);
            if errors.is_empty() {
                ids
            } else {
                problems.extend(errors);
                Vec::new()
            }
        }
        Err(e) => {
            problems.push(format!("Parameter '{key}' is not a JSON list of strings: {e}"));
            Vec::new()
        }
    }
}

/// Decode the scalar properties, collecting every violation
pub(super) fn decode_globals(
    properties: &Map<String, Value>,
    problems: &mut Problems,
) -> Option<GlobalParams> {
    let repo_zip_url = matching(properties, "SRA_REPO_ZIP_URL", &REPO_ZIP_URL, true, problems);
    let dry_run = matching(properties, "DRY_RUN", &BOOLEAN, true, problems);
    let execution_role =
        matching(properties, "EXECUTION_ROLE_NAME", &EXECUTION_ROLE, true, problems);
    let solution_name = matching(properties, "SOLUTION_NAME", &SOLUTION_NAME, true, problems);
    let solution_version = matching(properties, "SOLUTION_VERSION", &SEMVER, true, problems);

    let log_level = match properties.get("LOG_LEVEL").map(text) {
        None => LogLevel::default(),
        Some(value) => value.parse().unwrap_or_else(|_| {
            problems.push(format!(
                "Parameter 'LOG_LEVEL' with value '{value}' does not match the expected pattern"
            ));
            LogLevel::default()
        }),
    };
    let log_group_deploy = matching(properties, "LOG_GROUP_DEPLOY", &BOOLEAN, false, problems)
        .map(|v| v == "true");
    let log_group_retention =
        matching(properties, "LOG_GROUP_RETENTION", &RETENTION, false, problems)
            .and_then(|v| v.parse().ok());

    let alarm_email = match properties.get("SRA_ALARM_EMAIL").map(text) {
        Some(email) if email.is_empty() => None,
        Some(_) => matching(properties, "SRA_ALARM_EMAIL", &EMAIL, false, problems),
        None => None,
    };

    let accounts = id_list(properties, "SRA-BEDROCK-ACCOUNTS", &ACCOUNT_ID, problems);
    let regions = id_list(properties, "SRA-BEDROCK-REGIONS", &REGION_NAME, problems);

    Some(GlobalParams {
        repo_zip_url: repo_zip_url?,
        dry_run: dry_run? == "true",
        execution_role: execution_role?,
        solution_name: solution_name?,
        solution_version: solution_version?,
        log_level,
        log_group_deploy,
        log_group_retention,
        alarm_email,
        accounts,
        regions,
    })
}
