//! Lifecycle event and resource-property fixtures
//!
//! Builders produce events shaped exactly like the ones the stack manager
//! and the configuration topic deliver, so tests exercise the same decoding
//! path as production invocations.

use serde_json::{Map, Value, json};
use sra_bedrock_common::defaults::{FANOUT_ACTION, SOLUTION_NAME};

/// Archive URL accepted by parameter validation
pub const TEST_REPO_ZIP_URL: &str =
    "https://github.com/aws-samples/aws-security-reference-architecture-examples/archive/refs/heads/main.zip";

/// Response URL used by stack-resource fixtures
pub const TEST_RESPONSE_URL: &str = "https://cloudformation-custom-resource-response.example.com/signed";

/// JSON-encoded per-check parameters, as the stack template passes them
pub fn check_spec(deploy: bool, accounts: &[&str], regions: &[&str], input_params: Value) -> String {
    json!({
        "deploy": deploy.to_string(),
        "accounts": accounts,
        "regions": regions,
        "input_params": input_params,
    })
    .to_string()
}

/// JSON-encoded per-filter parameters
pub fn filter_spec(deploy: bool, accounts: &[&str], regions: &[&str], filter_params: Value) -> String {
    json!({
        "deploy": deploy.to_string(),
        "accounts": accounts,
        "regions": regions,
        "filter_params": filter_params,
    })
    .to_string()
}

/// JSON-encoded central observability parameters
pub fn observability_spec(deploy: bool, bedrock_accounts: &[&str], regions: &[&str]) -> String {
    json!({
        "deploy": deploy.to_string(),
        "bedrock_accounts": bedrock_accounts,
        "regions": regions,
    })
    .to_string()
}

/// Builder for stack lifecycle events
#[derive(Debug, Clone)]
pub struct EventBuilder {
    request_type: String,
    properties: Map<String, Value>,
    stack_resource: bool,
}

impl EventBuilder {
    fn new(request_type: &str) -> Self {
        let mut properties = Map::new();
        for (key, value) in [
            ("SRA_REPO_ZIP_URL", TEST_REPO_ZIP_URL),
            ("DRY_RUN", "true"),
            ("EXECUTION_ROLE_NAME", "sra-execution"),
            ("SOLUTION_NAME", SOLUTION_NAME),
            ("SOLUTION_VERSION", "1.0.0"),
            ("LOG_LEVEL", "INFO"),
            ("SRA_ALARM_EMAIL", ""),
            ("SRA-BEDROCK-ACCOUNTS", "[]"),
            ("SRA-BEDROCK-REGIONS", "[]"),
        ] {
            properties.insert(key.to_string(), Value::String(value.to_string()));
        }
        Self {
            request_type: request_type.to_string(),
            properties,
            stack_resource: false,
        }
    }

    /// A `Create` event with valid global properties
    pub fn create() -> Self {
        Self::new("Create")
    }

    /// An `Update` event with valid global properties
    pub fn update() -> Self {
        Self::new("Update")
    }

    /// A `Delete` event with valid global properties
    pub fn delete() -> Self {
        Self::new("Delete")
    }

    /// Set the `DRY_RUN` property
    pub fn dry_run(self, dry_run: bool) -> Self {
        self.property("DRY_RUN", dry_run.to_string())
    }

    /// Set the fan-out account list
    pub fn accounts(self, accounts: &[&str]) -> Self {
        self.property("SRA-BEDROCK-ACCOUNTS", json!(accounts).to_string())
    }

    /// Set the fan-out region list
    pub fn regions(self, regions: &[&str]) -> Self {
        self.property("SRA-BEDROCK-REGIONS", json!(regions).to_string())
    }

    /// Set an arbitrary resource property
    pub fn property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), Value::String(value.into()));
        self
    }

    /// Remove a resource property
    pub fn without(mut self, key: &str) -> Self {
        self.properties.remove(key);
        self
    }

    /// Mark the event as coming from a stack-managed custom resource, which
    /// makes the handler signal the outcome to the response URL
    pub fn stack_resource(mut self) -> Self {
        self.stack_resource = true;
        self
    }

    /// Build the event JSON
    pub fn build(self) -> Value {
        let mut event = json!({
            "RequestType": self.request_type,
            "ResourceProperties": Value::Object(self.properties),
        });
        if self.stack_resource {
            event["ResourceType"] = json!("Custom::LambdaCustomResource");
            event["ResponseURL"] = json!(TEST_RESPONSE_URL);
            event["StackId"] = json!("arn:aws:cloudformation:us-east-1:000000000000:stack/sra-bedrock-org/1");
            event["RequestId"] = json!("request-1");
            event["LogicalResourceId"] = json!("SraBedrockOrgResource");
        }
        event
    }

    /// Properties only, as carried inside fan-out messages
    pub fn properties(self) -> Value {
        Value::Object(self.properties)
    }
}

/// A fan-out message event as delivered by the configuration topic
pub fn fanout_event(accounts: &[&str], region: &str, properties: Value) -> Value {
    let message = json!({
        "Accounts": accounts,
        "Region": region,
        "ResourceProperties": properties,
        "Action": FANOUT_ACTION,
    });
    json!({
        "Records": [
            {
                "EventSource": "aws:sns",
                "Sns": {
                    "Subject": "SRA Bedrock Configuration",
                    "Message": message.to_string(),
                }
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_event_defaults() {
        let event = EventBuilder::create().build();
        assert_eq!(event["RequestType"], "Create");
        assert_eq!(event["ResourceProperties"]["DRY_RUN"], "true");
        assert!(event.get("ResponseURL").is_none());
    }

    #[test]
    fn test_stack_resource_fields() {
        let event = EventBuilder::delete().stack_resource().build();
        assert_eq!(event["ResponseURL"], TEST_RESPONSE_URL);
        assert_eq!(event["LogicalResourceId"], "SraBedrockOrgResource");
    }

    #[test]
    fn test_check_spec_encoding() {
        let spec = check_spec(true, &["111111111111"], &["us-east-1"], json!({}));
        let decoded: Value = serde_json::from_str(&spec).unwrap();
        assert_eq!(decoded["deploy"], "true");
        assert_eq!(decoded["accounts"][0], "111111111111");
    }

    #[test]
    fn test_fanout_message_is_string() {
        let event = fanout_event(&["111111111111"], "us-east-1", json!({}));
        let message = event["Records"][0]["Sns"]["Message"].as_str().unwrap();
        let decoded: Value = serde_json::from_str(message).unwrap();
        assert_eq!(decoded["Region"], "us-east-1");
        assert_eq!(decoded["Action"], "configure");
    }
}
