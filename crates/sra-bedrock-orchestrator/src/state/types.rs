//! Ledger record types

use chrono::{DateTime, Utc};
use sra_bedrock_common::{AwsService, ComponentState, ComponentType};

/// Attribute names shared by every ledger backend
pub mod columns {
    pub const SOLUTION_NAME: &str = "solution_name";
    pub const RECORD_ID: &str = "record_id";
    pub const DATE_TIME: &str = "date_time";
    pub const AWS_SERVICE: &str = "aws_service";
    pub const COMPONENT_STATE: &str = "component_state";
    pub const ACCOUNT: &str = "account";
    pub const COMPONENT_REGION: &str = "component_region";
    pub const COMPONENT_TYPE: &str = "component_type";
    pub const COMPONENT_NAME: &str = "component_name";
    pub const ARN: &str = "arn";
    pub const DESCRIPTION: &str = "description";
}

/// Record fields usable as exact-match criteria in `find`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Arn,
    Account,
    Region,
    ComponentType,
    ComponentName,
    ComponentState,
}

impl RecordField {
    pub fn column(self) -> &'static str {
        match self {
            RecordField::Arn => columns::ARN,
            RecordField::Account => columns::ACCOUNT,
            RecordField::Region => columns::COMPONENT_REGION,
            RecordField::ComponentType => columns::COMPONENT_TYPE,
            RecordField::ComponentName => columns::COMPONENT_NAME,
            RecordField::ComponentState => columns::COMPONENT_STATE,
        }
    }
}

/// Attributes written on every upsert of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAttrs {
    pub service: AwsService,
    pub component_state: ComponentState,
    pub account: String,
    pub region: String,
    pub component_type: ComponentType,
    pub component_name: String,
    pub arn: String,
    pub description: String,
}

impl RecordAttrs {
    /// Attribute pairs in storage form, excluding the timestamp
    pub fn pairs(&self) -> [(&'static str, &str); 8] {
        [
            (columns::AWS_SERVICE, self.service.as_ref()),
            (columns::COMPONENT_STATE, self.component_state.as_ref()),
            (columns::ACCOUNT, &self.account),
            (columns::COMPONENT_REGION, &self.region),
            (columns::COMPONENT_TYPE, self.component_type.as_ref()),
            (columns::COMPONENT_NAME, &self.component_name),
            (columns::ARN, &self.arn),
            (columns::DESCRIPTION, &self.description),
        ]
    }
}

/// One physical resource owned by the solution
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedResource {
    pub solution_name: String,
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub attrs: RecordAttrs,
}

impl ManagedResource {
    pub fn is_removed(&self) -> bool {
        self.attrs.component_state == ComponentState::Removed
    }
}

/// Format stored in `date_time`
pub fn format_record_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Parse a stored `date_time`
pub fn parse_record_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Rebuild the typed attributes from stored strings.
///
/// Returns `None` for placeholder rows that were inserted but never updated,
/// or rows written by an incompatible version.
pub fn attrs_from_strings(get: impl Fn(&str) -> Option<String>) -> Option<RecordAttrs> {
    Some(RecordAttrs {
        service: get(columns::AWS_SERVICE)?.parse().ok()?,
        component_state: get(columns::COMPONENT_STATE)?.parse().ok()?,
        account: get(columns::ACCOUNT)?,
        region: get(columns::COMPONENT_REGION)?,
        component_type: get(columns::COMPONENT_TYPE)?.parse().ok()?,
        component_name: get(columns::COMPONENT_NAME)?,
        arn: get(columns::ARN)?,
        description: get(columns::DESCRIPTION).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> RecordAttrs {
        RecordAttrs {
            service: AwsService::Iam,
            component_state: ComponentState::Implemented,
            account: "111111111111".into(),
            region: "Global".into(),
            component_type: ComponentType::Role,
            component_name: "sra-bedrock-check-guardrails".into(),
            arn: "arn:aws:iam::111111111111:role/sra-bedrock-check-guardrails".into(),
            description: "role for config rule".into(),
        }
    }

    #[test]
    fn test_attrs_from_pairs() {
        let attrs = sample();
        let stored: HashMap<&str, String> = attrs
            .pairs()
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        let rebuilt = attrs_from_strings(|k| stored.get(k).cloned()).unwrap();
        assert_eq!(rebuilt, attrs);
    }

    #[test]
    fn test_placeholder_row_is_skipped() {
        assert!(attrs_from_strings(|_| None).is_none());
    }

    #[test]
    fn test_record_time_parse() {
        let now = Utc::now();
        let parsed = parse_record_time(&format_record_time(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
        assert!(parse_record_time("yesterday").is_none());
    }
}
