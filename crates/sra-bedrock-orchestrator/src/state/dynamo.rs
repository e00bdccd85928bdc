//! DynamoDB ledger backend
//!
//! The table lives in the security account's home region. Records are keyed
//! by `solution_name` (hash) and `record_id` (range); lookups query the
//! partition and filter on the requested attributes.

use super::ledger::{LedgerError, StateLedger};
use super::types::{
    ManagedResource, RecordAttrs, RecordField, attrs_from_strings, columns, format_record_time,
    parse_record_time,
};
use crate::aws::error::{classify_sdk_error, ignore_not_found};
use crate::wait::{PollSchedule, poll_until_ready};
use anyhow::{Context, Result};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

type Item = HashMap<String, AttributeValue>;

/// Ledger stored in a DynamoDB table
#[derive(Debug, Clone)]
pub struct DynamoLedger {
    client: Client,
    table: String,
}

impl DynamoLedger {
    pub fn new(client: Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }

    fn missing_table<E>(&self, error: E, action: &'static str) -> anyhow::Error
    where
        E: aws_smithy_types::error::metadata::ProvideErrorMetadata
            + std::error::Error
            + Send
            + Sync
            + 'static,
    {
        if classify_sdk_error(&error).is_not_found() {
            LedgerError::TableNotFound {
                table: self.table.clone(),
            }
            .into()
        } else {
            anyhow::Error::new(error).context(action)
        }
    }

    async fn is_active(&self) -> Result<bool> {
        let output = self
            .client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await
            .context("Failed to describe state table")?;
        Ok(output.table().and_then(|t| t.table_status()) == Some(&TableStatus::Active))
    }

    /// Every item of a partition, optionally filtered, following pagination.
    async fn query_partition(
        &self,
        partition: &str,
        matching: &[(RecordField, &str)],
    ) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        let filter = matching
            .iter()
            .enumerate()
            .map(|(i, _)| format!("#f{i} = :v{i}"))
            .collect::<Vec<_>>()
            .join(" AND ");

        loop {
            let mut request = self
                .client
                .query()
                .table_name(&self.table)
                .key_condition_expression("#pk = :pk")
                .expression_attribute_names("#pk", columns::SOLUTION_NAME)
                .expression_attribute_values(":pk", AttributeValue::S(partition.to_string()))
                .set_exclusive_start_key(start_key.take());

            if !matching.is_empty() {
                request = request.filter_expression(&filter);
                for (i, (field, value)) in matching.iter().enumerate() {
                    request = request
                        .expression_attribute_names(format!("#f{i}"), field.column())
                        .expression_attribute_values(
                            format!(":v{i}"),
                            AttributeValue::S((*value).to_string()),
                        );
                }
            }

            let output = request
                .send()
                .await
                .map_err(|e| self.missing_table(e, "Failed to query state table"))?;

            items.extend(output.items().iter().cloned());

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(items)
    }

    fn to_resource(item: &Item) -> Option<ManagedResource> {
        let get = |name: &str| item.get(name).and_then(|v| v.as_s().ok()).cloned();
        Some(ManagedResource {
            solution_name: get(columns::SOLUTION_NAME)?,
            record_id: get(columns::RECORD_ID)?,
            timestamp: parse_record_time(&get(columns::DATE_TIME)?)?,
            attrs: attrs_from_strings(get)?,
        })
    }
}

impl StateLedger for DynamoLedger {
    fn table(&self) -> &str {
        &self.table
    }

    async fn table_exists(&self) -> Result<bool> {
        let described = ignore_not_found(
            self.client
                .describe_table()
                .table_name(&self.table)
                .send()
                .await,
        )
        .context("Failed to describe state table")?;
        Ok(described.is_some())
    }

    async fn create_table(&self) -> Result<()> {
        info!(table = %self.table, "Creating state table");

        self.client
            .create_table()
            .table_name(&self.table)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(columns::SOLUTION_NAME)
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(columns::RECORD_ID)
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(columns::SOLUTION_NAME)
                    .key_type(KeyType::Hash)
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(columns::RECORD_ID)
                    .key_type(KeyType::Range)
                    .build()?,
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .context("Failed to create state table")?;

        poll_until_ready(PollSchedule::STATE_TABLE, &self.table, || self.is_active()).await?;

        info!(table = %self.table, "State table active");
        Ok(())
    }

    async fn find(
        &self,
        partition: &str,
        matching: &[(RecordField, &str)],
    ) -> Result<Option<ManagedResource>> {
        let items = self.query_partition(partition, matching).await?;
        Ok(items.iter().find_map(Self::to_resource))
    }

    async fn insert(&self, partition: &str) -> Result<(String, DateTime<Utc>)> {
        let record_id = Uuid::now_v7().to_string();
        let now = Utc::now();

        self.client
            .put_item()
            .table_name(&self.table)
            .item(columns::SOLUTION_NAME, AttributeValue::S(partition.to_string()))
            .item(columns::RECORD_ID, AttributeValue::S(record_id.clone()))
            .item(columns::DATE_TIME, AttributeValue::S(format_record_time(now)))
            .condition_expression("attribute_not_exists(record_id)")
            .send()
            .await
            .map_err(|e| self.missing_table(e, "Failed to insert ledger record"))?;

        Ok((record_id, now))
    }

    async fn update(&self, partition: &str, record_id: &str, attrs: &RecordAttrs) -> Result<()> {
        let mut expression = Vec::new();
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key(columns::SOLUTION_NAME, AttributeValue::S(partition.to_string()))
            .key(columns::RECORD_ID, AttributeValue::S(record_id.to_string()));

        let timestamp = format_record_time(Utc::now());
        let pairs = attrs
            .pairs()
            .into_iter()
            .chain(std::iter::once((columns::DATE_TIME, timestamp.as_str())));
        for (i, (name, value)) in pairs.enumerate() {
            expression.push(format!("#a{i} = :a{i}"));
            request = request
                .expression_attribute_names(format!("#a{i}"), name)
                .expression_attribute_values(format!(":a{i}"), AttributeValue::S(value.to_string()));
        }

        request
            .update_expression(format!("SET {}", expression.join(", ")))
            .condition_expression("attribute_exists(record_id)")
            .send()
            .await
            .map_err(|e| self.missing_table(e, "Failed to update ledger record"))?;

        Ok(())
    }

    async fn list(&self, partition: &str) -> Result<Vec<ManagedResource>> {
        let items = self.query_partition(partition, &[]).await?;
        Ok(items.iter().filter_map(Self::to_resource).collect())
    }
}
