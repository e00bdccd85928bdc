//! Lambda functions backing config rules, and their invoke permissions

use super::error::{AwsError, AwsResultExt, ignore_absent, ignore_not_found};
use super::provider::AwsProvider;
use crate::reconcile::kinds::{FunctionSpec, PermissionSpec};
use crate::reconcile::{Capability, Desired, Existing, Scope};
use anyhow::{Context, Result};
use aws_sdk_lambda::Client;
use aws_sdk_lambda::types::{FunctionCode, Runtime};
use backon::{ExponentialBuilder, Retryable};
use sra_bedrock_common::tags::solution_tags;
use std::time::Duration;
use tracing::{debug, info, warn};

const INVOKE_ACTION: &str = "lambda:InvokeFunction";

async fn client(provider: &AwsProvider, scope: &Scope) -> Result<Client> {
    Ok(provider.context(scope).await?.lambda_client())
}

/// Whether a function's resource policy already carries statement `sid`
fn policy_has_statement(policy: &str, sid: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(policy)
        .ok()
        .and_then(|doc| doc.get("Statement").and_then(|s| s.as_array()).cloned())
        .is_some_and(|statements| {
            statements
                .iter()
                .any(|s| s.get("Sid").and_then(|v| v.as_str()) == Some(sid))
        })
}

impl AwsProvider {
    async fn create_function_once(&self, lambda: &Client, desired: &FunctionSpec) -> Result<Existing> {
        let code = FunctionCode::builder()
            .s3_bucket(&desired.code_bucket)
            .s3_key(&desired.code_key)
            .build();

        let mut request = lambda
            .create_function()
            .function_name(&desired.name)
            .runtime(Runtime::from(desired.runtime.as_str()))
            .role(&desired.role_arn)
            .handler(&desired.handler)
            .code(code)
            .timeout(desired.timeout_secs)
            .memory_size(desired.memory_mb)
            .description(&desired.description);
        for (key, value) in solution_tags(self.solution()) {
            request = request.tags(key, value);
        }

        let arn = request
            .send()
            .await
            .aws_context("Failed to create Lambda function")?
            .function_arn
            .context("CreateFunction returned no ARN")?;
        Ok(Existing::new(arn, &desired.name))
    }
}

fn is_retryable_create_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<AwsError>()
        .is_some_and(|err| err.is_retryable())
}

impl Capability<FunctionSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &FunctionSpec) -> Result<Option<Existing>> {
        let lambda = client(self, scope).await?;
        let output = ignore_not_found(lambda.get_function().function_name(&desired.name).send().await)
            .aws_context("Failed to get Lambda function")?;

        Ok(output
            .and_then(|o| o.configuration)
            .and_then(|c| c.function_arn)
            .map(|arn| Existing::new(arn, &desired.name)))
    }

    async fn create(&self, scope: &Scope, desired: &FunctionSpec) -> Result<Existing> {
        let lambda = client(self, scope).await?;
        info!(function = %desired.name, account = %scope.account, region = %scope.region, "Creating Lambda function");

        // A role created moments ago is not assumable by Lambda right away.
        (|| async { self.create_function_once(&lambda, desired).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(2))
                    .with_max_delay(Duration::from_secs(20))
                    .with_max_times(8),
            )
            .when(is_retryable_create_error)
            .notify(|e, dur| match e.downcast_ref::<AwsError>() {
                Some(AwsError::IamPropagationDelay) => {
                    warn!(delay = ?dur, function = %desired.name, "Role not yet assumable by Lambda, retrying...");
                }
                _ => {
                    warn!(delay = ?dur, function = %desired.name, error = %e, "Transient error, retrying...");
                }
            })
            .await
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let lambda = client(self, scope).await?;
        info!(function = %existing.id, "Deleting Lambda function");

        ignore_absent(lambda.delete_function().function_name(&existing.id).send().await)
            .aws_context("Failed to delete Lambda function")?;
        Ok(())
    }
}

impl Capability<PermissionSpec> for AwsProvider {
    async fn find(&self, scope: &Scope, desired: &PermissionSpec) -> Result<Option<Existing>> {
        let lambda = client(self, scope).await?;
        let output = ignore_not_found(lambda.get_policy().function_name(&desired.function).send().await)
            .aws_context("Failed to get Lambda resource policy")?;

        let present = output
            .and_then(|o| o.policy)
            .is_some_and(|policy| policy_has_statement(&policy, &desired.statement_id));
        Ok(present.then(|| Existing::new(desired.key(), &desired.statement_id)))
    }

    async fn create(&self, scope: &Scope, desired: &PermissionSpec) -> Result<Existing> {
        let lambda = client(self, scope).await?;
        debug!(
            function = %desired.function,
            statement = %desired.statement_id,
            principal = %desired.principal,
            "Adding Lambda permission"
        );

        lambda
            .add_permission()
            .function_name(&desired.function)
            .statement_id(&desired.statement_id)
            .action(INVOKE_ACTION)
            .principal(&desired.principal)
            .set_source_arn(desired.source_arn.clone())
            .set_source_account(desired.source_account.clone())
            .send()
            .await
            .aws_context("Failed to add Lambda permission")?;

        Ok(Existing::new(desired.key(), &desired.statement_id))
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        let lambda = client(self, scope).await?;
        let function = existing
            .arn
            .rsplit_once('/')
            .map(|(function, _)| function)
            .context("Malformed Lambda permission key")?;
        debug!(function = %function, statement = %existing.id, "Removing Lambda permission");

        ignore_absent(
            lambda
                .remove_permission()
                .function_name(function)
                .statement_id(&existing.id)
                .send()
                .await,
        )
        .aws_context("Failed to remove Lambda permission")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_smithy_types::error::ErrorMetadata;

    #[test]
    fn test_policy_has_statement() {
        let policy = r#"{"Version":"2012-10-17","Statement":[{"Sid":"config-invoke","Effect":"Allow"}]}"#;
        assert!(policy_has_statement(policy, "config-invoke"));
        assert!(!policy_has_statement(policy, "sns-invoke"));
        assert!(!policy_has_statement("not json", "config-invoke"));
    }

    #[test]
    fn test_only_classified_transients_retry() {
        assert!(is_retryable_create_error(&AwsError::IamPropagationDelay.into()));
        assert!(!is_retryable_create_error(&anyhow::anyhow!("InvalidParameterValueException")));

        let not_assumable: Result<(), ErrorMetadata> = Err(ErrorMetadata::builder()
            .code("InvalidParameterValueException")
            .message("The role defined for the function cannot be assumed by Lambda.")
            .build());
        let err = not_assumable.aws_context("Failed to create Lambda function").unwrap_err();
        assert!(is_retryable_create_error(&err));

        let bad_runtime: Result<(), ErrorMetadata> = Err(ErrorMetadata::builder()
            .code("InvalidParameterValueException")
            .message("The runtime parameter of nodejs4.3 is no longer supported")
            .build());
        let err = bad_runtime.aws_context("Failed to create Lambda function").unwrap_err();
        assert!(!is_retryable_create_error(&err));
    }
}
