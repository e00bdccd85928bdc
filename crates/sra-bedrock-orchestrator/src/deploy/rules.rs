//! Custom config rules and the functions that evaluate them

use crate::aws::iam::{managed_policy_arn, policy_arn};
use crate::aws::s3::rule_package_key;
use crate::config::RunContext;
use crate::params::CheckSpec;
use crate::reconcile::kinds::{
    AttachmentSpec, ConfigRuleSpec, FunctionSpec, PermissionSpec, PolicySpec, RoleSpec,
};
use crate::reconcile::{Provider, Reconciler, Scope};
use crate::state::StateLedger;
use crate::templates;
use anyhow::Result;
use sra_bedrock_common::defaults::{
    CONFIG_RULE_FREQUENCY, RULE_LAMBDA_HANDLER, RULE_LAMBDA_MEMORY_MB, RULE_LAMBDA_RUNTIME,
    RULE_LAMBDA_TIMEOUT_SECS, RULE_MANAGED_POLICIES, rule_basic_policy_name,
};
use tracing::{debug, instrument};

const CONFIG_PRINCIPAL: &str = "config.amazonaws.com";
const CONFIG_INVOKE_SID: &str = "config-invoke";

/// Role, policies, function, permission and rule for one check, in that order
#[instrument(skip_all, fields(rule = %check.rule_name, account = %scope.account))]
pub(super) async fn ensure_rule<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
    check: &CheckSpec,
    scope: &Scope,
) -> Result<()> {
    let rule = check.rule_name.as_str();
    debug!("Reconciling config rule");

    let role = rec
        .ensure(
            scope,
            &RoleSpec {
                name: rule.to_string(),
                trust_policy: templates::rule_trust_policy()?,
                description: format!("execution role of config rule {rule}"),
            },
        )
        .await?;

    let basic_name = rule_basic_policy_name(rule);
    let policies = [
        PolicySpec {
            document: templates::rule_basic_execution_policy(&ctx.partition, &scope.account, rule)?,
            description: format!("log permissions of config rule {rule}"),
            name: basic_name,
        },
        PolicySpec {
            name: rule.to_string(),
            document: templates::rule_permissions_policy(rule)?,
            description: format!("evaluation permissions of config rule {rule}"),
        },
    ];
    let mut attach: Vec<String> = Vec::with_capacity(policies.len() + RULE_MANAGED_POLICIES.len());
    for policy in &policies {
        rec.ensure(scope, policy).await?;
        attach.push(policy_arn(&ctx.partition, &scope.account, &policy.name));
    }
    attach.extend(
        RULE_MANAGED_POLICIES
            .iter()
            .map(|name| managed_policy_arn(&ctx.partition, name)),
    );
    for arn in &attach {
        rec.ensure_under(scope, &AttachmentSpec::new(rule, arn), &role)
            .await?;
    }

    let function = rec
        .ensure(
            scope,
            &FunctionSpec {
                name: rule.to_string(),
                role_arn: role.arn.clone(),
                code_bucket: ctx.staging_bucket().to_string(),
                code_key: rule_package_key(ctx.solution(), rule),
                runtime: RULE_LAMBDA_RUNTIME.to_string(),
                handler: RULE_LAMBDA_HANDLER.to_string(),
                timeout_secs: RULE_LAMBDA_TIMEOUT_SECS,
                memory_mb: RULE_LAMBDA_MEMORY_MB,
                description: format!("evaluator of config rule {rule}"),
            },
        )
        .await?;

    let permission = PermissionSpec::new(rule, CONFIG_INVOKE_SID, CONFIG_PRINCIPAL)
        .source_account(&scope.account);
    rec.ensure_under(scope, &permission, &function).await?;

    rec.ensure(
        scope,
        &ConfigRuleSpec {
            name: rule.to_string(),
            function_arn: function.arn.clone(),
            input_parameters: check.input_parameters_json(),
            frequency: CONFIG_RULE_FREQUENCY.to_string(),
        },
    )
    .await?;

    Ok(())
}
