//! Central observability dashboard in the security account

use super::observability::sharing_regions;
use crate::config::RunContext;
use crate::reconcile::kinds::DashboardSpec;
use crate::reconcile::{Provider, Reconciler};
use crate::state::StateLedger;
use crate::templates;
use anyhow::Result;

pub(super) async fn reconcile<P: Provider, L: StateLedger>(
    rec: &mut Reconciler<'_, P, L>,
    ctx: &RunContext,
) -> Result<()> {
    let body = templates::dashboard_body(
        &ctx.management_account,
        &ctx.home_region,
        &ctx.params.observability.bedrock_accounts,
        sharing_regions(ctx),
    )?;
    rec.ensure(
        &ctx.security_scope(),
        &DashboardSpec {
            name: ctx.solution().to_string(),
            body,
        },
    )
    .await?;
    Ok(())
}
