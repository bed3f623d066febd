//! Login command - open a shell in a suite's container

use crate::cli::args::LoginArgs;
use crate::context::RunContext;
use crate::error::NavoResult;
use crate::runner::select_suite;
use crate::suite::Suite;
use std::sync::Arc;
use tracing::debug;

/// Execute the login command
pub async fn execute(args: LoginArgs, ctx: Arc<RunContext>) -> NavoResult<()> {
    let name = select_suite(&ctx, &args.pattern)?;
    ctx.runtime.ensure_ready().await?;

    let suite = Suite::new(ctx, &name)?;
    let code = suite.login().await?;
    debug!("Shell in {} exited with code {}", name, code);

    Ok(())
}
