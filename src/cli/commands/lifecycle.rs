//! Lifecycle commands - create, converge, verify, test, destroy

use crate::cli::args::SuiteArgs;
use crate::context::RunContext;
use crate::error::{NavoError, NavoResult};
use crate::runner::{select_suites, Operation, Outcome, Runner};
use crate::ui::{self, UiContext};
use std::sync::Arc;
use tracing::debug;

/// Run `operation` on every suite matching the pattern
pub async fn execute(
    operation: Operation,
    args: &SuiteArgs,
    ctx: Arc<RunContext>,
    concurrency: usize,
) -> NavoResult<()> {
    let ui_ctx = UiContext::detect();
    let suites = select_suites(&ctx, args.pattern.as_deref())?;
    if suites.is_empty() {
        ui::step_info(&ui_ctx, "No suites defined");
        return Ok(());
    }

    ctx.runtime.ensure_ready().await?;
    debug!("Using runtime: {}", ctx.runtime.runtime_name());

    let total = suites.len();
    ui::intro(
        &ui_ctx,
        &format!(
            "Running {} on {} suite(s), {} at a time",
            operation, total, concurrency
        ),
    );

    let mut summary = Runner::new(Arc::clone(&ctx), concurrency)
        .run(operation, suites)
        .await;
    summary.outcomes.sort_by(|a, b| a.name.cmp(&b.name));

    for outcome in &summary.outcomes {
        let log = outcome.log_path.display().to_string();
        match &outcome.outcome {
            Outcome::Passed => ui::step_ok(&ui_ctx, &format!("{} passed", outcome.name)),
            Outcome::Failed => ui::step_error_detail(
                &ui_ctx,
                &format!("{} failed", outcome.name),
                &format!("see {}", log),
            ),
            Outcome::Errored(e) => ui::step_error_detail(
                &ui_ctx,
                &format!("{} failed: {}", outcome.name, e),
                &format!("see {}", log),
            ),
        }
    }

    if summary.interrupted {
        ui::outro_warn(&ui_ctx, "Interrupted before every suite ran");
        return Err(NavoError::Interrupted);
    }

    let failed = summary.failures().count();
    if failed > 0 {
        ui::outro_error(&ui_ctx, &format!("{} of {} suite(s) failed", failed, total));
        return Err(NavoError::SuitesFailed { failed, total });
    }

    ui::outro_success(&ui_ctx, &format!("{} of {} suite(s) passed", total, total));
    Ok(())
}
