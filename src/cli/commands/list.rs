//! List command - show suites and their containers

use crate::cli::args::{ListArgs, OutputFormat};
use crate::context::RunContext;
use crate::error::NavoResult;
use crate::runner::select_suites;
use crate::suite::{Suite, SuiteStatus};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the list command
pub async fn execute(args: ListArgs, ctx: &RunContext) -> NavoResult<()> {
    let names = select_suites(ctx, args.pattern.as_deref())?;

    let mut statuses = Vec::with_capacity(names.len());
    for name in &names {
        statuses.push(Suite::status(ctx, name).await?);
    }

    if statuses.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ui_ctx = UiContext::detect();
                ui::step_info(&ui_ctx, "No suites defined");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&statuses),
        OutputFormat::Json => print_json(&statuses)?,
        OutputFormat::Plain => print_plain(&statuses),
    }

    Ok(())
}

fn print_table(statuses: &[SuiteStatus]) {
    println!(
        "{:<24} {:<10} {:<14}",
        style("SUITE").bold(),
        style("STATUS").bold(),
        style("CONTAINER").bold()
    );
    println!("{}", "-".repeat(50));

    for status in statuses {
        let state = match (&status.container, status.running) {
            (Some(_), true) => style("running").green(),
            (Some(_), false) => style("stopped").yellow(),
            (None, _) => style("absent").dim(),
        };
        let container = status
            .container
            .as_deref()
            .map(short_id)
            .unwrap_or("-");

        println!("{:<24} {:<10} {:<14}", status.name, state, container);
    }

    println!();
    println!("{} suite(s)", statuses.len());
}

fn print_json(statuses: &[SuiteStatus]) -> NavoResult<()> {
    let json = serde_json::to_string_pretty(statuses)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(statuses: &[SuiteStatus]) {
    for status in statuses {
        println!("{}", status.name);
    }
}

/// Container ids are shown the way `docker ps` shows them
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
