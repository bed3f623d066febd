//! Running a lifecycle operation across many suites
//!
//! Suites run as independent tasks, at most `concurrency` at a time. A
//! failing (or panicking) suite is recorded against its own name and never
//! disturbs the others. An interrupt stops new suites from starting; suites
//! already running are allowed to finish so no state write is cut short.

use crate::context::RunContext;
use crate::error::{NavoError, NavoResult};
use crate::suite::Suite;
use futures_util::FutureExt;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument};

/// Lifecycle operation applied to each selected suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Converge,
    Verify,
    Test,
    Destroy,
}

impl Operation {
    /// Run the operation, reporting whether the suite passed
    pub async fn apply(self, suite: &Suite) -> NavoResult<bool> {
        match self {
            Self::Create => suite.create().await.map(|_| true),
            Self::Converge => suite.converge().await,
            Self::Verify => suite.verify().await,
            Self::Test => suite.test().await,
            Self::Destroy => suite.destroy().await.map(|_| true),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Converge => write!(f, "converge"),
            Self::Verify => write!(f, "verify"),
            Self::Test => write!(f, "test"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// How one suite's operation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "result", content = "error")]
pub enum Outcome {
    Passed,
    Failed,
    Errored(String),
}

/// Result for one suite
#[derive(Debug, Clone, Serialize)]
pub struct SuiteOutcome {
    pub name: String,
    pub log_path: PathBuf,
    pub outcome: Outcome,
}

impl SuiteOutcome {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Aggregate result of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Outcomes in completion order
    pub outcomes: Vec<SuiteOutcome>,
    /// The run was interrupted before every suite started
    pub interrupted: bool,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &SuiteOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    /// Whether every selected suite ran and passed
    pub fn success(&self) -> bool {
        !self.interrupted && self.failures().next().is_none()
    }
}

/// Bounded worker pool over suites
pub struct Runner {
    ctx: Arc<RunContext>,
    concurrency: usize,
}

impl Runner {
    pub fn new(ctx: Arc<RunContext>, concurrency: usize) -> Self {
        Self {
            ctx,
            concurrency: concurrency.max(1),
        }
    }

    /// Run `operation` on `suites`, stopping early on Ctrl-C
    pub async fn run(&self, operation: Operation, suites: Vec<String>) -> RunSummary {
        let interrupt = async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler; never interrupt
                std::future::pending::<()>().await;
            }
        };
        self.run_until(operation, suites, interrupt).await
    }

    /// Run `operation` on `suites`, treating completion of `interrupt` as a
    /// request to stop starting new suites
    pub async fn run_until<F>(
        &self,
        operation: Operation,
        suites: Vec<String>,
        interrupt: F,
    ) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut started = Vec::new();
        let mut summary = RunSummary::default();

        tokio::pin!(interrupt);

        for name in suites {
            let permit = tokio::select! {
                biased;
                _ = &mut interrupt => {
                    summary.interrupted = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            debug!("Starting {} for suite {}", operation, name);
            let ctx = Arc::clone(&self.ctx);
            let span = info_span!("suite", name = %name);
            started.push(name.clone());
            tasks.spawn(
                async move {
                    let outcome = run_suite(ctx, operation, &name).await;
                    drop(permit);
                    outcome
                }
                .instrument(span),
            );
        }

        if summary.interrupted {
            warn!("Interrupted; waiting for running suites to finish");
        }

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => summary.outcomes.push(outcome),
                    Some(Err(e)) => warn!("Suite task did not complete: {}", e),
                    None => break,
                },
                _ = &mut interrupt, if !summary.interrupted => {
                    summary.interrupted = true;
                    warn!("Interrupted; waiting for running suites to finish");
                }
            }
        }

        // Tasks that died without reporting still count as failures
        let reported: BTreeSet<&str> = summary.outcomes.iter().map(|o| o.name.as_str()).collect();
        let missing: Vec<SuiteOutcome> = started
            .iter()
            .filter(|name| !reported.contains(name.as_str()))
            .map(|name| SuiteOutcome {
                name: name.clone(),
                log_path: self.ctx.project.suite_dir(name).join("log.log"),
                outcome: Outcome::Errored("suite task did not complete".to_string()),
            })
            .collect();
        summary.outcomes.extend(missing);

        summary
    }
}

async fn run_suite(ctx: Arc<RunContext>, operation: Operation, name: &str) -> SuiteOutcome {
    let log_path = ctx.project.suite_dir(name).join("log.log");
    let outcome = |outcome| SuiteOutcome {
        name: name.to_string(),
        log_path: log_path.clone(),
        outcome,
    };

    let suite = match Suite::new(ctx, name) {
        Ok(suite) => suite,
        Err(e) => return outcome(Outcome::Errored(e.to_string())),
    };

    match AssertUnwindSafe(operation.apply(&suite)).catch_unwind().await {
        Ok(Ok(true)) => outcome(Outcome::Passed),
        Ok(Ok(false)) => {
            suite.log().error(format!("{} failed for {}", operation, name));
            outcome(Outcome::Failed)
        }
        Ok(Err(e)) => {
            suite.log().error(format!("{} failed for {}: {}", operation, name, e));
            outcome(Outcome::Errored(e.to_string()))
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            suite.log().error(format!("{} panicked for {}: {}", operation, name, message));
            outcome(Outcome::Errored(format!("panicked: {}", message)))
        }
    }
}

/// Suites matching `pattern`, sorted by name.
///
/// No pattern selects every suite. A pattern equal to a suite name selects
/// just that suite; anything else is a regex searched for in each name.
pub fn select_suites(ctx: &RunContext, pattern: Option<&str>) -> NavoResult<Vec<String>> {
    let suites = &ctx.project.config.suites;
    let Some(pattern) = pattern else {
        return Ok(suites.keys().cloned().collect());
    };

    if suites.contains_key(pattern) {
        return Ok(vec![pattern.to_string()]);
    }

    let regex = Regex::new(pattern)?;
    let matched: Vec<String> = suites
        .keys()
        .filter(|name| regex.is_match(name))
        .cloned()
        .collect();

    if matched.is_empty() {
        return Err(NavoError::NoSuitesMatched(pattern.to_string()));
    }
    Ok(matched)
}

/// The single suite matching `pattern`
pub fn select_suite(ctx: &RunContext, pattern: &str) -> NavoResult<String> {
    let mut matched = select_suites(ctx, Some(pattern))?;
    if matched.len() > 1 {
        return Err(NavoError::AmbiguousSuite {
            pattern: pattern.to_string(),
            matches: matched.join(", "),
        });
    }
    matched
        .pop()
        .ok_or_else(|| NavoError::NoSuitesMatched(pattern.to_string()))
}
