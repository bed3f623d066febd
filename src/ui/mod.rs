//! UI helpers for consistent CLI output
//!
//! `cliclack` status lines with a plain fallback for CI and non-interactive
//! environments. Progress of individual suites is reported through
//! `tracing`; these helpers frame a run and summarize it.

mod context;
mod output;

pub use context::UiContext;
pub use output::{
    intro, outro_error, outro_success, outro_warn, step_error_detail, step_info, step_ok,
};
