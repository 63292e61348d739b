//! UI module for consistent CLI output
//!
//! Uses `cliclack` for spinners and prompts with automatic fallback to plain
//! output in CI/non-interactive environments. Progress and prompts never
//! write to stdout in plain mode, so command results stay pipeable.
//!
//! # Example
//!
//! ```rust,ignore
//! use depcache::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Fetching ToolX 2.0.0");
//! // ... do work ...
//! spinner.clear();
//!
//! ui::step_ok_detail(&ctx, "ToolX updated", "deps/ToolX_extdep");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    key_value, outro_success, remark, section, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn_hint,
};
pub use progress::{SyncProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, DepcacheTheme};
