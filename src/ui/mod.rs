//! Terminal output helpers
//!
//! Styled step lines and a spinner in a terminal, plain `[OK]`-style lines
//! in CI and when output is piped.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, key_value_status, section, step_error, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint};
pub use progress::TaskSpinner;
