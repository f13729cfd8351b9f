//! Output formatters for verification reports

mod json;
mod text;

pub use json::JsonFormatter;
pub use text::TextFormatter;

use crate::config::{ColorMode, OutputFormat};
use crate::report::BatchReport;

/// Output formatter trait
pub trait OutputFormatter: Send + Sync {
    /// Format a whole batch
    fn format(&self, batch: &BatchReport) -> String;
}

/// Formatter for the configured format
pub fn formatter_for(
    format: OutputFormat,
    color: ColorMode,
    verbose: bool,
) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => {
            let mut f = TextFormatter::new();
            if color == ColorMode::Never {
                f = f.without_color();
            }
            f.verbose = verbose;
            Box::new(f)
        }
        OutputFormat::Json => Box::new(JsonFormatter::new().pretty()),
    }
}
