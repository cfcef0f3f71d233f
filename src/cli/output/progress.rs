//! Progress bar for regression runs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const PROGRESS_TEMPLATE: &str =
    "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg} (ETA: {eta})";
const PROGRESS_CHARS: &str = "█▓▒░ ";

/// Progress bar drawn on stderr, so stdout stays reserved for the summary.
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
        pb.set_style(style.progress_chars(PROGRESS_CHARS));
    }
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

/// Whether a live progress bar makes sense for this invocation.
pub fn should_show_progress(json: bool) -> bool {
    !json && console::Term::stderr().is_term()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar() {
        let pb = create_progress_bar(100);
        assert_eq!(pb.length(), Some(100));
        pb.inc(10);
        assert_eq!(pb.position(), 10);
        pb.finish_and_clear();
    }

    #[test]
    fn test_no_progress_in_json_mode() {
        assert!(!should_show_progress(true));
    }
}
