/// Per-pass progress bars
use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{prefix} {bar:40.cyan/blue} {pos}/{len} [{elapsed}<{eta}] {msg}";

/// Bar over the batches of one pass, hidden when `enabled` is false
pub(crate) fn batch_bar(num_batches: usize, prefix: String, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(num_batches as u64);
    match ProgressStyle::with_template(TEMPLATE) {
        Ok(style) => bar.set_style(style.progress_chars("=>-")),
        Err(e) => log::warn!("invalid progress template: {}", e),
    }
    bar.set_prefix(prefix);
    bar
}
