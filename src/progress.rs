// Progress bar management using indicatif.
// One bar per table counts compared chunks; all bars share a MultiProgress so
// they render on separate lines. Disabled entirely in debug logging mode.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;

#[derive(Clone)]
pub struct ProgressManager {
    multi: Option<Arc<MultiProgress>>,
}

impl ProgressManager {
    // Create a new manager. If enabled=false, no bars are created.
    pub fn new(enabled: bool) -> Self {
        let multi = if enabled {
            Some(Arc::new(MultiProgress::new()))
        } else {
            None
        };
        Self { multi }
    }

    // Bar counting compared chunks for one table.
    pub fn new_chunk_bar(&self, table: &str, total: u64) -> Option<ProgressBar> {
        let mp = self.multi.as_ref()?;
        let bar = mp.add(ProgressBar::new(total));
        bar.set_style(chunk_style());
        bar.set_prefix(format!("Diff {}", table));
        Some(bar)
    }

    // Bar counting planned tables during chunk splitting.
    pub fn new_plan_bar(&self, total: u64) -> Option<ProgressBar> {
        let mp = self.multi.as_ref()?;
        let bar = mp.add(ProgressBar::new(total));
        bar.set_style(chunk_style());
        bar.set_prefix("Splitting chunks".to_string());
        Some(bar)
    }
}

fn chunk_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:24} {pos:>5}/{len:<5} [{bar:60}] {percent:>3}%",
    )
    .unwrap()
    .progress_chars("█ ")
}
