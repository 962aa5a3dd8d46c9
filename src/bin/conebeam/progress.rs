/// Progress bars for the passes of a reconstruction job
pub (super) struct Progress {
    passes: Vec<&'static str>,
    pass: usize,
    bar: Option<ProgressBar>,
}

impl Progress {

    pub (super) fn new(passes: &[&'static str]) -> Self {
        Self { passes: passes.to_vec(), pass: 0, bar: None }
    }

    pub (super) fn update(&mut self, event: &Event) {
        match *event {
            Event::Progress { done, total } => {
                let label = self.label();
                let bar = self.bar.get_or_insert_with(|| new_bar(label, total));
                bar.set_length(total.max(done) as u64);
                bar.set_position(done as u64);
            }
            Event::Completed => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_with_message(format!("{}: done", self.label()));
                }
                self.pass += 1;
            }
            Event::Cancelled => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon_with_message(format!("{}: cancelled", self.label()));
                }
            }
        }
    }

    fn label(&self) -> &'static str {
        self.passes.get(self.pass).copied().unwrap_or("Reconstruction")
    }
}

fn new_bar(label: &'static str, total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64).with_message(label);
    let style = ProgressStyle::default_bar()
        .template("{msg}\n[{elapsed_precise}] {wide_bar} {pos}/{len} ({eta_precise})")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

// ----- Imports -----------------------------------------------------------------------------------------
use indicatif::{ProgressBar, ProgressStyle};
use conebeam::monitor::Event;
