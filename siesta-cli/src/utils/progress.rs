use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use siesta_engine::Request;

/// Resolution of the bar; progress fractions are scaled onto it.
const STEPS: u64 = 1000;

fn request_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {percent}%")
        .unwrap()
        .progress_chars("=> ")
}

#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            disabled: true,
        }
    }

    /// Attaches a bar that follows `request` until it completes.
    pub fn track(&self, request: &Request, label: &str) {
        if self.disabled {
            return;
        }

        let bar = self.multi.add(ProgressBar::new(STEPS));
        bar.set_style(request_style());
        bar.set_message(format!("Loading {label}"));

        let finished = bar.clone();
        let label = label.to_owned();
        request
            .on_progress(move |fraction| bar.set_position((fraction * STEPS as f64) as u64))
            .on_completion(move |info| {
                let status = if info.is_cancellation() {
                    "Cancelled"
                } else if info.error().is_some() {
                    "Failed"
                } else {
                    "Finished"
                };
                finished.finish_with_message(format!("{status} {label}"));
            });
    }
}
