use async_trait::async_trait;
use packaging_core::{Notice, Presenter, Severity};
use tracing::info;

/// Prints notices to stdout; dismissal is immediate.
pub struct ConsolePresenter;

fn label(severity: Severity) -> &'static str {
    match severity {
        Severity::Information => "info",
        Severity::Success => "ok",
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

pub fn render(notice: &Notice) -> String {
    format!("[{}] {}\n{}", label(notice.severity), notice.title, notice.text)
}

#[async_trait]
impl Presenter for ConsolePresenter {
    async fn show(&self, notice: Notice) {
        println!("{}", render(&notice));
    }

    fn toast(&self, text: &str) {
        info!(text, "toast");
        println!("{text}");
    }
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
