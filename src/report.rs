use console::style;
use std::fmt;

/// The outcome of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub product: String,
    pub url: String,
    pub success: bool,
}

/// Aggregated results of a run, one entry per attempted work item.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub results: Vec<ItemResult>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn show_text_report(&self) {
        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            println!("\n{}\n", style("Failed archives:").bold());
            for r in failures {
                println!("{} {} {}", style("[FAIL]").red(), r.product, r.url);
            }
            println!();
        }

        let summary = self.to_string();
        println!(
            "Processing complete. Successful: {}",
            if self.successful() == self.total() {
                style(summary).green().bold()
            } else {
                style(summary).yellow().bold()
            }
        );
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.successful(), self.total())
    }
}
