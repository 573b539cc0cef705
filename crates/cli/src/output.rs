//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use chappie_engine::{RunReport, Summary, TestResult};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
    }
}

/// Summary counters as a two-column table
pub fn summary_table(summary: &Summary) -> Table {
    let rows: [(&str, u64, bool); 11] = [
        ("iterations", summary.iterations, false),
        ("concurrency", summary.concurrency, false),
        ("totalRequests", summary.total_requests, false),
        ("passedRequests", summary.passed_requests, false),
        ("failedRequests", summary.failed_requests, true),
        ("totalAssertions", summary.total_assertions, false),
        ("passedAssertions", summary.passed_assertions, false),
        ("failedAssertions", summary.failed_assertions, true),
        ("totalTests", summary.total_tests, false),
        ("passedTests", summary.passed_tests, false),
        ("failedTests", summary.failed_tests, true),
    ];

    let mut table = table();
    table.set_header(vec!["Counter", "Value"]);
    for (name, value, is_failure) in rows {
        let cell = if is_failure && value > 0 {
            Cell::new(value).fg(Color::Red)
        } else {
            Cell::new(value)
        };
        table.add_row(vec![Cell::new(name), cell]);
    }
    table
}

impl TableDisplay for TestResult {
    fn headers() -> Vec<&'static str> {
        vec!["Iteration", "Test", "Phase", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.iteration.to_string(),
            self.test_id.clone(),
            format!("{:?}", self.phase).to_lowercase(),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

/// Print the outcome of a run
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            println!("{}", summary_table(&report.summary));

            let failures: Vec<&TestResult> = report.results.iter().filter(|r| !r.passed()).collect();
            if !failures.is_empty() {
                println!();
                println!("{}", "Failed tests".red().bold());
                let mut table = table();
                table.set_header(TestResult::headers());
                for result in failures {
                    table.add_row(result.row());
                }
                println!("{table}");
            }

            if report.summary.has_failures() {
                print_error("Run finished with failures");
            } else {
                print_success("All requests and tests passed");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chappie_engine::{Phase, TestStatus};

    #[test]
    fn test_summary_table_lists_every_counter() {
        let summary = Summary {
            total_requests: 4,
            failed_tests: 1,
            ..Default::default()
        };
        let rendered = summary_table(&summary).to_string();
        for name in ["iterations", "totalRequests", "failedAssertions", "failedTests"] {
            assert!(rendered.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_result_row() {
        let result = TestResult {
            folder: "Todos".to_string(),
            name: "Get todo".to_string(),
            test_id: "todos-get-todo".to_string(),
            phase: Phase::Assertions,
            status: TestStatus::Fail,
            error: Some("expected 1 to equal 2".to_string()),
            duration_ms: 12,
            iteration: 2,
        };
        assert_eq!(
            result.row(),
            ["2", "todos-get-todo", "assertions", "expected 1 to equal 2"]
        );
    }
}
