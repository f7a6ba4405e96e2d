//! Dry-run order messages through decoding and validation.
//!
//! Each line is one message, as the service reads them. Nothing is stored;
//! the report says what ingestion would do with every line.

use std::collections::HashSet;
use std::path::Path;

use orderline_core::{Order, OrderUid};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// How ingestion would treat one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    Valid,
    Empty,
    Malformed(String),
    MissingUid(String),
    /// The identifier already appeared earlier in the input.
    Duplicate(String),
}

/// Result of checking a batch of messages.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub valid: usize,
    pub empty: usize,
    /// Rejected lines as (line number, status).
    pub problems: Vec<(usize, LineStatus)>,
}

impl CheckReport {
    /// Whether every non-empty line would be stored.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    fn record(&mut self, line: usize, status: LineStatus) {
        match status {
            LineStatus::Valid => self.valid += 1,
            LineStatus::Empty => self.empty += 1,
            other => self.problems.push((line, other)),
        }
    }

    #[allow(clippy::print_stdout)]
    pub fn print(&self) {
        for (line, status) in &self.problems {
            match status {
                LineStatus::Malformed(e) => println!("line {line}: malformed: {e}"),
                LineStatus::MissingUid(e) => println!("line {line}: invalid order_uid: {e}"),
                LineStatus::Duplicate(uid) => println!("line {line}: duplicate order {uid}"),
                LineStatus::Valid | LineStatus::Empty => {}
            }
        }
        println!(
            "{} valid, {} empty, {} rejected",
            self.valid,
            self.empty,
            self.problems.len()
        );
    }
}

/// Classify one message line.
pub fn classify(line: &str, seen: &mut HashSet<OrderUid>) -> LineStatus {
    let line = line.trim();
    if line.is_empty() {
        return LineStatus::Empty;
    }

    let order: Order = match serde_json::from_str(line) {
        Ok(order) => order,
        Err(e) => return LineStatus::Malformed(e.to_string()),
    };

    match order.uid() {
        Err(e) => LineStatus::MissingUid(e.to_string()),
        Ok(uid) if seen.contains(&uid) => LineStatus::Duplicate(uid.into_inner()),
        Ok(uid) => {
            seen.insert(uid);
            LineStatus::Valid
        }
    }
}

/// Check every line of `input` (`-` reads stdin).
///
/// # Errors
///
/// Returns an error if the input cannot be read.
pub async fn run(input: &Path) -> Result<CheckReport, std::io::Error> {
    if input == Path::new("-") {
        check_reader(BufReader::new(tokio::io::stdin())).await
    } else {
        let file = tokio::fs::File::open(input).await?;
        check_reader(BufReader::new(file)).await
    }
}

async fn check_reader<R: AsyncBufRead + Unpin>(reader: R) -> Result<CheckReport, std::io::Error> {
    let mut report = CheckReport::default();
    let mut seen = HashSet::new();
    let mut lines = reader.lines();
    let mut number = 0;

    while let Some(line) = lines.next_line().await? {
        number += 1;
        report.record(number, classify(&line, &mut seen));
    }

    tracing::debug!(lines = number, "Input checked");
    Ok(report)
}
