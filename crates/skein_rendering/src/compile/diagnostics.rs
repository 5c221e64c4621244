//! Compile log parsing.
//!
//! Drivers report errors against the assembled text. Two line formats cover
//! the common drivers:
//!
//! ```text
//! 0:12(7): error: `foo' undeclared          (Mesa)
//! ERROR: 0:12: 'foo' : undeclared identifier (AMD, Intel)
//! 0(12) : error C1008: undefined variable   (NVIDIA)
//! ```
//!
//! Located lines are mapped back to the component and local line they came
//! from. Anything else is kept verbatim.

use std::fmt;

use super::AssembledSource;

/// One located compile message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Component the line belongs to.
    pub component: String,
    /// 1-based line within the component.
    pub line: usize,
    /// The offending source line.
    pub source_line: String,
    /// Driver message.
    pub message: String,
}

/// All messages from one failed compile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticReport {
    /// Messages mapped to a component.
    pub diagnostics: Vec<Diagnostic>,
    /// Log lines that could not be located.
    pub unlocated: Vec<String>,
}

impl DiagnosticReport {
    /// Parses a driver log against the source it was produced for.
    #[must_use]
    pub fn parse(log: &str, source: &AssembledSource) -> Self {
        let mut report = Self::default();

        for raw in log.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let located = parse_location(raw).and_then(|(line, message)| {
                let (span, local) = source.locate(line)?;
                Some(Diagnostic {
                    component: span.name.clone(),
                    line: local,
                    source_line: source.line(line).unwrap_or_default().trim_end().to_owned(),
                    message,
                })
            });

            match located {
                Some(diagnostic) => report.diagnostics.push(diagnostic),
                None => report.unlocated.push(raw.to_owned()),
            }
        }
        report
    }

    /// Returns true if the log held no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty() && self.unlocated.is_empty()
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(
                f,
                "error: {}:{}: {}",
                diagnostic.component, diagnostic.line, diagnostic.message
            )?;
            writeln!(f, "{:>6} | {}", diagnostic.line, diagnostic.source_line)?;
        }
        for line in &self.unlocated {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Extracts the assembled line number and message from one log line.
fn parse_location(line: &str) -> Option<(usize, String)> {
    let rest = line
        .strip_prefix("ERROR:")
        .or_else(|| line.strip_prefix("WARNING:"))
        .unwrap_or(line)
        .trim_start();
    let rest = rest.strip_prefix('0')?;

    let (number, tail) = if let Some(rest) = rest.strip_prefix(':') {
        split_number(rest)?
    } else {
        let (number, tail) = split_number(rest.strip_prefix('(')?)?;
        (number, tail.strip_prefix(')')?)
    };

    // Mesa appends a column in parentheses.
    let tail = match tail.strip_prefix('(') {
        Some(column) => column.split_once(')').map_or(column, |(_, after)| after),
        None => tail,
    };
    let message = tail.trim_start_matches([':', ' ']).trim();
    Some((number, message.to_owned()))
}

fn split_number(text: &str) -> Option<(usize, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let number = text[..end].parse().ok()?;
    Some((number, &text[end..]))
}
