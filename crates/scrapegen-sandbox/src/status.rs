//! In-band status contract
//!
//! A program that catches its own failure still exits 0. To report it, the program
//! prints a line starting with [`STATUS_PREFIX`] followed by a JSON payload:
//!
//! ```text
//! ::scrapegen-status:: {"status": "error", "message": "no rows matched"}
//! ```
//!
//! Only whole lines starting with the prefix count; the same text inside scraped
//! data or log messages is ignored. Status lines are removed from captured output.

use scrapegen_core::config::MarkerPolicy;
use serde::{Deserialize, Serialize};

pub const STATUS_PREFIX: &str = "::scrapegen-status::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: RunStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusPayload {
    /// The line a program prints to report this status
    pub fn to_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{} {}", STATUS_PREFIX, json)
    }
}

/// Result of scanning captured output for in-band reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerScan {
    /// Output with status lines removed
    pub output: String,
    /// First reported failure, if any
    pub failure: Option<String>,
}

/// Scan output according to the configured policy
pub fn scan_output(output: &str, policy: &MarkerPolicy) -> MarkerScan {
    match policy {
        MarkerPolicy::StatusLine => scan_status_lines(output),
        MarkerPolicy::Substring(marker) if !marker.is_empty() && output.contains(marker.as_str()) => {
            MarkerScan {
                output: output.to_string(),
                failure: Some(format!("Output contains error marker '{}'", marker)),
            }
        }
        MarkerPolicy::Substring(_) | MarkerPolicy::None => MarkerScan {
            output: output.to_string(),
            failure: None,
        },
    }
}

fn scan_status_lines(output: &str) -> MarkerScan {
    let mut kept = Vec::new();
    let mut failure = None;

    for line in output.lines() {
        let Some(rest) = line.strip_prefix(STATUS_PREFIX) else {
            kept.push(line);
            continue;
        };
        if failure.is_some() {
            continue;
        }
        match serde_json::from_str::<StatusPayload>(rest.trim()) {
            Ok(StatusPayload {
                status: RunStatus::Error,
                message,
            }) => {
                failure = Some(message.unwrap_or_else(|| "program reported an error".to_string()));
            }
            Ok(_) => {}
            Err(e) => failure = Some(format!("Malformed status line ({}): {}", e, rest.trim())),
        }
    }

    let mut cleaned = kept.join("\n");
    if output.ends_with('\n') && !cleaned.is_empty() {
        cleaned.push('\n');
    }
    MarkerScan {
        output: cleaned,
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_output_passes() {
        let scan = scan_output("scraped 2 rows\n", &MarkerPolicy::StatusLine);
        assert_eq!(scan.failure, None);
        assert_eq!(scan.output, "scraped 2 rows\n");
    }

    #[test]
    fn test_error_status_line() {
        let line = StatusPayload {
            status: RunStatus::Error,
            message: Some("selector matched nothing".to_string()),
        }
        .to_line();
        let output = format!("start\n{}\nend\n", line);
        let scan = scan_output(&output, &MarkerPolicy::StatusLine);
        assert_eq!(scan.failure.as_deref(), Some("selector matched nothing"));
        assert_eq!(scan.output, "start\nend\n");
    }

    #[test]
    fn test_marker_text_not_at_line_start_is_ignored() {
        let output = format!("title: ERROR codes {} inside\n", STATUS_PREFIX);
        let scan = scan_output(&output, &MarkerPolicy::StatusLine);
        assert_eq!(scan.failure, None);
    }

    #[test]
    fn test_ok_and_malformed_lines() {
        let ok = format!("{} {{\"status\":\"ok\"}}\n", STATUS_PREFIX);
        assert_eq!(scan_output(&ok, &MarkerPolicy::StatusLine).failure, None);

        let bad = format!("{} not json\n", STATUS_PREFIX);
        let scan = scan_output(&bad, &MarkerPolicy::StatusLine);
        assert!(scan.failure.unwrap().starts_with("Malformed status line"));
    }

    #[test]
    fn test_substring_and_none_policies() {
        let legacy = MarkerPolicy::Substring("ERROR".to_string());
        assert!(scan_output("ERROR: boom", &legacy).failure.is_some());
        assert!(scan_output("all good", &legacy).failure.is_none());
        assert!(scan_output("ERROR: boom", &MarkerPolicy::None).failure.is_none());
    }
}
