//! Human approval gate.
//!
//! `do_task_with_human_review` loops until a human approves a candidate or
//! cancels the task; this trait is the seam between that loop and whatever
//! surface the human actually uses. The stdio implementation is the
//! reference; embedders with their own UI supply their own gate.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use tracing::warn;

/// A human's answer to "is this candidate acceptable?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Accept the candidate as the final result.
    Approved,
    /// Discard the candidate and generate a new one.
    Rejected,
    /// Abandon the task entirely.
    Cancelled,
}

/// Presents a candidate to a human and collects a verdict.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Show the candidate and block (asynchronously) until the human
    /// answers. Implementations that lose their input channel should
    /// return `Cancelled` rather than spinning.
    async fn review(&self, candidate: &str) -> Verdict;
}

/// Gate over the process's stdin/stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioGate;

#[async_trait]
impl ApprovalGate for StdioGate {
    async fn review(&self, candidate: &str) -> Verdict {
        let candidate = candidate.to_string();
        // Blocking terminal I/O stays off the async worker threads.
        let verdict = tokio::task::spawn_blocking(move || prompt_on_stdio(&candidate)).await;
        match verdict {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "approval prompt task failed, treating as cancel");
                Verdict::Cancelled
            }
        }
    }
}

fn prompt_on_stdio(candidate: &str) -> Verdict {
    let stdout = std::io::stdout();
    let stdin = std::io::stdin();

    {
        let mut out = stdout.lock();
        let _ = writeln!(out, "\n--- candidate ---\n{candidate}\n-----------------");
    }

    loop {
        {
            let mut out = stdout.lock();
            let _ = write!(out, "Accept this result? [y]es / [n]o / [c]ancel: ");
            let _ = out.flush();
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            // EOF: stdin is gone, nobody will ever answer.
            Ok(0) | Err(_) => return Verdict::Cancelled,
            Ok(_) => {}
        }

        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Verdict::Approved,
            "n" | "no" => return Verdict::Rejected,
            "c" | "cancel" => return Verdict::Cancelled,
            _ => continue,
        }
    }
}
