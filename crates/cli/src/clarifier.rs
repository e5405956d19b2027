//! Answers clarification requests from the terminal.

use async_trait::async_trait;
use taskloop_core::clarify::Clarifier;
use taskloop_core::error::ClarifyError;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

pub struct StdinClarifier {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinClarifier {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl Clarifier for StdinClarifier {
    async fn ask(&self, question: &str) -> Result<String, ClarifyError> {
        let mut lines = self.lines.lock().await;
        eprintln!();
        eprintln!("  ? {question}");
        eprint!("  > ");

        match lines.next_line().await {
            Ok(Some(line)) => Ok(line.trim().to_string()),
            Ok(None) => Err(ClarifyError::InputClosed),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read answer from stdin");
                Err(ClarifyError::InputClosed)
            }
        }
    }
}
