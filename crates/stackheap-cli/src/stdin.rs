//! Terminal-backed [`UserChannel`].

use std::io::{BufRead, Write};

use stackheap::runner::{ReplyFuture, UserChannel};
use tracing::warn;

/// Prints messages to stdout and reads replies from stdin.
///
/// Options are listed with 1-based numbers; the runner maps a typed number
/// back to the option text.
pub struct StdinUser;

impl UserChannel for StdinUser {
    fn ask<'a>(&'a self, message: &'a str, options: &'a [String]) -> ReplyFuture<'a> {
        let mut prompt = format!("\n{message}\n");
        for (i, option) in options.iter().enumerate() {
            prompt.push_str(&format!("  [{}] {option}\n", i + 1));
        }
        prompt.push_str("> ");

        Box::pin(async move {
            let read = tokio::task::spawn_blocking(move || {
                let mut stdout = std::io::stdout();
                stdout.write_all(prompt.as_bytes())?;
                stdout.flush()?;
                let mut line = String::new();
                let n = std::io::stdin().lock().read_line(&mut line)?;
                Ok::<_, std::io::Error>((n > 0).then_some(line))
            })
            .await;

            match read {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => {
                    warn!("Failed to read reply: {e}");
                    None
                }
                Err(e) => {
                    warn!("Reply reader task failed: {e}");
                    None
                }
            }
        })
    }

    fn display(&self, message: &str) {
        println!("\n{message}");
    }
}
