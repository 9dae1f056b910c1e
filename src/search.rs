//! Debounced search input.
//!
//! Keystrokes go into a [`SearchInput`]; the paired [`SearchDebouncer`]
//! yields a query only once typing has paused for the configured delay.

use std::time::Duration;
use tokio::sync::watch;

/// Quiet period before a typed query is searched.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Create a connected input/debouncer pair.
pub fn debounced(delay: Duration) -> (SearchInput, SearchDebouncer) {
    let (tx, rx) = watch::channel(String::new());
    (
        SearchInput { tx },
        SearchDebouncer {
            rx,
            delay,
            last_emitted: None,
        },
    )
}

/// Writing side: the raw text of the search box.
#[derive(Debug)]
pub struct SearchInput {
    tx: watch::Sender<String>,
}

impl SearchInput {
    pub fn set(&self, text: impl Into<String>) {
        let text = text.into();
        self.tx.send_if_modified(|current| {
            if *current == text {
                return false;
            }
            *current = text;
            true
        });
    }
}

#[derive(Debug)]
pub struct SearchDebouncer {
    rx: watch::Receiver<String>,
    delay: Duration,
    last_emitted: Option<String>,
}

impl SearchDebouncer {
    /// Wait for the next settled, non-empty query.
    ///
    /// Blank input and repeats of the last emitted query are skipped.
    /// Returns `None` once the input is dropped and nothing is pending.
    pub async fn next_query(&mut self) -> Option<String> {
        loop {
            self.rx.changed().await.ok()?;

            // Restart the quiet period on every keystroke.
            loop {
                match tokio::time::timeout(self.delay, self.rx.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) | Err(_) => break,
                }
            }

            let query = self.rx.borrow_and_update().trim().to_string();
            if query.is_empty() {
                self.last_emitted = None;
                continue;
            }
            if self.last_emitted.as_deref() == Some(query.as_str()) {
                tracing::trace!(query = %query, "Skipping repeated search");
                continue;
            }
            tracing::debug!(query = %query, "Search query settled");
            self.last_emitted = Some(query.clone());
            return Some(query);
        }
    }
}
