//! Display targets for rendered counts.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A text sink owned by exactly one counter session.
pub trait Display: Send + Sync {
    fn set_text(&self, text: &str);
}

/// Format an integer with en-US thousands grouping, e.g. `1,234,567`.
pub fn format_count(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// In-memory display that remembers the last text and counts writes.
#[derive(Clone, Default)]
pub struct MemoryDisplay {
    text: Arc<Mutex<String>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }
}

impl Display for MemoryDisplay {
    fn set_text(&self, text: &str) {
        let mut current = self.text.lock();
        current.clear();
        current.push_str(text);
        self.writes.fetch_add(1, Ordering::AcqRel);
    }
}
