use std::io::Write;

use std::sync::atomic::{AtomicU64, Ordering};

pub struct ProgressCounter {
    label: &'static str,
    interval: u64,
    count: AtomicU64,
}

impl ProgressCounter {
    pub fn new(label: &'static str, interval: u64) -> Self {
        let counter = Self {
            label,
            interval: interval.max(1),
            count: AtomicU64::new(0),
        };
        counter.print(0);
        counter
    }

    pub fn inc(&self, delta: u64) {
        let prev = self.count.fetch_add(delta, Ordering::SeqCst);
        let current = prev + delta;
        // Print if we crossed an interval boundary
        if prev / self.interval < current / self.interval {
            self.print(current);
        }
    }

    pub fn finish(&self) {
        self.print(self.count.load(Ordering::SeqCst));
        eprintln!();
    }

    fn print(&self, current: u64) {
        eprint!("\r{}: {}", self.label, current);
        let _ = std::io::stderr().flush();
    }
}

/// SQL `LIKE` style match where `%` stands for any run of characters. Every other
/// character, `*` included, matches only itself.
pub fn like_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    let Some(remaining) = value.strip_prefix(first) else {
        return false;
    };
    let Some(mut remaining) = remaining.strip_suffix(last) else {
        return false;
    };

    for part in parts[1..parts.len() - 1].iter().filter(|p| !p.is_empty()) {
        match remaining.find(part) {
            Some(idx) => {
                remaining = &remaining[idx + part.len()..];
            }
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_match_supports_percent_suffix() {
        assert!(like_match("%_link", "motorway_link"));
        assert!(!like_match("%_link", "motorway"));
        assert!(like_match("%", ""));
    }

    #[test]
    fn like_match_anchors_both_ends() {
        assert!(like_match("a%c%e", "abcde"));
        assert!(like_match("ab%b", "abb"));
        assert!(!like_match("ab%b", "ab"));
        assert!(!like_match("cafe", "cafes"));
    }

    #[test]
    fn star_is_a_literal() {
        assert!(!like_match("A*", "Abc"));
        assert!(like_match("A*", "A*"));
        assert!(like_match("%*%", "5*3"));
        assert!(!like_match("*", "anything"));
    }
}
