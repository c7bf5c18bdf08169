//! Command history - bounded circular log with disk persistence and
//! exact/fuzzy lookup

use anyhow::Result;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// In-memory entries kept before oldest-overwrite kicks in
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Most recent entries the `history` builtin lists
pub const HISTORY_SHOW: usize = 1000;

/// Weakest longest-common-substring length still reported as a fuzzy match
const FUZZY_THRESHOLD: usize = 2;

/// Result of a history search, exact match preferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// Most recent literal match
    Exact(String),
    /// No literal match; every entry tied for the longest common substring,
    /// most recent first
    Fuzzy(Vec<String>),
    NoMatch,
}

/// Process-wide store of submitted command lines.
///
/// Accessed only from the single control loop, so no locking discipline is
/// needed beyond avoiding reentrancy.
#[derive(Debug)]
pub struct HistoryStore {
    entries: VecDeque<String>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            path: None,
        }
    }

    /// Default on-disk location, one command per line
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tabsh_history"))
    }

    /// Attach a history file and load its existing entries, overwriting
    /// oldest-first when the file exceeds the in-memory capacity.
    pub fn load_on_startup(&mut self, path: PathBuf) -> Result<()> {
        if let Ok(content) = std::fs::read_to_string(&path) {
            for line in content.lines() {
                self.push_entry(line.to_string());
            }
        }
        self.path = Some(path);
        Ok(())
    }

    /// Record a submitted command. Empty text is ignored; otherwise the
    /// entry lands in the circular log and is appended to the history file.
    pub fn add(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.push_entry(text.to_string());
        if let Some(path) = &self.path {
            let appended = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| writeln!(f, "{}", text));
            if let Err(e) = appended {
                log::warn!("history append to {} failed: {}", path.display(), e);
            }
        }
    }

    fn push_entry(&mut self, text: String) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(text);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `n` most recent entries, most recent first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().take(n).map(String::as_str)
    }

    /// Most recent entry literally equal to `term`
    pub fn search_exact(&self, term: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.as_str() == term)
            .map(String::as_str)
    }

    /// Entries sharing the longest contiguous substring with `term`, used
    /// when no exact match exists. A best length of two or less is too weak
    /// a signal to report.
    pub fn search_fuzzy(&self, term: &str) -> Vec<String> {
        let best = self
            .entries
            .iter()
            .map(|e| longest_common_substring(term, e))
            .max()
            .unwrap_or(0);
        if best <= FUZZY_THRESHOLD {
            return Vec::new();
        }
        self.entries
            .iter()
            .rev()
            .filter(|e| longest_common_substring(term, e) == best)
            .cloned()
            .collect()
    }

    /// Exact lookup, falling back to fuzzy
    pub fn search(&self, term: &str) -> SearchResult {
        if let Some(hit) = self.search_exact(term) {
            return SearchResult::Exact(hit.to_string());
        }
        let tied = self.search_fuzzy(term);
        if tied.is_empty() {
            SearchResult::NoMatch
        } else {
            SearchResult::Fuzzy(tied)
        }
    }
}

/// Length of the longest contiguous common substring of `a` and `b`.
/// Dynamic programming over two rolling rows of length `|b| + 1`.
fn longest_common_substring(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    let mut best = 0;
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                cur[j + 1] = prev[j] + 1;
                best = best.max(cur[j + 1]);
            } else {
                cur[j + 1] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
        cur.fill(0);
    }
    best
}
