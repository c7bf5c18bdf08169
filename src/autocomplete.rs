//! Filesystem-prefix completion against a session's working directory

use crate::session::InputLine;
use std::path::Path;

/// Pending multi-match completion: the candidates and the input-line byte
/// range they would replace. Cleared whenever the line is otherwise edited
/// or submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutocompleteState {
    pub matches: Vec<String>,
    /// Byte range of the typed prefix in the input line
    pub start: usize,
    pub end: usize,
}

/// Outcome of a completion request
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// Nothing in the directory matched the prefix
    NoMatch,
    /// The line was updated in place (single match, or common-prefix
    /// extension)
    Applied,
    /// Several candidates with no further common prefix; list them and keep
    /// the state for a digit-key selection
    Options(AutocompleteState),
}

/// Complete the filesystem-name prefix immediately before the cursor.
///
/// The prefix runs back from the cursor to the previous whitespace (or the
/// start of the line); an empty prefix matches every directory entry.
pub fn request(input: &mut InputLine, cwd: &Path) -> Completion {
    let pos = input.cursor.min(input.text.len());
    let start = input.text[..pos]
        .rfind(|c: char| c.is_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0);
    let prefix = input.text[start..pos].to_string();

    let mut matches = list_matches(cwd, &prefix);
    if matches.is_empty() {
        return Completion::NoMatch;
    }
    matches.sort();

    if matches.len() == 1 {
        input.splice(start, pos, &matches[0]);
        return Completion::Applied;
    }

    let common = common_prefix(&matches);
    if common.len() > prefix.len() {
        input.splice(start, pos, &common);
        return Completion::Applied;
    }

    Completion::Options(AutocompleteState {
        matches,
        start,
        end: pos,
    })
}

/// Apply a digit-key selection against a retained match list. Digits 1-9
/// pick matches 1-9; digit 0 picks the 10th match when one exists.
pub fn select(input: &mut InputLine, state: &AutocompleteState, digit: u8) -> bool {
    let index = match digit {
        1..=9 => digit as usize - 1,
        0 if state.matches.len() >= 10 => 9,
        _ => return false,
    };
    let Some(choice) = state.matches.get(index) else {
        return false;
    };
    input.splice(state.start, state.end, choice);
    true
}

fn list_matches(cwd: &Path, prefix: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(cwd) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with(prefix).then_some(name)
        })
        .collect()
}

fn common_prefix(matches: &[String]) -> String {
    let Some(first) = matches.first() else {
        return String::new();
    };
    let mut len = first.len();
    for m in &matches[1..] {
        len = first
            .bytes()
            .zip(m.bytes())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    // Keep the cut on a char boundary for multibyte names
    while len > 0 && !first.is_char_boundary(len) {
        len -= 1;
    }
    first[..len].to_string()
}
