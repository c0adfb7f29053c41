use crate::protocol::Binding;

pub const READY_TEXT: &str = "ready";
pub const SUBSYSTEM_LABEL: &str = "LSP";
pub const SUBSYSTEM_NAME: &str = "rust";
pub const COMPLETION_CANDIDATES: [&str; 4] = ["len", "iter", "push", "Completion"];
pub const ERROR_MARKER: &str = "E:";
pub const ERROR_KEYWORD: &str = "error";
pub const BINDING_KEYWORDS: [&str; 2] = ["lsp", "completion"];

/// The status bar names the language server or the language it serves.
pub fn shows_subsystem_status(screen: &str) -> bool {
    screen.contains(SUBSYSTEM_LABEL) || contains_ignore_case(screen, SUBSYSTEM_NAME)
}

pub fn shows_completion_candidates(screen: &str) -> bool {
    COMPLETION_CANDIDATES
        .iter()
        .any(|candidate| screen.contains(candidate))
}

pub fn shows_diagnostics(screen: &str) -> bool {
    screen.contains(ERROR_MARKER) || mentions_error(screen)
}

pub fn mentions_error(screen: &str) -> bool {
    contains_ignore_case(screen, ERROR_KEYWORD)
}

pub fn status_bar(screen: &str) -> Option<&str> {
    screen.trim().lines().last()
}

pub fn subsystem_status_line(screen: &str) -> Option<&str> {
    screen.lines().rev().find(|line| line.contains(SUBSYSTEM_LABEL))
}

pub fn action_matches(action: &str, keywords: &[&str]) -> bool {
    keywords
        .iter()
        .any(|keyword| contains_ignore_case(action, keyword))
}

/// Bindings whose action mentions any keyword, case-insensitively, in their
/// original order.
pub fn filter_bindings(bindings: &[Binding], keywords: &[&str]) -> Vec<Binding> {
    bindings
        .iter()
        .filter(|binding| action_matches(&binding.action, keywords))
        .cloned()
        .collect()
}

pub fn head_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn tail_chars(text: &str, count: usize) -> &str {
    let total = text.chars().count();
    if total <= count {
        return text;
    }
    match text.char_indices().nth(total - count) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
