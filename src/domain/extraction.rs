use crate::domain::places::normalize_name;

/// Words that start sentences far more often than restaurant names. A span
/// consisting only of these is never a candidate.
const STOPWORDS: [&str; 24] = [
    "a", "an", "and", "at", "but", "for", "i", "if", "in", "is", "it", "my", "of", "on", "or",
    "our", "so", "the", "this", "that", "to", "we", "you", "your",
];

const MAX_CANDIDATES: usize = 24;

/// Rule-based candidate extraction: quoted spans and capitalized runs, each
/// normalized and length-filtered. Emits at most `MAX_CANDIDATES` distinct
/// normalized forms, in order of first appearance.
pub fn extract_candidates(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for span in quoted_spans(text).into_iter().chain(capitalized_runs(text)) {
        let norm = normalize_name(&span);
        if norm.len() <= 2 || is_stopword_only(&norm) {
            continue;
        }
        if !out.contains(&norm) {
            out.push(norm);
        }
        if out.len() >= MAX_CANDIDATES {
            break;
        }
    }

    out
}

fn quoted_spans(text: &str) -> Vec<String> {
    let mut spans = Vec::new();
    for quote in ['"', '\u{201c}'] {
        let close = if quote == '\u{201c}' { '\u{201d}' } else { quote };
        let mut rest = text;
        while let Some(start) = rest.find(quote) {
            let after = &rest[start + quote.len_utf8()..];
            let Some(end) = after.find(close) else { break };
            let span = &after[..end];
            // Quotes around whole sentences are not names
            if !span.is_empty() && span.len() <= 60 {
                spans.push(span.to_string());
            }
            rest = &after[end + close.len_utf8()..];
        }
    }
    spans
}

/// Runs of capitalized words, allowing connective lowercase fillers inside
/// ("Di Fara", "Peter Luger Steak House", "Momofuku Ko").
fn capitalized_runs(text: &str) -> Vec<String> {
    const FILLERS: [&str; 6] = ["of", "the", "and", "de", "di", "la"];

    let mut runs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut pending_filler: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
        if trimmed.is_empty() {
            flush_run(&mut runs, &mut current, &mut pending_filler);
            continue;
        }

        let capitalized = trimmed.chars().next().is_some_and(char::is_uppercase);
        if capitalized {
            if !pending_filler.is_empty() && !current.is_empty() {
                current.append(&mut pending_filler);
            }
            current.push(trimmed);
            // A sentence-ending word also ends the run
            if word.ends_with(['.', '!', '?', ',', ';', ':']) {
                flush_run(&mut runs, &mut current, &mut pending_filler);
            }
        } else if !current.is_empty() && FILLERS.contains(&trimmed.to_lowercase().as_str()) {
            pending_filler.push(trimmed);
        } else {
            flush_run(&mut runs, &mut current, &mut pending_filler);
        }
    }
    flush_run(&mut runs, &mut current, &mut pending_filler);

    runs
}

fn flush_run(runs: &mut Vec<String>, current: &mut Vec<&str>, pending: &mut Vec<&str>) {
    pending.clear();
    if !current.is_empty() {
        runs.push(current.join(" "));
        current.clear();
    }
}

fn is_stopword_only(norm: &str) -> bool {
    norm.split_whitespace()
        .all(|word| STOPWORDS.contains(&word))
}
