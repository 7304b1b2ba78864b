//! Keyword extraction, lexical scoring, snippets and highlighting.
//!
//! Questions are reduced to *terms*: contiguous CJK ideograph runs, plus
//! alphanumeric words of at least three characters that are not
//! stop-words. Terms are matched against content through *patterns*:
//! every term itself, and for CJK terms longer than two characters also
//! their character bigrams, so that `退貨政策是什麼` still finds text that
//! only mentions `退貨政策`.
//!
//! All matching is case-insensitive and works on chars, never bytes.

/// Maximum number of keywords used by keyword-biased search.
pub const MAX_SEARCH_KEYWORDS: usize = 3;

const MIN_WORD_CHARS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "what", "which", "who", "whom", "how", "why",
    "when", "where", "this", "that", "these", "those", "with", "from", "into", "about", "does",
    "did", "can", "could", "should", "would", "will", "have", "has", "had", "not", "you", "your",
    "there", "their", "they", "them", "its", "any", "all", "some", "tell", "please", "explain",
    "describe", "give", "list",
];

/// True for CJK unified ideographs (basic block and extension A).
pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

/// Contiguous runs of CJK ideographs, in order of appearance.
pub fn cjk_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            current.push(c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Lowercased alphanumeric words of at least three chars, minus stop-words.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() || is_cjk(c))
        .filter(|w| w.chars().count() >= MIN_WORD_CHARS)
        .map(fold_case)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// All distinct question terms: CJK runs first, then words.
pub fn question_terms(question: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for term in cjk_runs(question).into_iter().chain(words(question)) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Keywords for keyword-biased search.
///
/// CJK runs when the question has any, otherwise words; at most
/// [`MAX_SEARCH_KEYWORDS`].
pub fn search_keywords(question: &str) -> Vec<String> {
    let runs = cjk_runs(question);
    let source = if runs.is_empty() { words(question) } else { runs };
    let mut out: Vec<String> = Vec::new();
    for term in source {
        if !out.contains(&term) {
            out.push(term);
        }
        if out.len() == MAX_SEARCH_KEYWORDS {
            break;
        }
    }
    out
}

/// Overlapping two-char windows of a string.
pub fn bigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// Expand terms into the substrings actually searched for.
pub fn match_patterns(terms: &[String]) -> Vec<String> {
    let mut patterns: Vec<String> = Vec::new();
    let mut push = |p: String| {
        if !p.is_empty() && !patterns.contains(&p) {
            patterns.push(p);
        }
    };
    for term in terms {
        let lowered = fold_case(term);
        if lowered.chars().all(is_cjk) && lowered.chars().count() > 2 {
            for bigram in bigrams(&lowered) {
                push(bigram);
            }
        }
        push(lowered);
    }
    patterns
}

/// Whether a term is present in content already passed through
/// [`fold_case`].
///
/// CJK terms also count as present when at least half of their bigrams
/// appear.
pub fn term_present(content_lower: &str, term: &str) -> bool {
    let term = fold_case(term);
    if content_lower.contains(&term) {
        return true;
    }
    if term.chars().all(is_cjk) && term.chars().count() > 2 {
        let grams = bigrams(&term);
        let hits = grams.iter().filter(|g| content_lower.contains(g.as_str())).count();
        return hits * 2 >= grams.len();
    }
    false
}

/// Fraction of `terms` present in `content`, in `0.0..=1.0`.
pub fn relevance(content: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = fold_case(content);
    let found = terms.iter().filter(|t| term_present(&lower, t)).count();
    found as f64 / terms.len() as f64
}

/// Number of distinct patterns occurring in `text`.
pub fn pattern_hits(text: &str, patterns: &[String]) -> usize {
    let lower = fold_case(text);
    patterns.iter().filter(|p| lower.contains(p.as_str())).count()
}

/// Lexical match score: total char length of the patterns present.
///
/// Longer patterns (whole keywords) outweigh their bigrams.
pub fn lexical_score(text: &str, patterns: &[String]) -> f64 {
    let lower = fold_case(text);
    patterns
        .iter()
        .filter(|p| lower.contains(p.as_str()))
        .map(|p| p.chars().count() as f64)
        .sum()
}

/// Split on sentence terminators (`. ! ? 。 ！ ？`) and newlines, keeping
/// the terminator. Blank sentences are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c == '\n' {
            push_sentence(&mut out, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '。' | '！' | '？') {
            push_sentence(&mut out, &mut current);
        }
    }
    push_sentence(&mut out, &mut current);
    out
}

fn push_sentence(out: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    current.clear();
}

/// Cap `text` at `max_chars`, appending `...` when it was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// The best-matching sentence plus one sentence either side, capped.
///
/// Sentences are scored by pattern hits; ties go to the earliest. With no
/// sentences at all the capped content itself is returned.
pub fn best_snippet(content: &str, patterns: &[String], max_chars: usize) -> String {
    let sentences = split_sentences(content);
    if sentences.is_empty() {
        return truncate_chars(content.trim(), max_chars);
    }
    let mut best = 0;
    let mut best_score = 0;
    for (i, sentence) in sentences.iter().enumerate() {
        let score = pattern_hits(sentence, patterns);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    let start = best.saturating_sub(1);
    let end = (best + 2).min(sentences.len());
    truncate_chars(&sentences[start..end].join(" "), max_chars)
}

/// Wrap every occurrence of any pattern in `**`.
///
/// Overlapping or adjacent matches merge into a single emphasized span.
pub fn highlight(text: &str, patterns: &[String]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let lowered: Vec<char> = chars.iter().map(|c| lower_char(*c)).collect();
    let mut marked = vec![false; chars.len()];

    for pattern in patterns {
        let pat: Vec<char> = pattern.chars().map(lower_char).collect();
        if pat.is_empty() || pat.len() > lowered.len() {
            continue;
        }
        for start in 0..=lowered.len() - pat.len() {
            if lowered[start..start + pat.len()] == pat[..] {
                marked[start..start + pat.len()].iter_mut().for_each(|m| *m = true);
            }
        }
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut open = false;
    for (c, m) in chars.iter().zip(&marked) {
        if *m != open {
            out.push_str("**");
            open = *m;
        }
        out.push(*c);
    }
    if open {
        out.push_str("**");
    }
    out
}

/// Lowercase one char at a time, keeping the char count unchanged.
///
/// All matching and highlighting goes through this so that a pattern that
/// scores as a hit is also a pattern that gets highlighted.
pub fn fold_case(text: &str) -> String {
    text.chars().map(lower_char).collect()
}

fn lower_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}
