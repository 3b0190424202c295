//! Text segmentation
//!
//! Turns raw submission text into ordered chapters of ordered, speaker-tagged
//! chunks bounded by a character budget. Pure functions of the input text and
//! configuration; identical input always produces identical boundaries.
//!
//! Speaker spans use inline `[name]...[/name]` tags. Text outside any tag
//! belongs to the implicit `default` speaker. Chapter breaks are either
//! supplied explicitly by the caller or detected from heading lines such as
//! "Chapter 3" / "Rozdział 3".

use lektor_common::model::{ChapterSpec, ChunkSpec};
use lektor_common::{Error, Result};

/// Implicit speaker for untagged text.
pub const DEFAULT_SPEAKER: &str = "default";

/// Heading prefixes that start a new chapter when no explicit split is given.
pub const CHAPTER_HEADINGS: &[&str] = &["Rozdział", "Chapter", "Odcinek", "Tom"];

/// Segment a submission into chapters of speaker-tagged chunks.
///
/// `chapters` takes precedence over `text` when non-empty (the caller already
/// split the document). Fails with `InvalidInput` when nothing remains after
/// tag stripping and whitespace trimming.
pub fn segment_job(text: &str, chapters: &[String], chunk_budget: usize) -> Result<Vec<ChapterSpec>> {
    let chapter_texts: Vec<String> = if chapters.is_empty() {
        split_chapters(text, CHAPTER_HEADINGS)
    } else {
        chapters.to_vec()
    };

    let mut result = Vec::with_capacity(chapter_texts.len());
    for chapter_text in &chapter_texts {
        let mut chunks = Vec::new();
        for (speaker, span) in parse_speaker_spans(chapter_text) {
            for piece in chunk_text(&span, chunk_budget) {
                chunks.push(ChunkSpec {
                    speaker: speaker.clone(),
                    text: piece,
                });
            }
        }
        if !chunks.is_empty() {
            result.push(ChapterSpec { chunks });
        }
    }

    if result.is_empty() {
        return Err(Error::InvalidInput(
            "text produced no chapters or chunks".to_string(),
        ));
    }
    Ok(result)
}

/// Derive a job title: first non-empty line, tags stripped, capped at 50 chars.
pub fn derive_title(text: &str, chapters: &[String]) -> String {
    let source = if !text.trim().is_empty() {
        text
    } else if let Some(first) = chapters.first() {
        first
    } else {
        ""
    };
    let first_line = source.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let stripped = strip_tags(first_line);
    let trimmed = stripped.trim();
    let capped: String = trimmed.chars().take(50).collect();
    if capped.is_empty() {
        "Untitled project".to_string()
    } else {
        capped
    }
}

/// Apply lexicon replacements to text.
///
/// Entries are applied longest-first so phrases win over their substrings.
/// Matching is case-insensitive and boundary-aware: the occurrence must not be
/// flanked by alphanumeric characters.
pub fn apply_lexicon(text: &str, entries: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = entries.iter().collect();
    sorted.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

    let mut current = text.to_string();
    for (word, replacement) in sorted {
        if word.is_empty() {
            continue;
        }
        current = replace_word(&current, word, replacement);
    }
    current
}

fn replace_word(text: &str, word: &str, replacement: &str) -> String {
    let lower_text: Vec<char> = text.to_lowercase().chars().collect();
    let chars: Vec<char> = text.chars().collect();
    let needle: Vec<char> = word.to_lowercase().chars().collect();
    // Lowercasing can change char counts in exotic scripts; fall back to the
    // untouched text rather than replace at wrong offsets.
    if lower_text.len() != chars.len() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let end = i + needle.len();
        let matches = end <= chars.len()
            && lower_text[i..end] == needle[..]
            && !chars.get(end).is_some_and(|c| c.is_alphanumeric());
        let left_ok = i == 0 || !chars[i - 1].is_alphanumeric();
        if matches && left_ok {
            out.push_str(replacement);
            i = end;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Split raw text into chapters on heading lines.
///
/// A line starting with one of the prefixes followed by whitespace and a
/// token begins a new chapter (case-insensitive). Text before the first
/// heading forms its own chapter. No headings: one chapter.
pub fn split_chapters(text: &str, headings: &[&str]) -> Vec<String> {
    let mut chapters: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if is_chapter_heading(line, headings) && !current.trim().is_empty() {
            chapters.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        chapters.push(current);
    }
    if chapters.is_empty() && !text.trim().is_empty() {
        chapters.push(text.to_string());
    }
    chapters
}

fn is_chapter_heading(line: &str, headings: &[&str]) -> bool {
    let trimmed = line.trim_start();
    for prefix in headings {
        let Some(rest) = strip_prefix_ignore_case(trimmed, prefix) else {
            continue;
        };
        // Prefix must be followed by whitespace and then a token ("Chapter 3")
        if let Some(c) = rest.chars().next() {
            if c.is_whitespace() && !rest.trim_start().is_empty() {
                return true;
            }
        }
    }
    false
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let mut s_iter = s.char_indices();
    let mut p_iter = prefix.chars();
    loop {
        let Some(p) = p_iter.next() else {
            let idx = s_iter.next().map_or(s.len(), |(i, _)| i);
            return Some(&s[idx..]);
        };
        let (_, c) = s_iter.next()?;
        if !c.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
    }
}

/// Parse `[name]...[/name]` speaker spans; untagged text maps to `default`.
///
/// Tag names start with a word character and may contain word characters and
/// hyphens. An opening tag without a matching close is treated as literal
/// text.
pub fn parse_speaker_spans(text: &str) -> Vec<(String, String)> {
    let mut spans: Vec<(String, String)> = Vec::new();
    let mut rest = text;

    while let Some((before, name, inner, after)) = next_tagged_span(rest) {
        let before = before.trim();
        if !before.is_empty() {
            spans.push((DEFAULT_SPEAKER.to_string(), strip_tags(before)));
        }
        let inner = strip_tags(inner.trim());
        if !inner.is_empty() {
            spans.push((name, inner));
        }
        rest = after;
    }

    let tail = rest.trim();
    if !tail.is_empty() {
        spans.push((DEFAULT_SPEAKER.to_string(), strip_tags(tail)));
    }
    spans
}

/// Find the next `[name]...[/name]` span. Returns (text before, name, inner
/// text, text after) or None when no complete span remains.
fn next_tagged_span(text: &str) -> Option<(&str, String, &str, &str)> {
    let mut search_from = 0;
    loop {
        let open_rel = text[search_from..].find('[')?;
        let open = search_from + open_rel;
        let Some((name, content_start)) = parse_tag_name(&text[open..]) else {
            search_from = open + 1;
            continue;
        };
        let close_tag = format!("[/{name}]");
        let content_abs = open + content_start;
        let Some(close_rel) = text[content_abs..].find(&close_tag) else {
            search_from = open + 1;
            continue;
        };
        let close = content_abs + close_rel;
        let after = close + close_tag.len();
        return Some((
            &text[..open],
            name,
            &text[content_abs..close],
            &text[after..],
        ));
    }
}

/// Parse a `[name]` opening tag at the start of `s`; returns the name and the
/// byte offset just past the closing bracket.
fn parse_tag_name(s: &str) -> Option<(String, usize)> {
    let mut chars = s.char_indices();
    let (_, first) = chars.next()?;
    if first != '[' {
        return None;
    }
    let mut name = String::new();
    for (i, c) in chars {
        if c == ']' {
            if name.is_empty() || name.starts_with('-') || name.starts_with('/') {
                return None;
            }
            return Some((name, i + 1));
        }
        if c.is_alphanumeric() || c == '_' || c == '-' {
            name.push(c);
        } else {
            return None;
        }
    }
    None
}

/// Remove any speaker tags from text, keeping the contents.
pub fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(open) = rest.find('[') else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..open]);
        let tag = &rest[open..];
        let is_tag = tag
            .strip_prefix('[')
            .map(|t| t.trim_start_matches('/'))
            .and_then(|t| {
                let end = t.find(']')?;
                let name = &t[..end];
                (!name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '-'))
                .then_some(end)
            });
        match is_tag {
            Some(_) => {
                let close = tag.find(']').unwrap_or(tag.len() - 1);
                rest = &tag[close + 1..];
            }
            None => {
                out.push('[');
                rest = &rest[open + 1..];
            }
        }
    }
}

/// Split a span of one speaker's text into chunks within the character budget.
///
/// Boundaries prefer sentence ends; a sentence longer than the budget falls
/// back to whitespace splits, and only a single over-budget word is cut
/// mid-word.
pub fn chunk_text(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();
        if current_len > 0 && current_len + 1 + sentence_len > budget {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if sentence_len > budget {
            // Oversized sentence: flush and fall back to word-level splitting.
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.extend(split_by_words(&sentence, budget));
            continue;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(&sentence);
        current_len += sentence_len;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

/// Split text into sentences on terminator punctuation followed by
/// whitespace (or end of text). Trailing quotes stay with their sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '.' | '!' | '?' | '…') {
            // Absorb runs of terminators and closing quotes
            let mut end = i + 1;
            while end < chars.len() && matches!(chars[end], '.' | '!' | '?' | '…' | '"' | '\'' | '»' | ')') {
                end += 1;
            }
            if end >= chars.len() || chars[end].is_whitespace() {
                let sentence: String = chars[start..end].iter().collect();
                let sentence = sentence.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                i = end;
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }
                start = i;
                continue;
            }
            i = end;
            continue;
        }
        i += 1;
    }
    if start < chars.len() {
        let tail: String = chars[start..].iter().collect();
        let tail = tail.trim().to_string();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

fn split_by_words(sentence: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in sentence.split_whitespace() {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > budget {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if word_len > budget {
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            // Single over-budget word: hard split at the character budget.
            let word_chars: Vec<char> = word.chars().collect();
            for piece in word_chars.chunks(budget) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_text_goes_to_default_speaker() {
        let spans = parse_speaker_spans("Hello world.");
        assert_eq!(spans, vec![("default".to_string(), "Hello world.".to_string())]);
    }

    #[test]
    fn tagged_spans_keep_order_with_surrounding_text() {
        let spans = parse_speaker_spans("Intro. [anna]Hi there.[/anna] Outro.");
        assert_eq!(
            spans,
            vec![
                ("default".to_string(), "Intro.".to_string()),
                ("anna".to_string(), "Hi there.".to_string()),
                ("default".to_string(), "Outro.".to_string()),
            ]
        );
    }

    #[test]
    fn unclosed_tag_is_literal_text() {
        let spans = parse_speaker_spans("[anna]never closed");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].0, "default");
        assert!(spans[0].1.contains("never closed"));
    }

    #[test]
    fn hyphenated_speaker_names_parse() {
        let spans = parse_speaker_spans("[old-man]Well.[/old-man]");
        assert_eq!(spans, vec![("old-man".to_string(), "Well.".to_string())]);
    }

    #[test]
    fn mismatched_close_tag_does_not_end_span() {
        let spans = parse_speaker_spans("[anna]Hi [bob]both[/bob] inner[/anna]");
        // anna's span runs to [/anna]; nested tags are stripped from the text
        assert_eq!(spans[0].0, "anna");
        assert_eq!(spans[0].1, "Hi both inner");
    }

    #[test]
    fn strip_tags_removes_open_and_close() {
        assert_eq!(strip_tags("[a]x[/a] y"), "x y");
        assert_eq!(strip_tags("no tags"), "no tags");
        assert_eq!(strip_tags("a [not a tag, just bracket"), "a [not a tag, just bracket");
    }

    #[test]
    fn sentences_prefer_terminator_boundaries() {
        let chunks = chunk_text("One. Two. Three.", 8);
        assert_eq!(chunks, vec!["One.", "Two.", "Three."]);
    }

    #[test]
    fn sentences_pack_up_to_budget() {
        let chunks = chunk_text("One. Two. Three.", 10);
        assert_eq!(chunks, vec!["One. Two.", "Three."]);
    }

    #[test]
    fn oversized_sentence_splits_on_words() {
        let chunks = chunk_text("alpha beta gamma delta", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn oversized_word_is_hard_split() {
        let chunks = chunk_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn chunking_is_idempotent() {
        let text = "First sentence here. Second one! A third, slightly longer sentence? Yes.";
        let a = chunk_text(text, 30);
        let b = chunk_text(text, 30);
        assert_eq!(a, b);
        for chunk in &a {
            assert!(chunk.chars().count() <= 30);
        }
    }

    #[test]
    fn chapters_split_on_heading_lines() {
        let text = "Chapter 1\nFirst text.\nChapter 2\nSecond text.";
        let chapters = split_chapters(text, CHAPTER_HEADINGS);
        assert_eq!(chapters.len(), 2);
        assert!(chapters[0].contains("First text"));
        assert!(chapters[1].contains("Second text"));
    }

    #[test]
    fn polish_headings_are_detected_case_insensitively() {
        let text = "rozdział 1\nJeden.\nROZDZIAŁ 2\nDwa.";
        let chapters = split_chapters(text, CHAPTER_HEADINGS);
        assert_eq!(chapters.len(), 2);
    }

    #[test]
    fn heading_without_number_is_not_a_break() {
        let text = "Chapter\nno number above.\nChapters are fun.";
        let chapters = split_chapters(text, CHAPTER_HEADINGS);
        assert_eq!(chapters.len(), 1);
    }

    #[test]
    fn segment_job_empty_text_is_invalid_input() {
        let err = segment_job("   \n ", &[], 450).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn segment_job_explicit_chapters_take_precedence() {
        let chapters = vec!["One.".to_string(), "Two.".to_string()];
        let result = segment_job("ignored", &chapters, 450).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].chunks[0].text, "One.");
    }

    #[test]
    fn segment_job_is_idempotent() {
        let text = "Chapter 1\n[anna]Hello there. How are you?[/anna]\nChapter 2\nPlain text.";
        let a = segment_job(text, &[], 20).unwrap();
        let b = segment_job(text, &[], 20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_title_strips_tags_and_caps_length() {
        assert_eq!(derive_title("[anna]A Tale[/anna]\nrest", &[]), "A Tale");
        let long = "x".repeat(100);
        assert_eq!(derive_title(&long, &[]).chars().count(), 50);
        assert_eq!(derive_title("", &[]), "Untitled project");
    }

    #[test]
    fn lexicon_replaces_whole_words_case_insensitively() {
        let entries = vec![("dr".to_string(), "doktor".to_string())];
        assert_eq!(apply_lexicon("Dr Nowak", &entries), "doktor Nowak");
        assert_eq!(apply_lexicon("hydra", &entries), "hydra");
    }

    #[test]
    fn lexicon_longer_entries_win() {
        let entries = vec![
            ("New".to_string(), "Nju".to_string()),
            ("New York".to_string(), "Nju Jork".to_string()),
        ];
        assert_eq!(apply_lexicon("in New York city", &entries), "in Nju Jork city");
    }
}
