//! Transcript text normalization and SRT line splitting (§4.6).

use once_cell::sync::Lazy;
use regex::Regex;

/// True if `c` falls in one of the CJK ranges named in §4.6:
/// U+4E00-9FFF, U+3040-30FF, U+31F0-31FF, U+AC00-D7AF.
pub fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    (0x4E00..=0x9FFF).contains(&cp)
        || (0x3040..=0x30FF).contains(&cp)
        || (0x31F0..=0x31FF).contains(&cp)
        || (0xAC00..=0xD7AF).contains(&cp)
}

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\n]+").unwrap());
static REPEAT_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"([!?！？。.,，])\1{2,}").unwrap());

const PRE_PUNCT_TRIM: &[char] = &[',', '，', '。', '！', '？', '!', '?', ':', '：', ';', '；'];
const OPEN_BRACKETS: &[char] = &['(', '（', '[', '「', '『', '【', '"', '\''];
const CLOSE_BRACKETS: &[char] = &[')', '）', ']', '」', '』', '】', '"', '\''];

/// Normalize one segment transcript (§4.6). Idempotent:
/// `normalize(normalize(t)) == normalize(t)` (§8 invariant 5).
pub fn normalize_transcript_text(text: &str, language: &str, model: &str) -> String {
    let unescaped = html_unescape(text);
    let ideographic_space_replaced = unescaped.replace('\u{3000}', " ");
    let collapsed = WHITESPACE_RUN.replace_all(&ideographic_space_replaced, " ");
    let despaced = remove_cjk_internal_spaces(&collapsed);
    let trimmed_punct = trim_around_punctuation(&despaced);
    let collapsed_repeats = REPEAT_PUNCT.replace_all(&trimmed_punct, "$1$1");

    let wants_cjk_pass = matches!(language, "zh" | "ja" | "auto")
        || model.to_ascii_lowercase().contains("whisper")
        || model.to_ascii_lowercase().contains("kotoba");

    let result = if wants_cjk_pass {
        let despaced_again = remove_cjk_internal_spaces(&collapsed_repeats);
        despace_cjk_punctuation_boundaries(&despaced_again)
    } else {
        collapsed_repeats.to_string()
    };

    result.trim().to_string()
}

/// Remove whitespace directly between two adjacent CJK codepoints.
fn remove_cjk_internal_spaces(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            let prev_cjk = out.chars().last().map(is_cjk).unwrap_or(false);
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let next_cjk = chars.get(j).copied().map(is_cjk).unwrap_or(false);
            if prev_cjk && next_cjk {
                i = j;
                continue;
            }
            out.push(c);
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// De-space boundaries between a CJK character and CJK punctuation.
fn despace_cjk_punctuation_boundaries(text: &str) -> String {
    const CJK_PUNCT: &[char] = &['，', '。', '！', '？', '：', '；', '、', '「', '」', '『', '』'];
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            let prev = out.chars().last();
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let next = chars.get(j).copied();
            let boundary = match (prev, next) {
                (Some(p), Some(n)) => {
                    (is_cjk(p) && CJK_PUNCT.contains(&n)) || (CJK_PUNCT.contains(&p) && is_cjk(n))
                }
                _ => false,
            };
            if boundary {
                i = j;
                continue;
            }
            out.push(c);
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

fn trim_around_punctuation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ' ' {
            let next = chars.get(i + 1).copied();
            if let Some(n) = next {
                if PRE_PUNCT_TRIM.contains(&n) || CLOSE_BRACKETS.contains(&n) {
                    i += 1;
                    continue;
                }
            }
            let prev = out.chars().last();
            if let Some(p) = prev {
                if OPEN_BRACKETS.contains(&p) {
                    i += 1;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Minimal named + numeric HTML entity unescape. Transcript text is not
/// HTML markup, so only the handful of entities a transcription provider
/// might realistically echo back are handled (§4.6 Design Notes).
fn html_unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' {
            if let Some(semi_rel) = text[i..].find(';') {
                let entity = &text[i + 1..i + semi_rel];
                if let Some(resolved) = resolve_entity(entity) {
                    out.push(resolved);
                    i += semi_rel + 1;
                    continue;
                }
            }
        }
        let ch = text[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => return Some('&'),
        "lt" => return Some('<'),
        "gt" => return Some('>'),
        "quot" => return Some('"'),
        "apos" | "#39" => return Some('\''),
        _ => {}
    }
    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = entity.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    None
}

/// Character budget by language/model (§4.6), clamped to [10,100].
pub fn char_budget(language: &str, model: &str) -> usize {
    let model_lower = model.to_ascii_lowercase();
    let budget = match language {
        "ja" => 20,
        "zh" => 24,
        "auto" if model_lower.contains("kotoba") || model_lower.contains("whisper") => 22,
        _ => 42,
    };
    budget.clamp(10, 100)
}

const SENTENCE_FINAL: &[char] = &['。', '！', '？', '!', '?', '；', ';', '…', '.'];

/// Split text into sentence pieces on sentence-final punctuation,
/// preserving the punctuation on the piece it ends. For `language="en"`,
/// pieces longer than 72 chars are further split on every `,`/`;` (§4.6).
pub fn split_into_sentences(text: &str, language: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if SENTENCE_FINAL.contains(&c) {
            pieces.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }

    let mut result = Vec::new();
    for piece in pieces {
        let trimmed = piece.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if language == "en" && trimmed.chars().count() > 72 {
            result.extend(split_on_comma_semicolon(&trimmed));
        } else {
            result.push(trimmed);
        }
    }
    result
}

/// Split on every `,`/`;` boundary, keeping the separator on the piece
/// it ends (§4.6: "further split long (>72 char) pieces on `,` or `;`").
fn split_on_comma_semicolon(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if c == ',' || c == ';' {
            parts.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts.into_iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

/// Pack sentences greedily into lines within `budget` characters,
/// hard-cutting any sentence longer than `budget * 1.8`, then merging
/// short trailing lines into their predecessor (§4.6).
pub fn split_text_for_srt(text: &str, language: &str, model: &str) -> Vec<String> {
    let budget = char_budget(language, model);
    let sentences = split_into_sentences(text, language);
    if sentences.is_empty() {
        return Vec::new();
    }

    let hard_limit = (budget as f64 * 1.8) as usize;
    let mut expanded = Vec::new();
    for sentence in sentences {
        if sentence.chars().count() > hard_limit {
            expanded.extend(hard_cut(&sentence, budget));
        } else {
            expanded.push(sentence);
        }
    }

    let mut lines: Vec<String> = Vec::new();
    for sentence in expanded {
        if let Some(last) = lines.last_mut() {
            let joiner = join_separator(last, &sentence);
            let candidate_len = last.chars().count() + joiner.chars().count() + sentence.chars().count();
            if candidate_len <= budget {
                last.push_str(&joiner);
                last.push_str(&sentence);
                continue;
            }
        }
        lines.push(sentence);
    }

    merge_short_trailing_lines(lines, budget)
}

fn join_separator(prev: &str, next: &str) -> String {
    let prev_tail_ascii = prev.chars().last().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
    let next_head_ascii = next.chars().next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
    if prev_tail_ascii && next_head_ascii {
        " ".to_string()
    } else {
        String::new()
    }
}

fn hard_cut(text: &str, budget: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(budget.max(1)).map(|chunk| chunk.iter().collect()).collect()
}

fn merge_short_trailing_lines(lines: Vec<String>, budget: usize) -> Vec<String> {
    let min_len = (budget / 5).max(4);
    let mut result: Vec<String> = Vec::new();
    for line in lines {
        if let Some(last) = result.last_mut() {
            if line.chars().count() < min_len {
                let joiner = join_separator(last, &line);
                let candidate_len = last.chars().count() + joiner.chars().count() + line.chars().count();
                if candidate_len <= budget + 6 {
                    last.push_str(&joiner);
                    last.push_str(&line);
                    continue;
                }
            }
        }
        result.push(line);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let text = "hello   world\n&amp; more";
        let once = normalize_transcript_text(text, "en", "nova-2-general");
        let twice = normalize_transcript_text(&once, "en", "nova-2-general");
        assert_eq!(once, twice);
    }

    #[test]
    fn cjk_all_spaces_removed_between_cjk_chars() {
        let text = "你 好 世 界";
        let normalized = normalize_transcript_text(text, "zh", "whisper-large");
        assert!(!normalized.chars().zip(normalized.chars().skip(1)).any(|(a, b)| is_cjk(a) && b == ' '));
        for w in normalized.chars().collect::<Vec<_>>().windows(2) {
            if is_cjk(w[0]) {
                assert_ne!(w[1], ' ');
            }
        }
    }

    #[test]
    fn collapses_whitespace_and_repeats() {
        let text = "wow!!!!  great";
        let normalized = normalize_transcript_text(text, "en", "nova-2-general");
        assert_eq!(normalized, "wow!! great");
    }

    #[test]
    fn html_unescape_handles_named_and_numeric_entities() {
        let text = "a &amp; b &#39;c&#39; &#x41;";
        let normalized = normalize_transcript_text(text, "en", "nova-2-general");
        assert_eq!(normalized, "a & b 'c' A");
    }

    #[test]
    fn char_budget_respects_language_and_model() {
        assert_eq!(char_budget("ja", "whisper-large"), 20);
        assert_eq!(char_budget("zh", "nova-2-general"), 24);
        assert_eq!(char_budget("auto", "kotoba-tech/kotoba-whisper-v2.2"), 22);
        assert_eq!(char_budget("en", "nova-2-general"), 42);
    }

    #[test]
    fn split_text_for_srt_produces_nonempty_lines_within_reason() {
        let text = "Hello there. How are you today? I am doing quite well, thank you for asking!";
        let lines = split_text_for_srt(text, "en", "nova-2-general");
        assert!(!lines.is_empty());
        for line in &lines {
            assert!(!line.trim().is_empty());
        }
    }
}
