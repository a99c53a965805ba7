//! Splits raw document text into overlapping sentence-aligned chunks, and
//! separately into natural paragraphs, per §4.1 of the specification.
//!
//! Both operations index into the text as a `Vec<char>` rather than raw
//! bytes so that splits always land on character boundaries regardless of
//! UTF-8 content — the same safety property the original paragraph chunker
//! enforced with an explicit byte-boundary snap.

/// Sentence-ending punctuation the splitter treats as a candidate boundary.
const SENTENCE_ENDERS: [char; 3] = ['.', '?', '!'];

/// `SplitIntoChunks(text, size, overlap) -> [chunk_text]`.
///
/// Greedy split preferring a sentence boundary within ±15% of `size`;
/// falls back to a hard cut at `size` when none is found. Successive chunks
/// overlap by exactly `overlap` characters copied from the end of the
/// previous chunk.
pub fn split_into_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let n = chars.len();
    if n <= size {
        return vec![chars.iter().collect()];
    }

    let tolerance = ((size as f64) * 0.15).round() as usize;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < n {
        let ideal_end = (start + size).min(n);
        let end = if ideal_end >= n {
            n
        } else {
            find_sentence_boundary(&chars, ideal_end, tolerance, n).unwrap_or(ideal_end)
        };
        let end = end.max(start + 1);

        chunks.push(chars[start..end].iter().collect::<String>());

        if end >= n {
            break;
        }
        start = end.saturating_sub(overlap).max(if end > start { start + 1 } else { start });
        // Guarantee forward progress even if overlap >= chunk length produced.
        if start >= end {
            start = end;
        }
    }

    chunks
}

/// Looks for `.`/`?`/`!` followed by whitespace (or end of text) within
/// `[ideal_end - tolerance, ideal_end + tolerance]`, returning the offset
/// just past the sentence ender closest to `ideal_end`.
fn find_sentence_boundary(chars: &[char], ideal_end: usize, tolerance: usize, n: usize) -> Option<usize> {
    let search_start = ideal_end.saturating_sub(tolerance);
    let search_end = (ideal_end + tolerance).min(n);

    let mut best: Option<(usize, usize)> = None; // (distance, candidate)
    for i in search_start..search_end {
        if !SENTENCE_ENDERS.contains(&chars[i]) {
            continue;
        }
        let candidate = i + 1;
        if candidate != n && !chars[candidate].is_whitespace() {
            continue;
        }
        let dist = candidate.abs_diff(ideal_end);
        if best.map(|(d, _)| dist < d).unwrap_or(true) {
            best = Some((dist, candidate));
        }
    }
    best.map(|(_, c)| c)
}

/// `SplitIntoParagraphs(text) -> [paragraph_text]`.
///
/// A paragraph boundary is two or more consecutive line terminators.
/// Paragraphs shorter than 40 words are merged forward into the next
/// paragraph; paragraphs longer than 400 words are split at sentence
/// boundaries into pieces of at most 400 words. The last paragraph is kept
/// verbatim even if short.
pub fn split_into_paragraphs(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let raw_paragraphs = split_on_blank_lines(trimmed);
    let merged = merge_short_paragraphs(raw_paragraphs, 40);

    let mut result = Vec::new();
    for p in merged {
        if word_count(&p) <= 400 {
            result.push(p);
        } else {
            result.extend(split_long_paragraph(&p, 400));
        }
    }
    result
}

fn split_on_blank_lines(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

fn merge_short_paragraphs(paragraphs: Vec<String>, min_words: usize) -> Vec<String> {
    let n = paragraphs.len();
    let mut merged = Vec::new();
    let mut carry: Option<String> = None;

    for (i, p) in paragraphs.into_iter().enumerate() {
        let combined = match carry.take() {
            Some(c) => format!("{c} {p}"),
            None => p,
        };
        let is_last = i + 1 == n;
        if word_count(&combined) < min_words && !is_last {
            carry = Some(combined);
        } else {
            merged.push(combined);
        }
    }
    if let Some(c) = carry {
        match merged.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(&c);
            }
            None => merged.push(c),
        }
    }
    merged
}

fn split_long_paragraph(text: &str, max_words: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_words = 0usize;

    for s in sentences {
        let sw = word_count(&s);
        if current_words + sw > max_words && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_words = 0;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&s);
        current_words += sw;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    if pieces.is_empty() {
        pieces.push(text.to_string());
    }
    pieces
}

fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for i in 0..n {
        if !SENTENCE_ENDERS.contains(&chars[i]) {
            continue;
        }
        let candidate = i + 1;
        if candidate == n || chars[candidate].is_whitespace() {
            let sentence: String = chars[start..candidate].iter().collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = candidate;
        }
    }
    if start < n {
        let rest: String = chars[start..n].iter().collect();
        let rest = rest.trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }
    }
    sentences
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
