//! Deterministic transcript chunking.
//!
//! Splits a diarized transcript (`Speaker N: ...` lines) into speaker-tagged
//! sentence chunks, then groups consecutive chunks under a character budget
//! for the language pipeline. Pure functions, no I/O.

/// Punctuation that terminates a sentence when followed by whitespace.
/// Includes the Devanagari danda since source calls are Hindi.
const SENTENCE_TERMINALS: &[char] = &['.', '!', '?', '।'];

/// Returns the speaker label (e.g. "Speaker 2:") starting at `text`, if any.
fn match_speaker_label(text: &str) -> Option<&str> {
    let after_name = text.strip_prefix("Speaker")?;
    let rest = after_name.trim_start_matches(char::is_whitespace);
    if rest.len() == after_name.len() {
        return None; // at least one whitespace character required
    }
    let digits = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    if digits.len() == rest.len() {
        return None; // no digits after "Speaker "
    }
    let rest = digits.strip_prefix(':')?;
    let label_len = text.len() - rest.len();
    Some(&text[..label_len])
}

/// Split a span of one speaker's text into sentence-like units.
fn split_sentences(span: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut after_terminal = false;
    for (idx, ch) in span.char_indices() {
        if after_terminal && ch.is_whitespace() {
            let piece = span[start..idx].trim();
            if !piece.is_empty() {
                sentences.push(piece);
            }
            start = idx;
        }
        after_terminal = SENTENCE_TERMINALS.contains(&ch);
    }
    let tail = span[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split a speaker-tagged transcript into per-sentence chunks, each
/// re-prefixed with the speaker label that governs it. Spans with no new
/// label inherit the last seen label; empty spans produce no chunks.
pub fn split_speaker_sentences(transcript: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_speaker = String::new();
    let mut rest = transcript;

    while !rest.is_empty() {
        // Find the next speaker label, treating everything before it as a
        // span governed by the current label.
        let mut next_label: Option<(usize, &str)> = None;
        for (idx, _) in rest.match_indices("Speaker") {
            if let Some(label) = match_speaker_label(&rest[idx..]) {
                next_label = Some((idx, label));
                break;
            }
        }

        match next_label {
            Some((idx, label)) => {
                let span = &rest[..idx];
                for sentence in split_sentences(span) {
                    chunks.push(format!("{} {}", current_speaker, sentence));
                }
                current_speaker = label.trim().to_string();
                rest = &rest[idx + label.len()..];
            }
            None => {
                for sentence in split_sentences(rest) {
                    if current_speaker.is_empty() {
                        chunks.push(sentence.to_string());
                    } else {
                        chunks.push(format!("{} {}", current_speaker, sentence));
                    }
                }
                break;
            }
        }
    }

    chunks
}

/// Group chunks into buffers bounded by `max_chars`. A chunk that alone
/// exceeds the budget becomes its own single-element group; sentences are
/// never split.
pub fn group_chunks(chunks: &[String], max_chars: usize) -> Vec<String> {
    let mut grouped = Vec::new();
    let mut buffer = String::new();

    for chunk in chunks {
        if buffer.len() + chunk.len() < max_chars {
            buffer.push_str(chunk);
            buffer.push(' ');
        } else {
            if !buffer.is_empty() {
                grouped.push(buffer.trim_end().to_string());
            }
            buffer = format!("{} ", chunk);
        }
    }
    if !buffer.trim().is_empty() {
        grouped.push(buffer.trim_end().to_string());
    }

    grouped
}
