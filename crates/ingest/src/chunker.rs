use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::TextChunk;
use crate::planner::ChunkPlan;

/// Boundaries tried in order, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Paragraph,
    Line,
    Sentence,
    Word,
}

const SEPARATORS: [Separator; 4] = [
    Separator::Paragraph,
    Separator::Line,
    Separator::Sentence,
    Separator::Word,
];

/// A contiguous slice of the source: byte range plus character offset and length.
#[derive(Debug, Clone, Copy)]
struct Piece {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_len: usize,
}

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Split `text` into ordered chunks of at most `chunk_size` characters,
    /// with adjacent chunks sharing up to `chunk_overlap` characters.
    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let whole = Piece {
            byte_start: 0,
            byte_end: text.len(),
            char_start: 0,
            char_len: text.chars().count(),
        };

        let mut pieces = Vec::new();
        self.split_piece(text, whole, 0, &mut pieces);
        self.merge_pieces(doc_id, text, &pieces)
    }

    fn split_piece(&self, text: &str, piece: Piece, level: usize, out: &mut Vec<Piece>) {
        if piece.char_len <= self.chunk_size {
            out.push(piece);
            return;
        }

        let Some(&separator) = SEPARATORS.get(level) else {
            self.hard_split(text, piece, out);
            return;
        };

        let parts = split_on(&text[piece.byte_start..piece.byte_end], separator);
        if parts.len() <= 1 {
            self.split_piece(text, piece, level + 1, out);
            return;
        }

        let mut byte_start = piece.byte_start;
        let mut char_start = piece.char_start;
        for part in parts {
            let char_len = part.chars().count();
            let sub = Piece {
                byte_start,
                byte_end: byte_start + part.len(),
                char_start,
                char_len,
            };
            byte_start = sub.byte_end;
            char_start += char_len;
            self.split_piece(text, sub, level + 1, out);
        }
    }

    /// Last resort for a run with no separator at all: cut every `chunk_size` characters.
    fn hard_split(&self, text: &str, piece: Piece, out: &mut Vec<Piece>) {
        let slice = &text[piece.byte_start..piece.byte_end];
        let mut byte_start = piece.byte_start;
        let mut char_start = piece.char_start;
        let mut char_len = 0;

        for (idx, _) in slice.char_indices() {
            if char_len == self.chunk_size {
                let byte_end = piece.byte_start + idx;
                out.push(Piece {
                    byte_start,
                    byte_end,
                    char_start,
                    char_len,
                });
                byte_start = byte_end;
                char_start += char_len;
                char_len = 0;
            }
            char_len += 1;
        }

        if char_len > 0 {
            out.push(Piece {
                byte_start,
                byte_end: piece.byte_end,
                char_start,
                char_len,
            });
        }
    }

    /// Greedily pack pieces into chunks, carrying the end of each chunk forward as overlap.
    fn merge_pieces(&self, doc_id: &str, text: &str, pieces: &[Piece]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        let mut window: Vec<Piece> = Vec::new();
        let mut total = 0;

        for &piece in pieces {
            if total + piece.char_len > self.chunk_size && !window.is_empty() {
                chunks.push(self.emit(doc_id, text, &window, chunks.len()));

                // The carried tail must leave room for the incoming piece.
                let budget = self.chunk_overlap.min(self.chunk_size - piece.char_len);
                window = overlap_tail(text, &window, budget);
                total = window.iter().map(|p| p.char_len).sum();
            }
            window.push(piece);
            total += piece.char_len;
        }

        if !window.is_empty() {
            chunks.push(self.emit(doc_id, text, &window, chunks.len()));
        }

        chunks
    }

    fn emit(&self, doc_id: &str, text: &str, window: &[Piece], index: usize) -> TextChunk {
        let first = window[0];
        let last = window[window.len() - 1];
        let char_end = last.char_start + last.char_len;

        TextChunk::new(
            doc_id.to_string(),
            index,
            text[first.byte_start..last.byte_end].to_string(),
            (first.char_start, char_end),
        )
    }
}

/// Trailing pieces of `window` totalling at most `budget` characters. When the
/// next whole piece does not fit, the remainder is taken from inside it.
fn overlap_tail(text: &str, window: &[Piece], budget: usize) -> Vec<Piece> {
    let mut tail = Vec::new();
    let mut total = 0;

    for &piece in window.iter().rev() {
        if total + piece.char_len <= budget {
            tail.push(piece);
            total += piece.char_len;
            continue;
        }
        if let Some(part) = piece_suffix(text, piece, budget - total) {
            tail.push(part);
        }
        break;
    }

    tail.reverse();
    tail
}

/// End of `piece` no longer than `budget` characters: whole words if any fit, raw characters otherwise.
fn piece_suffix(text: &str, piece: Piece, budget: usize) -> Option<Piece> {
    if budget == 0 {
        return None;
    }
    let slice = &text[piece.byte_start..piece.byte_end];

    let mut bytes = 0;
    let mut chars = 0;
    for word in split_on(slice, Separator::Word).into_iter().rev() {
        let len = word.chars().count();
        if chars + len > budget {
            break;
        }
        bytes += word.len();
        chars += len;
    }

    if chars == 0 {
        let (idx, _) = slice.char_indices().rev().nth(budget - 1)?;
        bytes = slice.len() - idx;
        chars = budget;
    }

    Some(Piece {
        byte_start: piece.byte_end - bytes,
        byte_end: piece.byte_end,
        char_start: piece.char_start + piece.char_len - chars,
        char_len: chars,
    })
}

/// Split keeping each separator attached to the part before it, so parts stay contiguous.
fn split_on(text: &str, separator: Separator) -> Vec<&str> {
    match separator {
        Separator::Paragraph => split_inclusive_str(text, "\n\n"),
        Separator::Line => text.split_inclusive('\n').collect(),
        Separator::Sentence => text.split_sentence_bounds().collect(),
        Separator::Word => text.split_inclusive(' ').collect(),
    }
}

fn split_inclusive_str<'a>(text: &'a str, delimiter: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(delimiter) {
        let end = idx + delimiter.len();
        parts.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

/// Segment `text` according to a plan; a plan without split yields the whole text as one chunk.
pub fn segment(doc_id: &str, text: &str, plan: &ChunkPlan) -> Vec<TextChunk> {
    if !plan.needs_split {
        if text.is_empty() {
            return Vec::new();
        }
        let char_len = text.chars().count();
        return vec![TextChunk::new(
            doc_id.to_string(),
            0,
            text.to_string(),
            (0, char_len),
        )];
    }

    Chunker::new(plan.chunk_size, plan.chunk_overlap).chunk_text(doc_id, text)
}
