use super::ast_parser::{AstParser, Declaration};
use super::language::Language;
use crate::config::ChunkingConfig;
use crate::hasher::ContentHasher;
use crate::types::{Chunk, SymbolKind};

/// A line range destined to become one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    start: usize,
    end: usize,
    symbol_name: Option<String>,
    symbol_kind: SymbolKind,
    /// First line of seam context, when this segment starts at a forced window seam
    context_from: Option<usize>,
}

impl Segment {
    fn new(start: usize, end: usize, symbol_name: Option<String>, symbol_kind: SymbolKind) -> Self {
        Self {
            start,
            end,
            symbol_name,
            symbol_kind,
            context_from: None,
        }
    }

    fn len(&self) -> usize {
        self.end + 1 - self.start
    }
}

/// Splits files into symbol-bounded chunks with size-based fallback
///
/// Chunk line ranges always partition the file: every line from the first
/// to the last belongs to exactly one chunk, in order. Material between
/// declarations (imports, comments, attributes) travels with the
/// declaration that follows it; trailing material joins the last chunk.
#[derive(Debug, Clone)]
pub struct CodeChunker {
    max_lines: usize,
    min_lines: usize,
    overlap: usize,
}

impl CodeChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let max_lines = config.max_chunk_lines.max(1);
        Self {
            max_lines,
            min_lines: config.min_chunk_lines.min(max_lines),
            overlap: config.window_overlap_lines.min(max_lines.saturating_sub(1)),
        }
    }

    /// Chunk a file into ordered, non-overlapping chunks
    ///
    /// Never fails: files without a grammar, or that do not parse cleanly,
    /// degrade to whole-file chunking with `SymbolKind::Unknown`. Empty and
    /// whitespace-only files yield no chunks.
    pub fn chunk_file(&self, repo_id: &str, file_path: &str, content: &str) -> Vec<Chunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let language = Language::from_path(file_path);

        let segments = match language.map(|lang| Self::outline(lang, content)) {
            Some(Ok(declarations)) if !declarations.is_empty() => {
                self.split_span(1, total, &declarations)
            }
            Some(Ok(_)) => {
                // Parsed cleanly but declares nothing: a script or module body
                let name = module_name(file_path);
                self.fit_span(1, total, Some(name), SymbolKind::Module)
            }
            Some(Err(failure)) => {
                tracing::warn!(
                    "Structural parsing failed for {}: {}; falling back to whole-file chunking",
                    file_path,
                    failure
                );
                self.fit_span(1, total, None, SymbolKind::Unknown)
            }
            None => self.fit_span(1, total, None, SymbolKind::Unknown),
        };

        let segments = self.merge_small(segments, &lines);
        let language_name = language.map(|l| l.name().to_string());

        segments
            .into_iter()
            .map(|segment| {
                let content = lines[segment.start - 1..segment.end].join("\n");
                let seam_context = segment
                    .context_from
                    .map(|from| lines[from - 1..segment.start - 1].join("\n"))
                    .unwrap_or_default();
                let content_hash = ContentHasher::content_hash(repo_id, file_path, &content);
                let vector_id = ContentHasher::vector_id(repo_id, file_path, &content_hash);

                Chunk {
                    repo_id: repo_id.to_string(),
                    file_path: file_path.to_string(),
                    start_line: segment.start,
                    end_line: segment.end,
                    symbol_name: segment.symbol_name,
                    symbol_kind: segment.symbol_kind,
                    language: language_name.clone(),
                    content,
                    content_hash,
                    vector_id,
                    seam_context,
                }
            })
            .collect()
    }

    fn outline(
        language: Language,
        content: &str,
    ) -> Result<Vec<Declaration>, super::ast_parser::ParseFailure> {
        AstParser::new(language)?.parse(content)
    }

    /// Partition `[lo, hi]` among `declarations`, recursing into oversized ones
    fn split_span(&self, lo: usize, hi: usize, declarations: &[Declaration]) -> Vec<Segment> {
        let mut assigned: Vec<(usize, usize, &Declaration)> = Vec::new();
        let mut cursor = lo;

        for decl in declarations {
            // Declarations sharing a line with the previous one are absorbed by it
            if decl.end_line < cursor || decl.start_line > hi {
                continue;
            }
            let end = decl.end_line.min(hi);
            assigned.push((cursor, end, decl));
            cursor = end + 1;
        }

        let Some(last) = assigned.last_mut() else {
            return self.fit_span(lo, hi, None, SymbolKind::Unknown);
        };
        last.1 = hi;

        let mut segments = Vec::new();
        for (start, end, decl) in assigned {
            if end + 1 - start <= self.max_lines {
                segments.push(Segment::new(
                    start,
                    end,
                    decl.name.clone(),
                    decl.symbol_kind,
                ));
            } else if !decl.children.is_empty() {
                segments.extend(self.split_span(start, end, &decl.children));
            } else {
                segments.extend(self.window_split(start, end, decl.name.clone(), decl.symbol_kind));
            }
        }
        segments
    }

    /// One segment for the span, or fixed windows if it is too large
    fn fit_span(
        &self,
        start: usize,
        end: usize,
        symbol_name: Option<String>,
        symbol_kind: SymbolKind,
    ) -> Vec<Segment> {
        if end + 1 - start <= self.max_lines {
            vec![Segment::new(start, end, symbol_name, symbol_kind)]
        } else {
            self.window_split(start, end, symbol_name, symbol_kind)
        }
    }

    /// Evenly sized line windows no larger than `max_lines`. Each window after
    /// the first records the preceding `overlap` lines as seam context.
    fn window_split(
        &self,
        start: usize,
        end: usize,
        symbol_name: Option<String>,
        symbol_kind: SymbolKind,
    ) -> Vec<Segment> {
        let len = end + 1 - start;
        let windows = len.div_ceil(self.max_lines);
        let size = len.div_ceil(windows);

        let mut segments = Vec::with_capacity(windows);
        let mut window_start = start;
        while window_start <= end {
            let window_end = (window_start + size - 1).min(end);
            let mut segment =
                Segment::new(window_start, window_end, symbol_name.clone(), symbol_kind);
            if window_start > start && self.overlap > 0 {
                segment.context_from = Some(window_start.saturating_sub(self.overlap).max(1));
            }
            segments.push(segment);
            window_start = window_end + 1;
        }
        segments
    }

    /// Merge trivial segments into their following sibling (or the previous
    /// one at the end of the file) while staying within `max_lines`.
    /// Blank-only segments always merge, even past `max_lines`, so no chunk
    /// is made of blank lines alone.
    fn merge_small(&self, segments: Vec<Segment>, lines: &[&str]) -> Vec<Segment> {
        let is_blank = |segment: &Segment| {
            lines[segment.start - 1..segment.end]
                .iter()
                .all(|line| line.trim().is_empty())
        };
        let is_trivial = |segment: &Segment| segment.len() < self.min_lines || is_blank(segment);

        let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
        let mut pending: Option<Segment> = None;

        for mut segment in segments {
            if let Some(small) = pending.take() {
                if is_blank(&small) || small.len() + segment.len() <= self.max_lines {
                    segment.start = small.start;
                    segment.context_from = small.context_from;
                } else {
                    merged.push(small);
                }
            }

            if is_trivial(&segment) {
                pending = Some(segment);
            } else {
                merged.push(segment);
            }
        }

        if let Some(small) = pending {
            match merged.last_mut() {
                Some(previous)
                    if is_blank(&small) || previous.len() + small.len() <= self.max_lines =>
                {
                    previous.end = small.end;
                }
                _ => merged.push(small),
            }
        }

        merged
    }
}

fn module_name(file_path: &str) -> String {
    std::path::Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_string()
}

impl Default for CodeChunker {
    fn default() -> Self {
        Self::new(&ChunkingConfig::default())
    }
}
