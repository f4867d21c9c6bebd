//! HTML-wrapped systrace captures.
//!
//! A systrace HTML report embeds one or more trace payloads in
//! `<script class="trace-data" type="application/text">` elements. Each
//! element becomes one logical sub-stream; the payload inside may itself
//! be compressed, which the recursive unwrap driver takes care of.

use anyhow::Result;

use crate::error::ImportFeedback;
use crate::producer::BufferProducer;
use crate::reader::StreamingReader;
use crate::slice::DataSlice;

use super::{Extractor, SubStreamSink};

const TRACE_DATA_OPEN: &[u8] = b"<script class=\"trace-data\"";
const SCRIPT_CLOSE: &[u8] = b"</script>";

/// How far a forward marker scan loads per step.
const SCAN_STEP: usize = 64 * 1024;

pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn name(&self) -> &'static str {
        "systrace-html"
    }

    fn sniff(&self, peek: &[u8]) -> bool {
        let trimmed = trim_leading_whitespace(peek);
        starts_with_ignore_case(trimmed, b"<!doctype html")
            || starts_with_ignore_case(trimmed, b"<html")
            || contains(peek, TRACE_DATA_OPEN)
    }

    fn extract(
        &self,
        reader: &mut StreamingReader<'_>,
        _feedback: &ImportFeedback,
        sink: &mut SubStreamSink<'_>,
    ) -> Result<()> {
        let mut pos = 0usize;
        let mut segments = 0usize;
        loop {
            let Some(open) = find_forward(reader, TRACE_DATA_OPEN, pos) else {
                break;
            };
            // The payload begins after the opening tag's '>', skipping a
            // single newline the report generator puts there.
            let Some(tag_end) = find_forward(reader, b">", open + TRACE_DATA_OPEN.len()) else {
                log::warn!("trace-data script tag never closed by '>', ignoring");
                break;
            };
            let mut content_start = tag_end + 1;
            if reader.load_to(content_start + 1) && reader.byte_at(content_start) == Some(b'\n') {
                content_start += 1;
            }

            let segment_end;
            {
                let mut segment = SegmentProducer::new(reader, content_start);
                sink(&mut segment)?;
                segment_end = segment.end_pos;
            }
            segments += 1;

            // If the sink stopped pulling early the end marker has not
            // been located yet; find it ourselves to reach the next
            // segment.
            let end = match segment_end {
                Some(end) => end,
                None => match find_forward(reader, SCRIPT_CLOSE, content_start) {
                    Some(end) => end,
                    None => break,
                },
            };
            pos = end + SCRIPT_CLOSE.len();
        }
        log::debug!("html container yielded {segments} trace-data segment(s)");
        Ok(())
    }
}

/// Sub-stream producer for one trace-data segment. Yields bytes up to the
/// closing `</script>`, never handing out a tail that could be the start
/// of the marker until enough input arrives to disambiguate it.
struct SegmentProducer<'a, 'p> {
    reader: &'a mut StreamingReader<'p>,
    pos: usize,
    /// Offset of the closing marker, once found.
    end_pos: Option<usize>,
    done: bool,
}

impl<'a, 'p> SegmentProducer<'a, 'p> {
    fn new(reader: &'a mut StreamingReader<'p>, start: usize) -> Self {
        SegmentProducer {
            reader,
            pos: start,
            end_pos: None,
            done: false,
        }
    }
}

impl BufferProducer for SegmentProducer<'_, '_> {
    fn produce(&mut self) -> Option<DataSlice> {
        loop {
            if self.done {
                return None;
            }
            self.reader.evict_below(self.pos);
            let lookahead = self.pos + SCAN_STEP;
            self.reader.load_to(lookahead);
            let loaded = self.reader.loaded_end().min(lookahead);

            if let Some(m) = self.reader.index_of(SCRIPT_CLOSE, self.pos, loaded) {
                self.end_pos = Some(m);
                self.done = true;
                if m == self.pos {
                    return None;
                }
                let bytes = self.reader.copy_range(self.pos, m)?;
                self.pos = m;
                return Some(DataSlice::from(bytes));
            }

            if self.reader.is_exhausted() && loaded == self.reader.loaded_end() {
                // Truncated capture with no closing tag; hand out the rest
                // rather than dropping it.
                self.done = true;
                self.end_pos = Some(loaded);
                if loaded == self.pos {
                    return None;
                }
                let bytes = self.reader.copy_range(self.pos, loaded)?;
                self.pos = loaded;
                return Some(DataSlice::from(bytes));
            }

            // Hold back a potential marker prefix at the window edge.
            let safe = loaded.saturating_sub(SCRIPT_CLOSE.len() - 1);
            if safe <= self.pos {
                // Not enough new input to make progress yet; load more.
                continue;
            }
            let bytes = self.reader.copy_range(self.pos, safe)?;
            self.pos = safe;
            return Some(DataSlice::from(bytes));
        }
    }

    fn close(&mut self) {
        self.done = true;
    }
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let skip = data
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    &data[skip..]
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len()
        && data
            .iter()
            .zip(prefix)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && hay.windows(needle.len()).any(|w| w == needle)
}

/// Scan forward for `needle` starting at `from`, loading the stream in
/// bounded steps and letting old chunks fall out of the window behind the
/// scan position.
fn find_forward(reader: &mut StreamingReader<'_>, needle: &[u8], mut from: usize) -> Option<usize> {
    loop {
        let limit = from + SCAN_STEP;
        reader.load_to(limit);
        let end = limit.min(reader.loaded_end());
        if let Some(hit) = reader.index_of(needle, from, end) {
            return Some(hit);
        }
        if reader.is_exhausted() && end == reader.loaded_end() {
            return None;
        }
        from = end.saturating_sub(needle.len() - 1);
        reader.evict_below(from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::MemoryProducer;

    fn wrap(segments: &[&str]) -> Vec<u8> {
        let mut html = Vec::new();
        html.extend_from_slice(b"<!DOCTYPE html>\n<html>\n<body>\n");
        for seg in segments {
            html.extend_from_slice(b"  <script class=\"trace-data\" type=\"application/text\">\n");
            html.extend_from_slice(seg.as_bytes());
            html.extend_from_slice(b"</script>\n");
        }
        html.extend_from_slice(b"</body>\n</html>\n");
        html
    }

    fn extract_segments(html: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
        let mut reader =
            StreamingReader::from_producer(MemoryProducer::from_bytes(html, chunk_size));
        let feedback = ImportFeedback::new();
        let mut segments = Vec::new();
        HtmlExtractor
            .extract(&mut reader, &feedback, &mut |sub: &mut dyn BufferProducer| {
                let mut bytes = Vec::new();
                while let Some(chunk) = sub.produce() {
                    bytes.extend_from_slice(chunk.as_bytes());
                }
                segments.push(bytes);
                Ok(())
            })
            .unwrap();
        segments
    }

    #[test]
    fn test_sniff_accepts_html() {
        assert!(HtmlExtractor.sniff(b"<!DOCTYPE html>\n<html>"));
        assert!(HtmlExtractor.sniff(b"  \n<HTML lang=\"en\">"));
        assert!(!HtmlExtractor.sniff(b"# tracer: nop\n"));
        assert!(!HtmlExtractor.sniff(b"TRACE:\nx"));
    }

    #[test]
    fn test_single_segment() {
        let html = wrap(&["line one\nline two\n"]);
        for chunk_size in [1, 5, 4096] {
            let segs = extract_segments(&html, chunk_size);
            assert_eq!(segs.len(), 1, "chunk_size {chunk_size}");
            assert_eq!(segs[0], b"line one\nline two\n", "chunk_size {chunk_size}");
        }
    }

    #[test]
    fn test_multiple_segments() {
        let html = wrap(&["first\n", "second segment\n", "third\n"]);
        let segs = extract_segments(&html, 3);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0], b"first\n");
        assert_eq!(segs[1], b"second segment\n");
        assert_eq!(segs[2], b"third\n");
    }

    #[test]
    fn test_unterminated_segment_yields_remainder() {
        let mut html = Vec::new();
        html.extend_from_slice(b"<html><script class=\"trace-data\">\n");
        html.extend_from_slice(b"truncated capture");
        let segs = extract_segments(&html, 4);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0], b"truncated capture");
    }

    #[test]
    fn test_no_trace_data_yields_nothing() {
        let segs = extract_segments(b"<html><body>no trace here</body></html>", 8);
        assert!(segs.is_empty());
    }
}
