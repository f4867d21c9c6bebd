//! Compressed ftrace captures.
//!
//! `atrace -z` writes a `TRACE:` marker line followed by a zlib-compressed
//! payload. [`ZlibExtractor`] detects that shape with a trial inflate over
//! the sniff window and [`DeflateProducer`] then inflates the payload
//! incrementally, sizing each output buffer from a running estimate of the
//! stream's compression ratio so neither the compressed input nor the
//! decompressed output is ever materialized whole.

use anyhow::Result;
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{ImportError, ImportFeedback};
use crate::producer::BufferProducer;
use crate::reader::StreamingReader;
use crate::slice::DataSlice;

use super::{Extractor, SubStreamSink, SNIFF_WINDOW};

/// Marker line preceding the compressed payload.
pub const TRACE_MARKER: &[u8] = b"TRACE:";

/// Smallest possible zlib stream: two header bytes plus the Adler-32
/// checksum. Anything shorter is rejected without trying to inflate.
const MIN_DEFLATE_LEN: usize = 6;

/// Prior for the output/input size ratio before any data has been seen.
/// Trace text compresses well, so start generous.
const INITIAL_RATIO: f64 = 5.0;

/// Safety margin on top of the estimated output size.
const RATIO_SAFETY: f64 = 1.2;

/// Floor for output buffer estimates so tiny input chunks still make
/// useful progress.
const MIN_OUT_BUF: usize = 4 * 1024;

pub struct ZlibExtractor;

impl Extractor for ZlibExtractor {
    fn name(&self) -> &'static str {
        "zlib-ftrace"
    }

    fn sniff(&self, peek: &[u8]) -> bool {
        let payload = &peek[payload_offset(peek)..];
        if payload.len() < MIN_DEFLATE_LEN {
            return false;
        }
        // A dictionary-requiring stream will not inflate here, but it is
        // still unmistakably zlib; match it so extraction can report the
        // unsupported dictionary instead of passing garbage through as
        // text.
        if has_valid_zlib_header(payload) && wants_dictionary(payload) {
            return true;
        }
        let mut trial = Decompress::new(true);
        let mut out = vec![0u8; 4096];
        match trial.decompress(payload, &mut out, FlushDecompress::None) {
            Ok(_) => trial.total_out() > 0,
            // Not deflate data; a normal negative, not a failure.
            Err(_) => false,
        }
    }

    fn extract(
        &self,
        reader: &mut StreamingReader<'_>,
        feedback: &ImportFeedback,
        sink: &mut SubStreamSink<'_>,
    ) -> Result<()> {
        let peek = reader.peek(SNIFF_WINDOW);
        let offset = payload_offset(&peek);
        let payload = &peek[offset..];
        if has_valid_zlib_header(payload) && wants_dictionary(payload) {
            feedback.report(ImportError::NeedsDictionary);
            return Ok(());
        }

        let tail = ReaderTailProducer {
            reader,
            pos: offset,
            closed: false,
        };
        let mut producer = DeflateProducer::new(Box::new(tail), feedback.clone());
        let result = sink(&mut producer);
        producer.close();
        result
    }
}

/// Where the compressed payload starts within the sniffed prefix: right
/// after the `TRACE:` marker and any following whitespace. A missing
/// marker is tolerated and means the payload starts at offset 0; some
/// captures are the bare compressed stream with no header line.
fn payload_offset(peek: &[u8]) -> usize {
    let Some(m) = peek
        .windows(TRACE_MARKER.len())
        .position(|w| w == TRACE_MARKER)
    else {
        return 0;
    };
    let mut pos = m + TRACE_MARKER.len();
    while pos < peek.len() && matches!(peek[pos], b' ' | b'\t' | b'\r' | b'\n') {
        pos += 1;
    }
    pos
}

fn has_valid_zlib_header(data: &[u8]) -> bool {
    // CMF low nibble 8 = deflate; the CMF/FLG pair is a multiple of 31.
    data.len() >= 2
        && data[0] & 0x0f == 8
        && ((data[0] as u16) << 8 | data[1] as u16) % 31 == 0
}

fn wants_dictionary(data: &[u8]) -> bool {
    data.len() >= 2 && data[1] & 0x20 != 0
}

/// Drains the rest of a reader from a fixed offset as a producer, feeding
/// the decompressor below.
struct ReaderTailProducer<'a, 'p> {
    reader: &'a mut StreamingReader<'p>,
    pos: usize,
    closed: bool,
}

impl BufferProducer for ReaderTailProducer<'_, '_> {
    fn produce(&mut self) -> Option<DataSlice> {
        if self.closed {
            return None;
        }
        let chunk = self.reader.next_chunk(self.pos, None)?;
        self.pos += chunk.len();
        Some(chunk)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
    NotStarted,
    Streaming,
    Exhausted,
    Closed,
    Error,
}

/// Incremental zlib decompressor behind the [`BufferProducer`] contract.
///
/// Each input chunk is fed completely before the next one is pulled.
/// Within a chunk, output buffers are sized as `remaining input *
/// running ratio * safety margin`; the ratio is a 9:1 exponential moving
/// average updated after every call that makes forward progress. The
/// estimate only affects allocation, never correctness: a too-small
/// buffer just means another loop iteration.
///
/// Failures (corrupt data, truncated input) are reported through the
/// feedback channel and end the sequence; they never panic or escape
/// `produce()`. The decompressor's native state is released by drop,
/// exactly once, whichever of close or exhaustion comes first.
pub struct DeflateProducer<'s> {
    source: Box<dyn BufferProducer + 's>,
    inflate: Decompress,
    avg_ratio: f64,
    pending: Option<DataSlice>,
    pending_pos: usize,
    seen_stream_end: bool,
    state: StreamState,
    feedback: ImportFeedback,
}

impl<'s> DeflateProducer<'s> {
    pub fn new(source: Box<dyn BufferProducer + 's>, feedback: ImportFeedback) -> Self {
        DeflateProducer {
            source,
            inflate: Decompress::new(true),
            avg_ratio: INITIAL_RATIO,
            pending: None,
            pending_pos: 0,
            seen_stream_end: false,
            state: StreamState::NotStarted,
            feedback,
        }
    }

    fn finish(&mut self, state: StreamState) {
        self.source.close();
        self.pending = None;
        self.state = state;
    }
}

impl BufferProducer for DeflateProducer<'_> {
    fn produce(&mut self) -> Option<DataSlice> {
        loop {
            // Closed is re-checked every iteration so an early close
            // stops the loop at the next yield point.
            match self.state {
                StreamState::Exhausted | StreamState::Closed | StreamState::Error => return None,
                StreamState::NotStarted => self.state = StreamState::Streaming,
                StreamState::Streaming => {}
            }
            if self.seen_stream_end {
                self.finish(StreamState::Exhausted);
                return None;
            }

            // Make sure there is input to feed.
            let input_exhausted = self
                .pending
                .as_ref()
                .map_or(true, |chunk| self.pending_pos >= chunk.len());
            if input_exhausted {
                match self.source.produce() {
                    Some(chunk) if chunk.is_empty() => continue,
                    Some(chunk) => {
                        self.pending = Some(chunk);
                        self.pending_pos = 0;
                    }
                    None => {
                        // Input ran out before the deflate stream ended.
                        self.feedback.report(ImportError::TruncatedStream);
                        self.finish(StreamState::Error);
                        return None;
                    }
                }
            }

            let chunk = self.pending.clone().expect("pending chunk just ensured");
            let input = &chunk.as_bytes()[self.pending_pos..];
            let estimate = (input.len() as f64 * self.avg_ratio * RATIO_SAFETY) as usize;
            let mut out: Vec<u8> = Vec::with_capacity(estimate.max(MIN_OUT_BUF));

            let in_before = self.inflate.total_in();
            let out_before = self.inflate.total_out();
            let status = match self.inflate.decompress_vec(input, &mut out, FlushDecompress::None)
            {
                Ok(status) => status,
                Err(err) => {
                    self.feedback
                        .report(ImportError::CorruptStream(err.to_string()));
                    self.finish(StreamState::Error);
                    return None;
                }
            };
            let consumed = (self.inflate.total_in() - in_before) as usize;
            let produced = (self.inflate.total_out() - out_before) as usize;
            self.pending_pos += consumed;

            if consumed > 0 && produced > 0 {
                let ratio = produced as f64 / consumed as f64;
                self.avg_ratio = (self.avg_ratio * 9.0 + ratio) / 10.0;
            }
            if status == Status::StreamEnd {
                self.seen_stream_end = true;
            }

            if produced > 0 {
                return Some(DataSlice::from(out));
            }
            if self.pending_pos >= chunk.len() {
                // Chunk fully fed with nothing out yet; pull more input.
                continue;
            }
            // Input remains but the output buffer was too small for even
            // one byte; the estimate is off, grow it and retry.
            self.avg_ratio *= 2.0;
        }
    }

    fn close(&mut self) {
        if self.state != StreamState::Closed {
            self.finish(StreamState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::MemoryProducer;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn marker_wrapped(data: &[u8]) -> Vec<u8> {
        let mut out = b"TRACE:\n".to_vec();
        out.extend_from_slice(&compress(data));
        out
    }

    fn inflate_all(mut producer: DeflateProducer<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = producer.produce() {
            out.extend_from_slice(chunk.as_bytes());
        }
        out
    }

    #[test]
    fn test_payload_offset() {
        assert_eq!(payload_offset(b"TRACE:\nXYZ"), 7);
        assert_eq!(payload_offset(b"TRACE: \r\n\nXYZ"), 10);
        // No marker: payload assumed at the start.
        assert_eq!(payload_offset(b"XYZ"), 0);
    }

    #[test]
    fn test_sniff() {
        let wrapped = marker_wrapped(b"some trace content\nwith lines\n");
        assert!(ZlibExtractor.sniff(&wrapped[..wrapped.len().min(SNIFF_WINDOW)]));

        // Bare compressed stream without the marker line.
        let bare = compress(b"bare stream");
        assert!(ZlibExtractor.sniff(&bare));

        assert!(!ZlibExtractor.sniff(b"# tracer: nop\nplain text trace\n"));
        assert!(!ZlibExtractor.sniff(b"TRACE:\nnot actually compressed data here"));
        // Below the deflate minimum.
        assert!(!ZlibExtractor.sniff(b"TRACE:\n\x78\x9c"));
    }

    #[test]
    fn test_inflate_across_chunk_sizes() {
        let text: Vec<u8> = b"tracing_mark_write: B|1234|frame\n"
            .iter()
            .cycle()
            .copied()
            .take(200_000)
            .collect();
        let compressed = compress(&text);
        for chunk_size in [1, 13, 4096] {
            let feedback = ImportFeedback::new();
            let source = MemoryProducer::from_bytes(&compressed, chunk_size);
            let producer = DeflateProducer::new(Box::new(source), feedback.clone());
            assert_eq!(inflate_all(producer), text, "chunk_size {chunk_size}");
            assert!(!feedback.has_errors());
        }
    }

    #[test]
    fn test_corrupt_stream_reports_and_stops() {
        let mut compressed = compress(b"some payload that is long enough to corrupt");
        let mid = compressed.len() / 2;
        compressed[mid] ^= 0xff;
        compressed[mid + 1] ^= 0xff;

        let feedback = ImportFeedback::new();
        let source = MemoryProducer::from_bytes(&compressed, 8);
        let producer = DeflateProducer::new(Box::new(source), feedback.clone());
        let _ = inflate_all(producer);
        assert!(feedback.has_errors());
    }

    #[test]
    fn test_truncated_stream_reports() {
        let compressed = compress(&vec![b'x'; 50_000]);
        let truncated = &compressed[..compressed.len() / 2];

        let feedback = ImportFeedback::new();
        let source = MemoryProducer::from_bytes(truncated, 512);
        let producer = DeflateProducer::new(Box::new(source), feedback.clone());
        let _ = inflate_all(producer);
        assert_eq!(
            feedback
                .take_errors()
                .iter()
                .filter(|e| matches!(e, ImportError::TruncatedStream))
                .count(),
            1
        );
    }

    #[test]
    fn test_early_close_stops_stream() {
        let compressed = compress(&vec![b'y'; 100_000]);
        let feedback = ImportFeedback::new();
        let source = MemoryProducer::from_bytes(&compressed, 64);
        let mut producer = DeflateProducer::new(Box::new(source), feedback.clone());

        assert!(producer.produce().is_some());
        producer.close();
        producer.close();
        assert!(producer.produce().is_none());
        assert!(!feedback.has_errors());
    }

    #[test]
    fn test_dictionary_stream_reported() {
        // Hand-built zlib header with FDICT set: CMF 0x78, FLG chosen so
        // the pair is a multiple of 31 and bit 5 is set.
        let mut data = vec![0x78u8, 0xbb];
        assert!(has_valid_zlib_header(&data));
        assert!(wants_dictionary(&data));
        data.extend_from_slice(&[0u8; 16]);

        assert!(ZlibExtractor.sniff(&data));

        let feedback = ImportFeedback::new();
        let mut reader = StreamingReader::from_producer(MemoryProducer::from_bytes(&data, 4));
        ZlibExtractor
            .extract(&mut reader, &feedback, &mut |_sub| {
                panic!("dictionary stream must not yield a sub-stream")
            })
            .unwrap();
        assert_eq!(
            feedback
                .take_errors()
                .iter()
                .filter(|e| matches!(e, ImportError::NeedsDictionary))
                .count(),
            1
        );
    }
}
