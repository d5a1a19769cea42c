use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// A frame read off a Carbon connection.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum Frame {
    /// A complete line, without its line ending.
    Line(String),

    /// A line longer than the maximum line length. Its contents are discarded.
    Oversized,
}

/// Splits a Carbon stream into lines.
///
/// `LinesCodec` reports an over-long line as an error, which ends a `FramedRead` stream. This framing yields
/// `Frame::Oversized` instead, and decoding resumes after the next newline.
pub(super) struct LineFraming {
    inner: LinesCodec,
}

impl LineFraming {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_length),
        }
    }
}

impl Decoder for LineFraming {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        into_frame(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        into_frame(self.inner.decode_eof(src))
    }
}

fn into_frame(result: Result<Option<String>, LinesCodecError>) -> io::Result<Option<Frame>> {
    match result {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
        Err(LinesCodecError::Io(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(framing: &mut LineFraming, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = framing.decode(buf).unwrap() {
            frames.push(frame);
        }
        while let Some(frame) = framing.decode_eof(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn oversized_line_does_not_end_framing() {
        let mut framing = LineFraming::new(8);
        let mut buf = BytesMut::from("s 1 1\nthis line is far too long\nok 1 1\r\n");

        let frames = decode_all(&mut framing, &mut buf);
        assert_eq!(
            frames,
            vec![
                Frame::Line("s 1 1".to_string()),
                Frame::Oversized,
                Frame::Line("ok 1 1".to_string()),
            ]
        );
    }

    #[test]
    fn oversized_line_split_across_reads() {
        let mut framing = LineFraming::new(4);
        let mut buf = BytesMut::from("aaaaaaaa");
        assert_eq!(framing.decode(&mut buf).unwrap(), Some(Frame::Oversized));
        assert_eq!(framing.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"aaaa\nb 1\n");
        assert_eq!(framing.decode(&mut buf).unwrap(), Some(Frame::Line("b 1".to_string())));
    }

    #[test]
    fn final_line_without_newline() {
        let mut framing = LineFraming::new(16);
        let mut buf = BytesMut::from("a 1 1\nb 2 2");
        assert_eq!(
            decode_all(&mut framing, &mut buf),
            vec![Frame::Line("a 1 1".to_string()), Frame::Line("b 2 2".to_string())]
        );
    }
}
