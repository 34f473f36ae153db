//! DAP message framing: `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//!
//! The read and write halves are separate, requests are read by the protocol loop while
//! events are written from the session event pump.

use crate::dap::protocol::{DapEvent, DapRequest, DapResponse};
use crate::dap::tracer::FileTracer;
use crate::error::Error;
use crate::utils::lock;
use log::{trace, warn};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

const CONTENT_LENGTH: &str = "Content-Length:";
/// Larger frames are rejected without reading the body.
const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

pub struct FrameReader {
    reader: Box<dyn BufRead + Send>,
    tracer: Option<FileTracer>,
}

impl FrameReader {
    pub fn new(reader: impl BufRead + Send + 'static, tracer: Option<FileTracer>) -> Self {
        Self {
            reader: Box::new(reader),
            tracer,
        }
    }

    /// Read next message. Returns `Ok(None)` when the client closed the stream.
    ///
    /// A frame with a bad header is consumed up to the header end and reported as
    /// [`Error::Frame`], the reader stays usable.
    pub fn read_frame(&mut self) -> Result<Option<Value>, Error> {
        let mut content_length: Option<Result<usize, String>> = None;
        let mut malformed = None;
        let mut in_header = false;

        loop {
            let mut raw = vec![];
            if self.reader.read_until(b'\n', &mut raw)? == 0 {
                if in_header {
                    warn!(target: "dap", "stream closed inside a frame header");
                }
                return Ok(None);
            }
            let Ok(line) = std::str::from_utf8(&raw) else {
                in_header = true;
                malformed = Some("header is not valid UTF-8".to_string());
                continue;
            };
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if in_header {
                    break;
                }
                continue;
            }
            in_header = true;

            // a header glued to the tail of a broken body is still found
            if let Some(pos) = line.find(CONTENT_LENGTH) {
                let value = line[pos + CONTENT_LENGTH.len()..].trim();
                content_length = Some(
                    value
                        .parse()
                        .map_err(|_| format!("bad Content-Length `{value}`"))
                        .and_then(|len| {
                            if len > MAX_CONTENT_LENGTH {
                                Err(format!("Content-Length {len} exceeds {MAX_CONTENT_LENGTH}"))
                            } else {
                                Ok(len)
                            }
                        }),
                );
            }
        }

        if let Some(msg) = malformed {
            return Err(Error::Frame(msg));
        }
        let len = match content_length {
            Some(Ok(len)) => len,
            Some(Err(msg)) => return Err(Error::Frame(msg)),
            None => return Err(Error::Frame("missing Content-Length".to_string())),
        };

        let mut buf = vec![0u8; len];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let text = String::from_utf8_lossy(&buf);
        trace!(target: "dap", "<- {text}");
        if let Some(tracer) = &self.tracer {
            tracer.traffic("<-", &text);
        }
        Ok(Some(serde_json::from_slice(&buf)?))
    }
}

/// Serializes outgoing messages and stamps them with a monotonic `seq`.
pub struct FrameWriter {
    writer: Mutex<Box<dyn Write + Send>>,
    seq: AtomicI64,
    tracer: Option<FileTracer>,
}

impl FrameWriter {
    pub fn new(writer: impl Write + Send + 'static, tracer: Option<FileTracer>) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            seq: AtomicI64::new(1),
            tracer,
        }
    }

    pub fn send_response(
        &self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> Result<(), Error> {
        self.write(|seq| DapResponse {
            seq,
            r#type: "response",
            request_seq: req.seq,
            success,
            command: &req.command,
            message,
            body,
        })
    }

    pub fn send_event(&self, event: &'static str, body: Option<Value>) -> Result<(), Error> {
        self.write(|seq| DapEvent {
            seq,
            r#type: "event",
            event,
            body,
        })
    }

    /// Seq is taken under the writer lock, so it grows in the order of the stream.
    fn write<T: Serialize>(&self, message: impl FnOnce(i64) -> T) -> Result<(), Error> {
        let mut writer = lock(&self.writer);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_vec(&message(seq))?;

        let text = String::from_utf8_lossy(&payload);
        trace!(target: "dap", "-> {text}");
        if let Some(tracer) = &self.tracer {
            tracer.traffic("->", &text);
        }

        write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok(())
    }
}

pub fn tcp(stream: TcpStream, tracer: Option<FileTracer>) -> io::Result<(FrameReader, FrameWriter)> {
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    Ok((
        FrameReader::new(reader, tracer.clone()),
        FrameWriter::new(stream, tracer),
    ))
}

pub fn stdio(tracer: Option<FileTracer>) -> (FrameReader, FrameWriter) {
    (
        FrameReader::new(BufReader::new(io::stdin()), tracer.clone()),
        FrameWriter::new(io::stdout(), tracer),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Arc;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{body}", body.len())
    }

    fn reader(input: String) -> FrameReader {
        FrameReader::new(Cursor::new(input.into_bytes()), None)
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_frames() {
        let body = r#"{"seq":1,"type":"request","command":"initialize"}"#;
        let mut r = reader(frame(body) + &frame(r#"{"seq":2}"#));
        assert_eq!(r.read_frame().unwrap().unwrap()["command"], "initialize");
        assert_eq!(r.read_frame().unwrap().unwrap()["seq"], 2);
        assert!(r.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_extra_headers_and_utf8() {
        let body = r#"{"expression":"привет"}"#;
        let input = format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let msg = reader(input).read_frame().unwrap().unwrap();
        assert_eq!(msg["expression"], "привет");
    }

    #[test]
    fn test_bad_header_is_recoverable() {
        let input = "Content-Length: abc\r\n\r\n".to_string() + &frame(r#"{"seq":5}"#);
        let mut r = reader(input);
        assert!(matches!(r.read_frame(), Err(Error::Frame(_))));
        assert_eq!(r.read_frame().unwrap().unwrap()["seq"], 5);
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let input = "Content-Length: 18446744073709551615\r\n\r\n".to_string()
            + &format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1)
            + &frame(r#"{"seq":6}"#);
        let mut r = reader(input);
        assert!(matches!(r.read_frame(), Err(Error::Frame(_))));
        assert!(matches!(r.read_frame(), Err(Error::Frame(_))));
        assert_eq!(r.read_frame().unwrap().unwrap()["seq"], 6);
    }

    #[test]
    fn test_invalid_utf8_header_is_not_fatal() {
        let mut input = b"Content-Length: 2\xff\r\n\r\n".to_vec();
        input.extend_from_slice(frame(r#"{"seq":7}"#).as_bytes());
        let mut r = FrameReader::new(Cursor::new(input), None);

        let err = r.read_frame().unwrap_err();
        assert!(matches!(err, Error::Frame(_)));
        assert!(!err.is_fatal());
        assert_eq!(r.read_frame().unwrap().unwrap()["seq"], 7);
    }

    #[test]
    fn test_missing_length_and_bad_json() {
        let mut r = reader("X-Header: 1\r\n\r\n".to_string() + &frame("{oops"));
        assert!(matches!(r.read_frame(), Err(Error::Frame(_))));
        let err = r.read_frame().unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_truncated_body_is_eof() {
        let mut r = reader("Content-Length: 100\r\n\r\n{\"seq\":".to_string());
        assert!(r.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_writer_sequence() {
        let buf = SharedBuf::default();
        let writer = FrameWriter::new(buf.clone(), None);
        let req: DapRequest =
            serde_json::from_value(json!({"seq": 4, "type": "request", "command": "threads"}))
                .unwrap();
        writer.send_event("initialized", None).unwrap();
        writer
            .send_response(&req, true, None, Some(json!({"threads": []})))
            .unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let mut r = reader(out);
        let event = r.read_frame().unwrap().unwrap();
        assert_eq!(event, json!({"seq": 1, "type": "event", "event": "initialized"}));
        let rsp = r.read_frame().unwrap().unwrap();
        assert_eq!(rsp["seq"], 2);
        assert_eq!(rsp["request_seq"], 4);
        assert_eq!(rsp["command"], "threads");
        assert_eq!(rsp["body"]["threads"], json!([]));
    }
}
