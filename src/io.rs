//! Content-Length framing over a transport's read and write halves.
//!
//! The reader half is owned by the session I/O thread; the writer half lives
//! behind one mutex and is shared by request handlers (responses) and the
//! interpreter thread (events). Keeping the writer behind a single lock also
//! pins down event/response ordering: whoever holds the lock writes a whole
//! message before anyone else can interleave.

use serde::Serialize;
use std::io::{BufRead, BufReader, Read, Write};

use crate::protocol::{DapEvent, DapRequest, DapResponse, Event};
use crate::tracer::FileTracer;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("DAP connection closed")]
    ConnectionClosed,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("malformed Content-Length header: {0}")]
    InvalidContentLength(#[from] std::num::ParseIntError),
    #[error("malformed DAP message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct DapReader {
    reader: BufReader<Box<dyn Read + Send>>,
    tracer: Option<FileTracer>,
}

impl DapReader {
    pub fn new(reader: Box<dyn Read + Send>, tracer: Option<FileTracer>) -> DapReader {
        DapReader {
            reader: BufReader::new(reader),
            tracer,
        }
    }

    /// Block for the next framed request.
    pub fn read_message(&mut self) -> Result<DapRequest, CodecError> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(CodecError::ConnectionClosed);
            }
            if let Some(tracer) = &self.tracer {
                tracer.write(line.as_bytes());
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse()?);
            }
        }

        let len = content_length.ok_or(CodecError::MissingContentLength)?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        if let Some(tracer) = &self.tracer {
            tracer.write(&buf);
        }
        let req: DapRequest = serde_json::from_slice(&buf)?;
        log::debug!("{}: {}", req.seq, req.command);
        Ok(req)
    }
}

pub struct DapWriter {
    writer: Box<dyn Write + Send>,
    tracer: Option<FileTracer>,
    seq: i64,
}

impl DapWriter {
    pub fn new(writer: Box<dyn Write + Send>, tracer: Option<FileTracer>) -> DapWriter {
        DapWriter {
            writer,
            tracer,
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn write_message<T: Serialize>(&mut self, msg: &T) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        if let Some(tracer) = &self.tracer {
            tracer.write(header.as_bytes());
            tracer.write(&payload);
        }
        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Success response without a body.
    pub fn respond_success(&mut self, req: &DapRequest) -> Result<(), CodecError> {
        log::debug!("success {}: {}", req.seq, req.command);
        let seq = self.next_seq();
        self.write_message(&DapResponse {
            seq,
            r#type: "response",
            request_seq: req.seq,
            success: true,
            command: req.command.clone(),
            message: None,
            body: None,
        })
    }

    /// Success response carrying `body`.
    pub fn respond_body<T: Serialize>(
        &mut self,
        req: &DapRequest,
        body: &T,
    ) -> Result<(), CodecError> {
        log::debug!("success {}: {}", req.seq, req.command);
        let seq = self.next_seq();
        self.write_message(&DapResponse {
            seq,
            r#type: "response",
            request_seq: req.seq,
            success: true,
            command: req.command.clone(),
            message: None,
            body: Some(serde_json::to_value(body)?),
        })
    }

    pub fn respond_error(
        &mut self,
        req: &DapRequest,
        error: impl Into<String>,
    ) -> Result<(), CodecError> {
        let error = error.into();
        log::debug!("error {}: {error}", req.seq);
        let seq = self.next_seq();
        self.write_message(&DapResponse {
            seq,
            r#type: "response",
            request_seq: req.seq,
            success: false,
            command: req.command.clone(),
            message: Some(error),
            body: None,
        })
    }

    pub fn send_event(&mut self, event: Event) -> Result<(), CodecError> {
        let (name, body) = event.into_parts()?;
        log::debug!("event: {name}");
        let seq = self.next_seq();
        self.write_message(&DapEvent {
            seq,
            r#type: "event",
            event: name,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ThreadEventBody;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn frame(json: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{json}", json.len()).into_bytes()
    }

    #[test]
    fn reads_framed_request() {
        let bytes = frame(r#"{"seq":1,"type":"request","command":"initialize"}"#);
        let mut reader = DapReader::new(Box::new(Cursor::new(bytes)), None);
        let req = reader.read_message().unwrap();
        assert_eq!(req.seq, 1);
        assert_eq!(req.command, "initialize");
    }

    #[test]
    fn eof_reports_connection_closed() {
        let mut reader = DapReader::new(Box::new(Cursor::new(Vec::new())), None);
        assert!(matches!(
            reader.read_message(),
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[test]
    fn missing_content_length_is_an_error() {
        let mut reader = DapReader::new(Box::new(Cursor::new(b"\r\n".to_vec())), None);
        assert!(matches!(
            reader.read_message(),
            Err(CodecError::MissingContentLength)
        ));
    }

    #[test]
    fn writer_frames_and_numbers_messages() {
        let buf = SharedBuf::default();
        let mut writer = DapWriter::new(Box::new(buf.clone()), None);
        writer
            .send_event(Event::Thread(ThreadEventBody {
                reason: "started",
                thread_id: 1,
            }))
            .unwrap();
        writer.send_event(Event::Terminated).unwrap();

        let bytes = buf.0.lock().unwrap().clone();
        let text = String::from_utf8(bytes).unwrap();
        let mut reader = DapReader::new(Box::new(Cursor::new(text.into_bytes())), None);
        // Events are not requests, so pull the frames apart as raw JSON.
        let mut messages = Vec::new();
        while let Some(message) = read_raw(&mut reader) {
            messages.push(message);
        }
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["seq"], 1);
        assert_eq!(messages[0]["event"], "thread");
        assert_eq!(messages[0]["body"]["threadId"], 1);
        assert_eq!(messages[1]["seq"], 2);
        assert_eq!(messages[1]["event"], "terminated");
        assert!(messages[1].get("body").is_none());
    }

    fn read_raw(reader: &mut DapReader) -> Option<serde_json::Value> {
        let mut content_length = None;
        loop {
            let mut line = String::new();
            if reader.reader.read_line(&mut line).ok()? == 0 {
                return None;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse::<usize>().ok()?);
            }
        }
        let mut buf = vec![0u8; content_length?];
        reader.reader.read_exact(&mut buf).ok()?;
        serde_json::from_slice(&buf).ok()
    }
}
