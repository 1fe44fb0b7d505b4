use std::io::{self, Write};

use super::{FrameSink, FrameWriter, WorkerMessage};

/// `io::Write` adapter that frames every written line as a status message.
///
/// A worker's stderr is its error channel, so its log output goes to stdout
/// as `STA` lines instead. Partial lines are held until the next newline or
/// until the writer is dropped.
pub struct StatusLineWriter<W: Write> {
    frames: FrameWriter<W, io::Sink>,
    pending: Vec<u8>,
}

impl StatusLineWriter<io::Stdout> {
    /// Writer over the process's stdout, for use as a `tracing` writer.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> StatusLineWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            frames: FrameWriter::new(out, io::sink()),
            pending: Vec::new(),
        }
    }

    fn emit_line(&mut self, line: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end();
        if text.is_empty() {
            return Ok(());
        }
        self.frames.emit(WorkerMessage::Status(text.to_string()))
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut self.pending);
        self.emit_line(&rest)
    }
}

impl<W: Write> Write for StatusLineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.emit_line(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Drop for StatusLineWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lines_become_status_frames() {
        let mut out = Vec::new();
        {
            let mut writer = StatusLineWriter::new(&mut out);
            writer.write_all(b"INFO Loaded sample\nWARN par").unwrap();
            writer.write_all(b"tial line\n\n").unwrap();
            writer.write_all(b"trailing").unwrap();
        }

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "STA INFO Loaded sample\nSTA WARN partial line\nSTA trailing\n"
        );
    }

    #[test]
    fn test_status_frames_decode_as_status() {
        let mut out = Vec::new();
        {
            let mut writer = StatusLineWriter::new(&mut out);
            writeln!(writer, "DEBUG step 2 of 5").unwrap();
        }
        let line = String::from_utf8(out).unwrap();
        assert_eq!(
            crate::worker::decode_stdout(crate::worker::OperationKind::Run, line.trim_end())
                .unwrap(),
            WorkerMessage::Status("DEBUG step 2 of 5".to_string())
        );
    }
}
