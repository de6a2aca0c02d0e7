use std::io::Write;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::codec::FrameCodec;
use crate::error::TransportError;
use crate::traffic::{Direction, Tap};

/// Cloneable handle that serialises whole frames onto the outbound stream.
///
/// Writers on any thread share one lock, so frames are never interleaved and
/// a frame is either written in full or the write reports an error.
#[derive(Clone)]
pub struct FrameWriter {
    output: Arc<Mutex<Box<dyn Write + Send>>>,
    codec: FrameCodec,
    tap: Option<Tap>,
}

impl FrameWriter {
    pub fn new(output: impl Write + Send + 'static) -> Self {
        Self::with_codec(output, FrameCodec::new())
    }

    pub fn with_codec(output: impl Write + Send + 'static, codec: FrameCodec) -> Self {
        Self {
            output: Arc::new(Mutex::new(Box::new(output))),
            codec,
            tap: None,
        }
    }

    pub fn set_tap(&mut self, tap: Option<Tap>) {
        self.tap = tap;
    }

    #[tracing::instrument(skip(self), level = "trace")]
    pub fn write_frame(&self, payload: &str) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        self.codec.clone().encode(payload, &mut buf)?;

        tracing::trace!("taking writer lock");
        let mut output = self
            .output
            .lock()
            .map_err(|_| std::io::Error::other("writer mutex poisoned"))?;
        if let Some(tap) = &self.tap {
            tap.record(Direction::Outbound, payload);
        }
        output.write_all(&buf)?;
        output.flush()?;
        tracing::trace!("releasing writer lock");
        Ok(())
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::reader::FrameReader;

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

    #[test]
    fn concurrent_writers_never_interleave_frames() {
        let sink = SharedBuf::default();
        let writer = FrameWriter::new(sink.clone());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let writer = writer.clone();
                thread::spawn(move || {
                    for j in 0..25 {
                        writer.write_frame(&format!("writer-{i}-frame-{j}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let bytes = sink.0.lock().unwrap().clone();
        let mut reader = FrameReader::new(std::io::Cursor::new(bytes));
        let mut count = 0;
        while let Some(payload) = reader.read_frame().unwrap() {
            assert!(payload.starts_with("writer-"));
            count += 1;
        }
        assert_eq!(count, 100);
    }
}
