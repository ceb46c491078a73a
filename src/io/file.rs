// src/io/file.rs
//
// File replay transport: reads a captured byte dump as if it were a link.
// End of file is reported as a disconnect ("end of stream").

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::error::TransportError;
use super::transport::{Connector, Transport};

pub struct FileTransport {
    name: String,
    reader: Mutex<BufReader<File>>,
    closed: AtomicBool,
}

impl FileTransport {
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| TransportError::open(&name, e))?;
        Ok(Self {
            name,
            reader: Mutex::new(BufReader::new(file)),
            closed: AtomicBool::new(false),
        })
    }
}

impl Transport for FileTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_exact(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::closed(&self.name));
        }
        let mut reader = match self.reader.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        reader.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => TransportError::disconnected(&self.name),
            _ => TransportError::io(&self.name, e),
        })
    }

    fn write_all(&self, _bytes: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::io(
            &self.name,
            std::io::Error::new(ErrorKind::Unsupported, "replay files are read-only"),
        ))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opens capture files by path.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileConnector;

impl Connector for FileConnector {
    fn open(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(FileTransport::open(Path::new(name))?))
    }
}

// ============================================================================
// Tests
// ============================================================================
