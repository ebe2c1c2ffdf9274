//! Byte sources: recorded files and live camera sockets.

use crate::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A memory-mapped recording.
pub struct MappedFile {
    mmap: Arc<Mmap>,
    path: PathBuf,
}

impl MappedFile {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file is empty or cannot be opened or mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        if file.metadata()?.len() == 0 {
            return Err(Error::InvalidConfig(format!(
                "{} is empty",
                path.as_ref().display()
            )));
        }
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Path the mapping was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Sequential reader over the mapping; owns a reference to it.
    #[must_use]
    pub fn reader(&self) -> Cursor<SharedMmap> {
        Cursor::new(SharedMmap(Arc::clone(&self.mmap)))
    }
}

/// Shared handle to a mapping, readable through [`Cursor`].
#[derive(Clone)]
pub struct SharedMmap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMmap {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

/// Where the camera bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ByteSource {
    /// A recorded stream on disk.
    File(PathBuf),
    /// Connect to a camera server (Merlin convention).
    TcpClient(SocketAddr),
    /// Listen and accept one camera connection (Cheetah raw destination).
    TcpServer(SocketAddr),
}

/// An opened byte source.
pub struct OpenedSource {
    /// Byte stream to decode.
    pub reader: Box<dyn Read + Send>,
    /// Second handle on a socket, used to unblock its reader on shutdown.
    pub socket: Option<TcpStream>,
    /// True for files, whose read-ahead is gated by scan-line progress.
    pub is_file: bool,
}

impl OpenedSource {
    /// Wraps a connected camera socket.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be configured or cloned.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let socket = stream.try_clone()?;
        Ok(Self {
            reader: Box::new(stream),
            socket: Some(socket),
            is_file: false,
        })
    }

    /// Wraps an arbitrary reader, e.g. an in-memory stream.
    #[must_use]
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            socket: None,
            is_file: false,
        }
    }
}

impl ByteSource {
    /// Opens the source. For [`ByteSource::TcpServer`] this blocks until a
    /// camera connects.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or the socket fails.
    pub fn open(&self) -> Result<OpenedSource> {
        match self {
            ByteSource::File(path) => {
                let file = MappedFile::open(path)?;
                log::info!("reading {} ({} bytes)", path.display(), file.len());
                Ok(OpenedSource {
                    reader: Box::new(file.reader()),
                    socket: None,
                    is_file: true,
                })
            }
            ByteSource::TcpClient(addr) => {
                let stream = TcpStream::connect(addr)?;
                log::info!("connected to camera at {addr}");
                OpenedSource::from_stream(stream)
            }
            ByteSource::TcpServer(addr) => {
                let listener = TcpListener::bind(addr)?;
                accept_camera(&listener)
            }
        }
    }
}

/// Accepts one camera connection on `listener`.
///
/// # Errors
/// Returns an error if accepting or configuring the connection fails.
pub fn accept_camera(listener: &TcpListener) -> Result<OpenedSource> {
    log::info!("waiting for camera on {}", listener.local_addr()?);
    let (stream, peer) = listener.accept()?;
    log::info!("camera connected from {peer}");
    OpenedSource::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;
    use tempfile::NamedTempFile;

    #[test]
    fn test_mapped_file_reader() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let mapped = MappedFile::open(file.path()).unwrap();
        assert_eq!(mapped.len(), 10);
        assert_eq!(&mapped.as_bytes()[..4], b"0123");

        let mut out = String::new();
        let mut reader = mapped.reader();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "0123456789");
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(
            MappedFile::open(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_socket_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"camera bytes").unwrap();
        });

        let mut opened = accept_camera(&listener).unwrap();
        assert!(!opened.is_file);
        assert!(opened.socket.is_some());
        let mut out = Vec::new();
        opened.reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"camera bytes");
        sender.join().unwrap();
    }
}
