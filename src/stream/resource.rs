//! The OS resources a [`Stream`](super::Stream) can own.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// One owned byte resource.
pub(crate) enum Resource {
    File(File),
    Pipe(File),
    Tcp(TcpStream),
    Unix(UnixStream),
    Stdin(io::Stdin),
    Stdout(io::Stdout),
    Stderr(io::Stderr),
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Resource::File(_) => "File",
            Resource::Pipe(_) => "Pipe",
            Resource::Tcp(_) => "Tcp",
            Resource::Unix(_) => "Unix",
            Resource::Stdin(_) => "Stdin",
            Resource::Stdout(_) => "Stdout",
            Resource::Stderr(_) => "Stderr",
        };
        f.debug_tuple(kind).field(&self.as_raw_fd()).finish()
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("{what} is not supported"))
}

impl Resource {
    /// Regular files are the only seekable resources.
    pub(crate) fn is_seekable(&self) -> bool {
        match self {
            Resource::File(file) => file.metadata().map(|m| m.is_file()).unwrap_or(false),
            _ => false,
        }
    }

    /// Length in bytes for regular files.
    pub(crate) fn len(&self) -> Option<u64> {
        match self {
            Resource::File(file) => file
                .metadata()
                .ok()
                .filter(|m| m.is_file())
                .map(|m| m.len()),
            _ => None,
        }
    }

    pub(crate) fn position(&mut self) -> io::Result<u64> {
        match self {
            Resource::File(file) => file.stream_position(),
            _ => Err(unsupported("position")),
        }
    }

    pub(crate) fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Resource::File(file) => file.seek(pos),
            _ => Err(unsupported("seek")),
        }
    }

    /// Flush buffered writes and, for regular files, sync data to disk.
    pub(crate) fn sync(&mut self) -> io::Result<()> {
        match self {
            Resource::File(file) => {
                file.flush()?;
                if file.metadata()?.is_file() {
                    file.sync_data()?;
                }
                Ok(())
            }
            other => other.flush(),
        }
    }

    /// Shut down socket resources before they are dropped.
    pub(crate) fn shutdown(&self) -> io::Result<()> {
        let result = match self {
            Resource::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Resource::Unix(stream) => stream.shutdown(Shutdown::Both),
            _ => Ok(()),
        };

        match result {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    pub(crate) fn tcp(&self) -> Option<&TcpStream> {
        match self {
            Resource::Tcp(stream) => Some(stream),
            _ => None,
        }
    }

    pub(crate) fn unix(&self) -> Option<&UnixStream> {
        match self {
            Resource::Unix(stream) => Some(stream),
            _ => None,
        }
    }
}

impl AsRawFd for Resource {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Resource::File(file) | Resource::Pipe(file) => file.as_raw_fd(),
            Resource::Tcp(stream) => stream.as_raw_fd(),
            Resource::Unix(stream) => stream.as_raw_fd(),
            Resource::Stdin(stdin) => stdin.as_raw_fd(),
            Resource::Stdout(stdout) => stdout.as_raw_fd(),
            Resource::Stderr(stderr) => stderr.as_raw_fd(),
        }
    }
}

impl Read for Resource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Resource::File(file) | Resource::Pipe(file) => file.read(buf),
            Resource::Tcp(stream) => stream.read(buf),
            Resource::Unix(stream) => stream.read(buf),
            Resource::Stdin(stdin) => stdin.read(buf),
            Resource::Stdout(_) | Resource::Stderr(_) => Err(unsupported("reading stdout")),
        }
    }
}

impl Write for Resource {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Resource::File(file) | Resource::Pipe(file) => file.write(buf),
            Resource::Tcp(stream) => stream.write(buf),
            Resource::Unix(stream) => stream.write(buf),
            Resource::Stdout(stdout) => stdout.write(buf),
            Resource::Stderr(stderr) => stderr.write(buf),
            Resource::Stdin(_) => Err(unsupported("writing stdin")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Resource::File(file) | Resource::Pipe(file) => file.flush(),
            Resource::Tcp(stream) => stream.flush(),
            Resource::Unix(stream) => stream.flush(),
            Resource::Stdout(stdout) => stdout.flush(),
            Resource::Stderr(stderr) => stderr.flush(),
            Resource::Stdin(_) => Ok(()),
        }
    }
}
