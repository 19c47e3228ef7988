//! Byte sources
//!
//! The lexer pulls raw bytes through a small reader contract that tags
//! each chunk with the source position of its first byte. Two
//! implementations: a file-backed reader for the driver and an in-memory
//! reader for tests and tooling.

use crate::CompileError;
use crate::pos::SourcePos;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Pull-based byte reader with position tagging.
///
/// `read` fills as much of `buf` as it can and returns the number of
/// bytes written together with the position of the first byte written.
/// A return of zero bytes means end of input. The position of a chunk's
/// later bytes is recovered by advancing the returned position over the
/// chunk contents.
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, SourcePos), CompileError>;
}

/// Byte source backed by a file handle.
#[derive(Debug)]
pub struct FileSource {
    reader: BufReader<File>,
    pos: SourcePos,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, CompileError> {
        let file = File::open(path)
            .map_err(|e| CompileError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(FileSource {
            reader: BufReader::new(file),
            pos: SourcePos::start(&path.display().to_string()),
        })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, SourcePos), CompileError> {
        let start = self.pos.clone();
        let n = self
            .reader
            .read(buf)
            .map_err(|e| CompileError::Io(format!("{}: {}", start.file, e)))?;
        for &b in &buf[..n] {
            self.pos.advance(b);
        }
        Ok((n, start))
    }
}

/// Byte source over an in-memory buffer.
pub struct StringSource {
    data: Vec<u8>,
    offset: usize,
    pos: SourcePos,
}

impl StringSource {
    pub fn new(file: &str, text: &str) -> Self {
        StringSource {
            data: text.as_bytes().to_vec(),
            offset: 0,
            pos: SourcePos::start(file),
        }
    }
}

impl ByteSource for StringSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<(usize, SourcePos), CompileError> {
        let start = self.pos.clone();
        let rest = &self.data[self.offset..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        for &b in &rest[..n] {
            self.pos.advance(b);
        }
        self.offset += n;
        Ok((n, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_string_source_reads_all() {
        let mut src = StringSource::new("t.c", "ab\ncd");
        let mut buf = [0u8; 3];
        let (n, pos) = src.read(&mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..n], b"ab\n");
        assert_eq!((pos.line, pos.col), (1, 1));

        let (n, pos) = src.read(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"cd");
        assert_eq!((pos.line, pos.col), (2, 1));

        let (n, _) = src.read(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_file_source() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "int x;\n").unwrap();
        let mut src = FileSource::open(tmp.path()).unwrap();
        let mut buf = [0u8; 64];
        let (n, pos) = src.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"int x;\n");
        assert_eq!((pos.line, pos.col), (1, 1));
    }

    #[test]
    fn test_file_source_missing() {
        let err = FileSource::open(Path::new("/nonexistent/zz.c")).unwrap_err();
        match err {
            CompileError::Io(msg) => assert!(msg.contains("zz.c")),
            other => panic!("expected Io error, got {:?}", other),
        }
    }
}
