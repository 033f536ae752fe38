use std::io::{BufRead, Read};

use crate::qpl::{ArchInfo, FileError};

pub(crate) trait QplRead: Read {
    fn read_u8(&mut self) -> Result<u8, FileError> {
        let mut data = [0u8; 1];
        self.read_exact(&mut data)
            .map_err(|_| FileError::Truncated { what: "byte" })?;
        Ok(data[0])
    }

    /// Read one target word, honoring the architecture's byte order.
    fn read_word(&mut self, arch: ArchInfo) -> Result<u64, FileError> {
        let mut data = vec![0u8; arch.word_size()];
        self.read_exact(&mut data)
            .map_err(|_| FileError::Truncated { what: "word" })?;
        Ok(arch.word_from_bytes(&data))
    }
}

impl<R: Read + ?Sized> QplRead for R {}

pub(crate) trait QplBufRead: QplRead + BufRead {
    /// Read bytes up to and including a NUL terminator; the terminator is
    /// not part of the result. EoF before the terminator is an error.
    fn read_c_string_raw(&mut self) -> Result<Vec<u8>, FileError> {
        let mut buf = Vec::new();
        self.read_until(b'\0', &mut buf)
            .map_err(|_| FileError::Truncated { what: "string" })?;
        if buf.pop() != Some(b'\0') {
            return Err(FileError::Truncated { what: "string" });
        }
        Ok(buf)
    }
}

impl<R: BufRead + ?Sized> QplBufRead for R {}
