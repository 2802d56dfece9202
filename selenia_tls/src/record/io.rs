//! One record at a time, over anything that's `Read + Write` (§4.3, §6's
//! `Transport` note). Writes always use the modern 5-byte header; reads
//! additionally tolerate a legacy SSLv2 header on the very first message a
//! server sees, since some clients still probe with one.

use crate::error::TlsError;
use crate::protocol::{ContentType, ProtocolVersion};
use std::io::{Read, Write};

pub const MAX_RECORD_LEN: usize = 1 << 14;

pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub len: usize,
}

pub struct RecordIO<T: Read + Write> {
    transport: T,
    accept_sslv2_header: bool,
}

impl<T: Read + Write> RecordIO<T> {
    pub fn new(transport: T) -> RecordIO<T> {
        RecordIO {
            transport,
            accept_sslv2_header: true,
        }
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn read_exact_buf(&mut self, n: usize) -> Result<Vec<u8>, TlsError> {
        let mut buf = vec![0u8; n];
        self.transport.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read one record. After the very first call, SSLv2 probing is no
    /// longer accepted (a real client only ever sends one, if any).
    pub fn read_record(&mut self) -> Result<(RecordHeader, Vec<u8>), TlsError> {
        let mut first = [0u8; 1];
        self.transport.read_exact(&mut first)?;

        if self.accept_sslv2_header && first[0] & 0x80 != 0 {
            self.accept_sslv2_header = false;
            let mut second = [0u8; 1];
            self.transport.read_exact(&mut second)?;
            let len = (((first[0] & 0x7F) as usize) << 8) | second[0] as usize;
            let body = self.read_exact_buf(len)?;
            return Ok((
                RecordHeader {
                    content_type: ContentType::Handshake,
                    version: ProtocolVersion::SSL3,
                    len,
                },
                body,
            ));
        }
        self.accept_sslv2_header = false;

        let content_type = ContentType::from_u8(first[0])
            .ok_or_else(|| TlsError::Decode(format!("unknown content type {}", first[0])))?;
        let mut rest = [0u8; 4];
        self.transport.read_exact(&mut rest)?;
        let version = ProtocolVersion::from_bytes([rest[0], rest[1]]);
        let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
        if len > MAX_RECORD_LEN + 256 {
            // +256 tolerates TLS 1.3's inner-content-type/padding overhead on
            // top of the 2^14 plaintext limit; still bounded to stop a
            // malicious peer claiming an unbounded length.
            return Err(TlsError::Decode("record length exceeds maximum".into()));
        }
        let body = self.read_exact_buf(len)?;
        Ok((
            RecordHeader {
                content_type,
                version,
                len,
            },
            body,
        ))
    }

    /// Write one record. `bytes` must already be ≤ the negotiated record
    /// size; RecordLayer is responsible for fragmenting before calling
    /// this.
    pub fn write_record(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        bytes: &[u8],
    ) -> Result<(), TlsError> {
        if bytes.len() > MAX_RECORD_LEN + 256 {
            return Err(TlsError::Internal("record body too large to write".into()));
        }
        let mut header = Vec::with_capacity(5);
        header.push(content_type as u8);
        header.extend_from_slice(&version.to_bytes());
        header.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        self.transport.write_all(&header)?;
        self.transport.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TlsError> {
        self.transport.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Duplex {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }
    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_modern_five_byte_header() {
        let mut io = RecordIO::new(Duplex::default());
        io.write_record(ContentType::Handshake, ProtocolVersion::TLS1_2, b"hi")
            .unwrap();
        let written = &io.transport.written;
        assert_eq!(written[0], 22);
        assert_eq!(&written[1..3], &[3, 3]);
        assert_eq!(&written[3..5], &[0, 2]);
        assert_eq!(&written[5..], b"hi");
    }

    #[test]
    fn reads_modern_record_back() {
        let mut bytes = vec![22u8, 3, 3, 0, 2];
        bytes.extend_from_slice(b"hi");
        let duplex = Duplex {
            read: Cursor::new(bytes),
            written: Vec::new(),
        };
        let mut io = RecordIO::new(duplex);
        let (header, body) = io.read_record().unwrap();
        assert_eq!(header.content_type, ContentType::Handshake);
        assert_eq!(body, b"hi");
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut bytes = vec![22u8, 3, 3, 0xFF, 0xFF];
        bytes.extend(std::iter::repeat(0u8).take(10));
        let duplex = Duplex {
            read: Cursor::new(bytes),
            written: Vec::new(),
        };
        let mut io = RecordIO::new(duplex);
        assert!(io.read_record().is_err());
    }
}
