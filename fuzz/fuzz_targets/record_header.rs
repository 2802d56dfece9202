#![no_main]

use libfuzzer_sys::fuzz_target;
use selenia_tls::record::io::RecordIO;
use std::io::Cursor;

#[derive(Default)]
struct ReadOnly {
    read: Cursor<Vec<u8>>,
}

impl std::io::Read for ReadOnly {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read.read(buf)
    }
}
impl std::io::Write for ReadOnly {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let transport = ReadOnly {
        read: Cursor::new(data.to_vec()),
    };
    let mut io = RecordIO::new(transport);
    // Drain as many records as the input has; this exercises both the
    // legacy SSLv2 probe path (first call only) and the modern 5-byte
    // header path, plus the oversized-length rejection.
    while io.read_record().is_ok() {}
});
