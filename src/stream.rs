//! Lease-heartbeating stream wrappers.
//!
//! Thin decorators over a byte stream that heartbeat the lease before every
//! operation, so a long-running transfer (say, writing a large log file to
//! shared storage) keeps its lock alive without a separate timer thread.
//! A lease failure turns into an `std::io::Error`, ending the transfer at
//! the exact operation where ownership was lost.

use crate::lock::Lock;
use std::io::{self, Read, Write};

/// Reader that renews the lease before every read.
pub struct LockedReader<'a, R: Read> {
    inner: R,
    lock: &'a Lock<'a>,
}

impl<'a, R: Read> LockedReader<'a, R> {
    pub fn new(inner: R, lock: &'a Lock<'a>) -> Self {
        Self { inner, lock }
    }

    /// Unwrap back into the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for LockedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock.heartbeat().map_err(io::Error::other)?;
        self.inner.read(buf)
    }
}

/// Writer that renews the lease before every write and flush.
pub struct LockedWriter<'a, W: Write> {
    inner: W,
    lock: &'a Lock<'a>,
}

impl<'a, W: Write> LockedWriter<'a, W> {
    pub fn new(inner: W, lock: &'a Lock<'a>) -> Self {
        Self { inner, lock }
    }

    /// Unwrap back into the underlying writer. Flush first if the buffered
    /// content matters.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LockedWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock.heartbeat().map_err(io::Error::other)?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock.heartbeat().map_err(io::Error::other)?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LockBus;
    use crate::config::BusConfig;
    use crate::lock::Lock as Lease;
    use std::io::{Cursor, copy};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> BusConfig {
        BusConfig {
            expiry_offset_ms: 50,
            out_of_date_margin_ms: 100,
            max_poll_interval_ms: 50,
            poll_slice_ms: 10,
            replay_trials: 3,
            replay_cooldown_ms: 10,
            publish_retries: 5,
            publish_backoff_ms: 5,
            publish_backoff_cap_ms: 40,
            retain_min_events: 4,
            unreadable_max_age_ms: 200,
            gc_interval_ms: 25,
        }
    }

    #[test]
    fn test_locked_writer_passes_data_through() {
        let temp_dir = TempDir::new().unwrap();
        let bus = LockBus::open(temp_dir.path().join("bus"), test_config()).unwrap();
        let lease = Lease::acquire(&bus, "log-1", 5000).unwrap();

        let mut writer = LockedWriter::new(Vec::new(), &lease);
        writer.write_all(b"hello lease").unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.into_inner(), b"hello lease");
        assert!(lease.is_alive());
    }

    #[test]
    fn test_locked_reader_passes_data_through() {
        let temp_dir = TempDir::new().unwrap();
        let bus = LockBus::open(temp_dir.path().join("bus"), test_config()).unwrap();
        let lease = Lease::acquire(&bus, "log-2", 5000).unwrap();

        let mut reader = LockedReader::new(Cursor::new(b"payload".to_vec()), &lease);
        let mut sink = Vec::new();
        copy(&mut reader, &mut sink).unwrap();

        assert_eq!(sink, b"payload");
    }

    #[test]
    fn test_transfer_keeps_short_lease_alive() {
        let temp_dir = TempDir::new().unwrap();
        let bus = LockBus::open(temp_dir.path().join("bus"), test_config()).unwrap();
        // Short lease: the transfer below outlives it unless every write
        // heartbeats.
        let lease = Lease::acquire(&bus, "log-3", 120).unwrap();

        let mut writer = LockedWriter::new(Vec::new(), &lease);
        for _ in 0..10 {
            writer.write_all(b"chunk").unwrap();
            std::thread::sleep(Duration::from_millis(25));
        }

        assert!(lease.is_alive());
        assert_eq!(writer.into_inner().len(), 50);
    }

    #[test]
    fn test_expired_lease_turns_into_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let bus = LockBus::open(temp_dir.path().join("bus"), test_config()).unwrap();
        let lease = Lease::acquire(&bus, "log-4", 60).unwrap();

        // Let the lease run out without a single heartbeat.
        std::thread::sleep(Duration::from_millis(150));

        let mut writer = LockedWriter::new(Vec::new(), &lease);
        let err = writer.write_all(b"too late").unwrap_err();
        assert!(err.to_string().contains("expired"));

        let mut reader = LockedReader::new(Cursor::new(b"x".to_vec()), &lease);
        let mut sink = Vec::new();
        assert!(reader.read_to_end(&mut sink).is_err());
    }
}
