use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Length prefix + CRC trailer around each payload.
const FRAME_OVERHEAD: u64 = 8;

/// Larger length prefixes can only come from a damaged header.
const MAX_PAYLOAD_LEN: u32 = 1 << 20;

fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on EOF before the buffer fills.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next frame and its on-disk size. `None` at end of log, and at a
/// torn or corrupt frame (everything after it is unreachable).
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_PAYLOAD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, u64::from(len) + FRAME_OVERHEAD))),
        Err(_) => Ok(None),
    }
}

/// Append-only write-ahead log of ledger events.
///
/// Each record is `[u32 le: len][bincode: Event][u32 le: crc32(payload)]`.
/// Appends are staged in memory and reach the file only in
/// [`Wal::flush_sync`], which either makes the whole batch durable or leaves
/// the file as it was.
pub struct Wal {
    file: File,
    path: PathBuf,
    staged: Vec<u8>,
    staged_count: u64,
    appends_since_compact: u64,
    /// Set when a failed batch could not be rolled back. The file may end in
    /// a partial frame, so no further appends are accepted.
    broken: bool,
    #[cfg(test)]
    fail_next_flush_after: Option<usize>,
}

impl Wal {
    /// Open (or create) the log and return every intact record in it.
    ///
    /// A torn or corrupt tail, as left by a crash mid-write, is cut off so the
    /// next append lands directly after the last good record.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = Self::scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                path = %path.display(),
                dropped_bytes = on_disk - valid_len,
                "truncating damaged WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::from_file(file, path), events))
    }

    fn from_file(file: File, path: &Path) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            staged: Vec::new(),
            staged_count: 0,
            appends_since_compact: 0,
            broken: false,
            #[cfg(test)]
            fail_next_flush_after: None,
        }
    }

    /// Read-only replay; the file is left untouched.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.0)
    }

    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some((event, size)) = read_frame(&mut reader)? {
            events.push(event);
            valid_len += size;
        }
        Ok((events, valid_len))
    }

    /// Stage one record. Nothing is written until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.staged, event)?;
        self.staged_count += 1;
        Ok(())
    }

    /// Drop every staged record without writing it.
    pub fn discard_staged(&mut self) {
        self.staged.clear();
        self.staged_count = 0;
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Write and fsync the staged records as one batch.
    ///
    /// On failure the file is truncated back to its length before the batch,
    /// so no record of a failed batch survives a restart. If that truncation
    /// fails too the log refuses all later appends.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.broken {
            self.discard_staged();
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        if self.staged.is_empty() {
            return Ok(());
        }
        let committed_len = match self.file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.discard_staged();
                return Err(e);
            }
        };

        let written = self.write_staged().and_then(|()| self.file.sync_data());
        let count = self.staged_count;
        self.discard_staged();
        match written {
            Ok(()) => {
                self.appends_since_compact += count;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self
                    .file
                    .set_len(committed_len)
                    .and_then(|()| self.file.sync_all())
                {
                    self.broken = true;
                    return Err(io::Error::other(format!(
                        "{e}; rolling back to {committed_len} bytes failed: {rollback}"
                    )));
                }
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    records = count,
                    "WAL batch failed and was rolled back"
                );
                Err(e)
            }
        }
    }

    #[cfg(not(test))]
    fn write_staged(&mut self) -> io::Result<()> {
        self.file.write_all(&self.staged)
    }

    #[cfg(test)]
    fn write_staged(&mut self) -> io::Result<()> {
        match self.fail_next_flush_after.take() {
            Some(bytes) => {
                let bytes = bytes.min(self.staged.len());
                self.file.write_all(&self.staged[..bytes])?;
                Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"))
            }
            None => self.file.write_all(&self.staged),
        }
    }

    /// The next flush writes only `bytes` of its batch and then fails.
    #[cfg(test)]
    pub fn fail_next_flush_after(&mut self, bytes: usize) {
        self.fail_next_flush_after = Some(bytes);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write `events` to the sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReservationStatus, reservation};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentwell_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(asset: Ulid) -> Event {
        Event::ReservationCreated {
            reservation: reservation(asset, 0, 86_400_000, ReservationStatus::Pending),
        }
    }

    fn approved(event: &Event) -> Event {
        let Event::ReservationCreated { reservation } = event else {
            panic!("expected a creation event");
        };
        Event::StatusChanged {
            id: reservation.id,
            asset_id: reservation.asset_id,
            from: ReservationStatus::Pending,
            to: ReservationStatus::Active,
        }
    }

    #[test]
    fn append_and_reopen() {
        let path = tmp_path("append_and_reopen.wal");
        let first = created(Ulid::new());
        let events = vec![first.clone(), approved(&first)];
        {
            let (mut wal, replayed) = Wal::open(&path).unwrap();
            assert!(replayed.is_empty());
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let (_wal, replayed) = Wal::open(&path).unwrap();
        assert_eq!(replayed, events);
    }

    #[test]
    fn torn_tail_is_cut_off_before_new_appends() {
        let path = tmp_path("torn_tail.wal");
        let first = created(Ulid::new());
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        // Half a frame header plus junk, as if the process died mid-write
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first.clone()]);

        let second = created(Ulid::new());
        {
            let (mut wal, replayed) = Wal::open(&path).unwrap();
            assert_eq!(replayed, vec![first.clone()]);
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        let event = created(Ulid::new());
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let asset = Ulid::new();
        let churn: Vec<Event> = (0..10).map(|_| created(asset)).collect();
        let kept = created(asset);
        let later = approved(&kept);
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &churn {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 10);
            let before = fs::metadata(&path).unwrap().len();

            wal.compact(std::slice::from_ref(&kept)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
    }

    #[test]
    fn buffered_appends_durable_after_flush() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|_| created(Ulid::new())).collect();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn failed_batch_leaves_no_trace() {
        let path = tmp_path("failed_batch.wal");
        let kept = created(Ulid::new());
        let later = created(Ulid::new());
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            let committed = fs::metadata(&path).unwrap().len();

            wal.append_buffered(&created(Ulid::new())).unwrap();
            wal.append_buffered(&created(Ulid::new())).unwrap();
            // First record lands whole, the second is torn
            wal.fail_next_flush_after(committed as usize + 10);
            let err = wal.flush_sync().unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::StorageFull);
            assert_eq!(fs::metadata(&path).unwrap().len(), committed);
            assert_eq!(wal.appends_since_compact(), 1);

            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
    }

    #[test]
    fn discarded_records_are_never_written() {
        let path = tmp_path("discarded.wal");
        let kept = created(Ulid::new());
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append_buffered(&created(Ulid::new())).unwrap();
            wal.discard_staged();
            wal.append(&kept).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
    }
}
