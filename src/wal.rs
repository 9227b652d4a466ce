use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// First bytes of every log file. Lets replay refuse a file it didn't write.
const MAGIC: &[u8; 8] = b"SLWAL001";

/// Records larger than this are treated as corruption on replay.
pub(crate) const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little endian.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        // Replay would discard it as a torn tail.
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record of {} bytes exceeds the {MAX_RECORD_LEN}-byte limit", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Why `decode_next` stopped.
enum Tail {
    /// Clean end of file.
    End,
    /// A partial or damaged record; everything before it is good.
    Torn(&'static str),
}

/// Read one record. Anything short of a complete, checksummed, decodable
/// record ends the log.
fn decode_next(reader: &mut impl Read) -> io::Result<Result<Event, Tail>> {
    let mut len_buf = [0u8; 4];
    match read_full(reader, &mut len_buf)? {
        0 => return Ok(Err(Tail::End)),
        4 => {}
        _ => return Ok(Err(Tail::Torn("partial length prefix"))),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Err(Tail::Torn("implausible record length")));
    }

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)? != len {
        return Ok(Err(Tail::Torn("partial payload")));
    }
    let mut crc_buf = [0u8; 4];
    if read_full(reader, &mut crc_buf)? != 4 {
        return Ok(Err(Tail::Torn("partial checksum")));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Err(Tail::Torn("checksum mismatch")));
    }
    Ok(bincode::deserialize::<Event>(&payload).map_err(|_| Tail::Torn("undecodable payload")))
}

/// `read_exact` that reports how far it got instead of failing on EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = file.metadata()?.len() == 0;
    let mut writer = BufWriter::new(file);
    if empty {
        writer.write_all(MAGIC)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    Ok(writer)
}

/// Log position to roll back to when a batch fails part way.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    len: u64,
    appends: u64,
}

/// Append-only event log.
///
/// Layout: an 8-byte magic header followed by framed records (see
/// `encode_record`). A crash can leave a torn last record; replay drops it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    /// Flush and remember the current end of the log.
    pub fn checkpoint(&mut self) -> io::Result<Checkpoint> {
        self.writer.flush()?;
        Ok(Checkpoint {
            len: self.writer.get_ref().metadata()?.len(),
            appends: self.appends_since_compact,
        })
    }

    /// Cut the log back to `cp`, discarding anything buffered or written
    /// since.
    pub fn rollback(&mut self, cp: Checkpoint) -> io::Result<()> {
        // Dropping the old writer may flush a partial record; set_len cuts it.
        self.writer = open_for_append(&self.path)?;
        let file = self.writer.get_ref();
        file.set_len(cp.len)?;
        file.sync_data()?;
        self.appends_since_compact = cp.appends;
        Ok(())
    }

    fn compact_tmp_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp = self.compact_tmp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(MAGIC)?;
            for event in events {
                encode_record(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record. A missing file is an empty log; a file
    /// with someone else's header is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 8];
        match read_full(&mut reader, &mut header)? {
            0 => return Ok(Vec::new()),
            8 if &header == MAGIC => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is not a stayledger log", path.display()),
                ));
            }
        }

        let mut events = Vec::new();
        loop {
            match decode_next(&mut reader)? {
                Ok(event) => events.push(event),
                Err(Tail::End) => break,
                Err(Tail::Torn(reason)) => {
                    warn!(
                        path = %path.display(),
                        recovered = events.len(),
                        reason,
                        "discarding torn WAL tail"
                    );
                    break;
                }
            }
        }
        Ok(events)
    }
}
