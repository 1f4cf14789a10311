//! Log-pair ownership and the consumption state machine.
//!
//! A `LogStore` owns the three file handles of one queue directory:
//!
//! ```text
//! {dir}/
//!   push      ← enqueued records, append-only
//!   pop       ← fixed-size delete markers, append-only
//!   .bkp/     ← rotated pairs, named push{TS} / pop{TS}
//! ```
//!
//! Every method here mutates handle or cursor state and must run under the
//! queue-wide write guard; the serializer worker, the scanners and the
//! flusher all take that guard before calling in.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::warn;
use time::OffsetDateTime;

use crate::record::{self, HEADER_SIZE, MARKER_SIZE};
use crate::{Error, Result};

pub(crate) const PUSH_FILE: &str = "push";
pub(crate) const POP_FILE: &str = "pop";
pub(crate) const BACKUP_DIR: &str = ".bkp";

/// Default rotation threshold: rotate once the cursor has drained past this
/// many bytes of push log.
pub const DEFAULT_MAX_SIZE: u64 = 100_000_000;

pub(crate) struct LogStore {
    dir: PathBuf,
    push_fh: Option<File>,
    pop_fh: Option<File>,
    read_fh: Option<File>,
    /// Next byte to read from the push log. Always points at the start of a
    /// valid record or at end-of-file.
    pub(crate) read_offset: u64,
    pub(crate) max_size: u64,
    pub(crate) push_rec_nro: u64,
    pub(crate) pop_rec_nro: u64,
}

impl LogStore {
    /// Create the directory layout, open the log pair and recover the
    /// cursor from the pop-log tail.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: directory creation or file open failed
    /// - `Error::CorruptTail`: the last delete marker is unreadable
    pub fn open(dir: &Path, max_size: u64) -> Result<Self> {
        create_dir_0766(dir)?;
        create_dir_0766(&dir.join(BACKUP_DIR))?;

        let mut store = Self {
            dir: dir.to_path_buf(),
            push_fh: None,
            pop_fh: None,
            read_fh: None,
            read_offset: 0,
            max_size,
            push_rec_nro: 0,
            pop_rec_nro: 0,
        };
        store.open_handles()?;
        store.read_offset = store.recover_offset()?;
        Ok(store)
    }

    fn open_handles(&mut self) -> Result<()> {
        let pop_path = self.dir.join(POP_FILE);
        let push_path = self.dir.join(PUSH_FILE);
        self.pop_fh = Some(open_append(&pop_path)?);
        self.push_fh = Some(open_append(&push_path)?);
        // Independent read-only handle so consumer seeks never disturb the
        // append position.
        self.read_fh = Some(File::open(&push_path)?);
        Ok(())
    }

    /// Release all handles. Idempotent.
    pub fn close(&mut self) {
        self.push_fh = None;
        self.read_fh = None;
        self.pop_fh = None;
    }

    fn push_fh(&mut self) -> Result<&mut File> {
        self.push_fh.as_mut().ok_or(Error::Closed)
    }

    fn pop_fh(&mut self) -> Result<&mut File> {
        self.pop_fh.as_mut().ok_or(Error::Closed)
    }

    fn read_fh(&mut self) -> Result<&mut File> {
        self.read_fh.as_mut().ok_or(Error::Closed)
    }

    /// Recover the cursor from the last delete marker.
    ///
    /// An empty pop log means nothing was ever consumed; anything else must
    /// end in a parsable marker or the queue is unusable until repaired.
    fn recover_offset(&mut self) -> Result<u64> {
        let pop = self.pop_fh()?;
        let size = pop.seek(SeekFrom::End(0))?;
        if size == 0 {
            return Ok(0);
        }
        if size < MARKER_SIZE as u64 {
            return Err(Error::CorruptTail("pop log shorter than one marker"));
        }
        pop.seek(SeekFrom::End(-(MARKER_SIZE as i64)))?;
        let mut frame = [0u8; MARKER_SIZE];
        pop.read_exact(&mut frame)
            .map_err(|_| Error::CorruptTail("short read at pop log tail"))?;
        let (offset, _crc_push) = record::decode_marker(&frame).map_err(|err| match err {
            Error::CrcMismatch { .. } => Error::CorruptTail("last marker crc mismatch"),
            _ => Error::CorruptTail("last marker unparsable"),
        })?;
        Ok(offset)
    }

    /// Append one record to the push log.
    ///
    /// The handle is in append mode, so the kernel maintains the write
    /// position; no seek is issued.
    pub fn push(&mut self, payload: &[u8]) -> Result<()> {
        let frame = record::encode_push(payload)?;
        self.push_fh()?.write_all(&frame)?;
        self.push_rec_nro += 1;
        Ok(())
    }

    /// Consume the record at the cursor.
    ///
    /// Returns `Ok(None)` when the push log is drained. Hitting the drained
    /// state with the cursor past `max_size` triggers rotation; the next pop
    /// then starts from offset zero.
    pub fn pop(&mut self) -> Result<Option<Vec<u8>>> {
        let offset = self.read_offset;
        self.read_fh()?.seek(SeekFrom::Start(offset))?;

        let (stored_len, crc) = match record::decode_header(self.read_fh()?)? {
            Some(fields) => fields,
            None => {
                if self.read_offset > self.max_size {
                    self.rotate()?;
                }
                return Ok(None);
            }
        };
        let mut payload = record::decode_payload(self.read_fh()?, stored_len, crc)?;
        payload.pop(); // framing newline

        let new_offset = offset + (HEADER_SIZE + stored_len) as u64;
        let marker = record::encode_marker(new_offset, crc);
        self.pop_fh()?.write_all(&marker)?;

        self.read_offset = new_offset;
        self.pop_rec_nro += 1;
        Ok(Some(payload))
    }

    /// Archive the current log pair and restart with empty files.
    ///
    /// Rename failures are non-fatal; compression runs detached and is
    /// best-effort. Only a failed reopen is fatal, since the queue then has
    /// no handles left to continue with.
    pub fn rotate(&mut self) -> Result<()> {
        self.close();

        let stamp = archive_stamp(OffsetDateTime::now_utc());
        let bkp = self.dir.join(BACKUP_DIR);
        let pop_src = self.dir.join(POP_FILE);
        let push_src = self.dir.join(PUSH_FILE);
        let pop_dst = bkp.join(format!("{POP_FILE}{stamp}"));
        let push_dst = bkp.join(format!("{PUSH_FILE}{stamp}"));

        if let Err(err) = std::fs::rename(&pop_src, &pop_dst) {
            warn!("rotation: rename {} failed: {err}", pop_src.display());
        }
        if let Err(err) = std::fs::rename(&push_src, &push_dst) {
            warn!("rotation: rename {} failed: {err}", push_src.display());
        }

        compress_archive(&pop_dst);
        compress_archive(&push_dst);

        self.open_handles()?;
        self.read_offset = 0;
        self.push_rec_nro = 0;
        self.pop_rec_nro = 0;
        Ok(())
    }

    /// Decode up to `n` records from the cursor without consuming them.
    ///
    /// A clean empty scan with the cursor past `max_size` triggers rotation,
    /// mirroring the drained-pop path.
    pub fn head(&mut self, n: usize) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        if n == 0 {
            return Ok(out);
        }
        let offset = self.read_offset;
        self.read_fh()?.seek(SeekFrom::Start(offset))?;
        while out.len() < n {
            match self.next_scanned()? {
                Some(payload) => out.push(payload),
                None => break,
            }
        }
        if out.is_empty() && self.read_offset > self.max_size {
            self.rotate()?;
        }
        Ok(out)
    }

    /// Scan from the cursor keeping only the last `n` payloads.
    pub fn tail(&mut self, n: usize) -> Result<Vec<Vec<u8>>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let offset = self.read_offset;
        self.read_fh()?.seek(SeekFrom::Start(offset))?;
        let mut window = VecDeque::new();
        while let Some(payload) = self.next_scanned()? {
            if window.len() == n {
                window.pop_front();
            }
            window.push_back(payload);
        }
        Ok(window.into())
    }

    /// Iterate every record from the start of the push log, consumed or not.
    ///
    /// Each entry pairs the byte offset immediately after the record (the
    /// same value a delete marker would carry) with its payload.
    pub fn scan(&mut self) -> Result<Vec<(u64, Vec<u8>)>> {
        self.read_fh()?.seek(SeekFrom::Start(0))?;
        let mut out = Vec::new();
        let mut offset = 0u64;
        loop {
            let (stored_len, crc) = match record::decode_header(self.read_fh()?)? {
                Some(fields) => fields,
                None => break,
            };
            let mut payload = record::decode_payload(self.read_fh()?, stored_len, crc)?;
            payload.pop();
            offset += (HEADER_SIZE + stored_len) as u64;
            out.push((offset, payload));
        }
        Ok(out)
    }

    fn next_scanned(&mut self) -> Result<Option<Vec<u8>>> {
        let (stored_len, crc) = match record::decode_header(self.read_fh()?)? {
            Some(fields) => fields,
            None => return Ok(None),
        };
        let mut payload = record::decode_payload(self.read_fh()?, stored_len, crc)?;
        payload.pop();
        Ok(Some(payload))
    }

    /// `fsync` both write handles. A no-op once closed.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(fh) = &self.pop_fh {
            fh.sync_all()?;
        }
        if let Some(fh) = &self.push_fh {
            fh.sync_all()?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?)
}

#[cfg(unix)]
fn create_dir_0766(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o766)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir_0766(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

fn archive_stamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Launch the external compressor against an archived log.
///
/// The queue never waits on compression; a missing compressor only leaves
/// the archive uncompressed. The child is supervised by a detached thread so
/// a nonzero exit still surfaces in the logs.
fn compress_archive(path: &Path) {
    match Command::new("gzip").arg(path).spawn() {
        Ok(mut child) => {
            let path = path.to_path_buf();
            std::thread::spawn(move || match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("gzip {} exited with {status}", path.display()),
                Err(err) => warn!("gzip {} wait failed: {err}", path.display()),
            });
        }
        Err(err) => warn!("gzip {} spawn failed: {err}", path.display()),
    }
}
