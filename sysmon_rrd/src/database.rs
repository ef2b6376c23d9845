//! Round-robin database file: a fixed header followed by one circular buffer per tier.
//!
//! Layout (big-endian):
//!
//! ```text
//! magic "SRRD" | version u32 | aggregation u32 | xff f32 | max_retention u64 | last_update i64
//! | archive_count u32 | archive_count * (offset u64, step u32, points u32)
//! | archive 0 points | archive 1 points | ...   (each point: timestamp i64, value f64)
//! ```
//!
//! A slot is known only when its stored timestamp equals the interval being asked for and
//! its value is not NaN. Unknown consolidated points are written as NaN.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use tracing::debug;

use crate::aggregation::Aggregation;
use crate::archive::{validate_archives, ArchiveSpec};
use crate::error::{RrdError, Result};

const MAGIC: &[u8; 4] = b"SRRD";
const VERSION: u32 = 1;
const FIXED_HEADER_LEN: u64 = 4 + 4 + 4 + 4 + 8 + 8 + 4;
const LAST_UPDATE_OFFSET: u64 = 4 + 4 + 4 + 4 + 8;
const ARCHIVE_INFO_LEN: u64 = 8 + 4 + 4;
const POINT_LEN: u64 = 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveInfo {
    pub offset: u64,
    pub spec: ArchiveSpec,
}

impl ArchiveInfo {
    fn slot(&self, interval: i64) -> u64 {
        interval
            .div_euclid(self.spec.step as i64)
            .rem_euclid(self.spec.points as i64) as u64
    }

    fn slot_offset(&self, slot: u64) -> u64 {
        self.offset + slot * POINT_LEN
    }

    fn align(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.spec.step as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub aggregation: Aggregation,
    pub xff: f32,
    pub max_retention: i64,
    pub last_update: i64,
    pub archives: Vec<ArchiveInfo>,
}

impl Header {
    fn new(archives: &[ArchiveSpec], xff: f32, aggregation: Aggregation) -> Self {
        let mut offset = FIXED_HEADER_LEN + ARCHIVE_INFO_LEN * archives.len() as u64;
        let archives = archives
            .iter()
            .map(|spec| {
                let info = ArchiveInfo {
                    offset,
                    spec: *spec,
                };
                offset += spec.points as u64 * POINT_LEN;
                info
            })
            .collect::<Vec<_>>();
        Header {
            aggregation,
            xff,
            max_retention: archives.last().map(|a| a.spec.retention()).unwrap_or(0),
            last_update: 0,
            archives,
        }
    }

    fn file_len(&self) -> u64 {
        self.archives
            .last()
            .map(|a| a.offset + a.spec.points as u64 * POINT_LEN)
            .unwrap_or(FIXED_HEADER_LEN)
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(
            (FIXED_HEADER_LEN + ARCHIVE_INFO_LEN * self.archives.len() as u64) as usize,
        );
        buf.put_slice(MAGIC);
        buf.put_u32(VERSION);
        buf.put_u32(self.aggregation.code());
        buf.put_f32(self.xff);
        buf.put_u64(self.max_retention as u64);
        buf.put_i64(self.last_update);
        buf.put_u32(self.archives.len() as u32);
        for a in &self.archives {
            buf.put_u64(a.offset);
            buf.put_u32(a.spec.step);
            buf.put_u32(a.spec.points);
        }
        buf
    }

    fn decode(path: &Path, file: &mut File) -> Result<Self> {
        let mut fixed = [0u8; FIXED_HEADER_LEN as usize];
        file.read_exact(&mut fixed)
            .map_err(|_| RrdError::corrupt(path, "truncated header"))?;
        let mut buf = &fixed[..];

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(RrdError::corrupt(path, "bad magic"));
        }
        let version = buf.get_u32();
        if version != VERSION {
            return Err(RrdError::corrupt(path, format!("unsupported version {version}")));
        }
        let code = buf.get_u32();
        let aggregation = Aggregation::from_code(code)
            .ok_or_else(|| RrdError::corrupt(path, format!("unknown aggregation code {code}")))?;
        let xff = buf.get_f32();
        let max_retention = buf.get_u64() as i64;
        let last_update = buf.get_i64();
        let count = buf.get_u32() as u64;

        let len = file.metadata().map_err(|e| RrdError::io(path, e))?.len();
        if FIXED_HEADER_LEN + count * ARCHIVE_INFO_LEN > len {
            return Err(RrdError::corrupt(
                path,
                format!("archive table of {count} entries does not fit in {len} bytes"),
            ));
        }
        let count = count as usize;

        let mut infos = vec![0u8; count * ARCHIVE_INFO_LEN as usize];
        file.read_exact(&mut infos)
            .map_err(|_| RrdError::corrupt(path, "truncated archive table"))?;
        let mut buf = &infos[..];
        let mut archives = Vec::with_capacity(count);
        for _ in 0..count {
            archives.push(ArchiveInfo {
                offset: buf.get_u64(),
                spec: ArchiveSpec {
                    step: buf.get_u32(),
                    points: buf.get_u32(),
                },
            });
        }
        let specs: Vec<ArchiveSpec> = archives.iter().map(|a| a.spec).collect();
        validate_archives(&specs).map_err(|e| RrdError::corrupt(path, e.to_string()))?;

        Ok(Header {
            aggregation,
            xff,
            max_retention,
            last_update,
            archives,
        })
    }
}

/// What an update did. Rejections are outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Stored in this tier and consolidated into every coarser one.
    Written { tier: usize },
    /// At or before the last accepted timestamp.
    Stale,
    /// Older than the coarsest tier can hold.
    OutOfRange,
}

#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    file: File,
    header: Header,
}

impl Database {
    /// Create a database at `path`. An existing file is opened untouched unless `overwrite`.
    pub fn create(
        path: impl AsRef<Path>,
        archives: &[ArchiveSpec],
        xff: f32,
        aggregation: Aggregation,
        overwrite: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        validate_archives(archives)?;
        if !(0.0..=1.0).contains(&xff) {
            return Err(RrdError::InvalidXff(xff));
        }
        if path.exists() && !overwrite {
            return Self::open(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RrdError::io(parent, e))?;
        }
        let header = Header::new(archives, xff, aggregation);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| RrdError::io(path, e))?;
        file.write_all(&header.encode())
            .and_then(|_| file.set_len(header.file_len()))
            .map_err(|e| RrdError::io(path, e))?;
        debug!(
            path = %path.display(),
            archives = archives.len(),
            bytes = header.file_len(),
            "created round-robin database"
        );

        Ok(Database {
            path: path.to_path_buf(),
            file,
            header,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| RrdError::io(path, e))?;
        let header = Header::decode(path, &mut file)?;
        let len = file
            .metadata()
            .map_err(|e| RrdError::io(path, e))?
            .len();
        if len < header.file_len() {
            return Err(RrdError::corrupt(
                path,
                format!("file is {len} bytes, header needs {}", header.file_len()),
            ));
        }
        Ok(Database {
            path: path.to_path_buf(),
            file,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &Header {
        &self.header
    }

    /// Store `value` at `ts` (seconds since epoch), judged against the wall clock.
    pub fn update(&mut self, value: f64, ts: i64) -> Result<UpdateOutcome> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(ts);
        self.update_at(value, ts, now)
    }

    /// Store `value` at `ts`, routing it to the finest tier whose span covers `now - ts`.
    pub fn update_at(&mut self, value: f64, ts: i64, now: i64) -> Result<UpdateOutcome> {
        if ts <= self.header.last_update {
            return Ok(UpdateOutcome::Stale);
        }
        let age = now - ts;
        if age >= self.header.max_retention {
            return Ok(UpdateOutcome::OutOfRange);
        }
        let Some(tier) = self
            .header
            .archives
            .iter()
            .position(|a| a.spec.retention() > age)
        else {
            return Ok(UpdateOutcome::OutOfRange);
        };

        let archive = self.header.archives[tier];
        self.write_point(&archive, archive.align(ts), value)?;
        for lower in tier + 1..self.header.archives.len() {
            self.propagate(lower - 1, lower, ts)?;
        }

        self.header.last_update = ts;
        let mut buf = BytesMut::with_capacity(8);
        buf.put_i64(ts);
        self.write_at(LAST_UPDATE_OFFSET, &buf)?;
        Ok(UpdateOutcome::Written { tier })
    }

    /// The stored value for the interval of `tier` that contains `ts`.
    pub fn point(&self, tier: usize, ts: i64) -> Result<Option<f64>> {
        let archive = *self
            .header
            .archives
            .get(tier)
            .ok_or(RrdError::NoSuchTier(tier))?;
        let interval = archive.align(ts);
        let slots = self.read_run(&archive, interval, 1)?;
        Ok(slots
            .first()
            .filter(|(t, v)| *t == interval && !v.is_nan())
            .map(|(_, v)| *v))
    }

    // Recompute the `lower` point enclosing `ts` from the points of `higher`.
    fn propagate(&mut self, higher: usize, lower: usize, ts: i64) -> Result<()> {
        let hi = self.header.archives[higher];
        let lo = self.header.archives[lower];
        let lo_interval = lo.align(ts);
        let n = (lo.spec.step / hi.spec.step) as usize;

        let slots = self.read_run(&hi, lo_interval, n)?;
        let known: Vec<f64> = slots
            .iter()
            .enumerate()
            .filter(|(i, (t, v))| *t == lo_interval + *i as i64 * hi.spec.step as i64 && !v.is_nan())
            .map(|(_, (_, v))| *v)
            .collect();

        let ratio = known.len() as f32 / n as f32;
        let value = if !known.is_empty() && ratio >= self.header.xff {
            self.header.aggregation.apply(&known).unwrap_or(f64::NAN)
        } else {
            f64::NAN
        };
        self.write_point(&lo, lo_interval, value)
    }

    fn write_point(&mut self, archive: &ArchiveInfo, interval: i64, value: f64) -> Result<()> {
        let mut buf = BytesMut::with_capacity(POINT_LEN as usize);
        buf.put_i64(interval);
        buf.put_f64(value);
        self.write_at(archive.slot_offset(archive.slot(interval)), &buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(data))
            .map_err(|e| RrdError::io(&self.path, e))
    }

    // Read `n` consecutive slots starting at the slot of `interval`, wrapping at the end.
    fn read_run(&self, archive: &ArchiveInfo, interval: i64, n: usize) -> Result<Vec<(i64, f64)>> {
        let points = archive.spec.points as u64;
        let start = archive.slot(interval);
        let n = (n as u64).min(points);
        let first = n.min(points - start);

        let mut raw = vec![0u8; (n * POINT_LEN) as usize];
        let (head, tail) = raw.split_at_mut((first * POINT_LEN) as usize);
        let mut file = &self.file;
        file.seek(SeekFrom::Start(archive.slot_offset(start)))
            .and_then(|_| file.read_exact(head))
            .map_err(|e| RrdError::io(&self.path, e))?;
        if !tail.is_empty() {
            file.seek(SeekFrom::Start(archive.offset))
                .and_then(|_| file.read_exact(tail))
                .map_err(|e| RrdError::io(&self.path, e))?;
        }

        let mut buf = &raw[..];
        let mut out = Vec::with_capacity(n as usize);
        while buf.has_remaining() {
            out.push((buf.get_i64(), buf.get_f64()));
        }
        Ok(out)
    }
}
