use std::{
    collections::HashMap,
    fmt,
    fs::{self, File, OpenOptions},
    path::PathBuf,
    sync::Arc,
};

use core_types::Record;
use log::warn;
use parking_lot::Mutex;

use crate::{
    codec,
    error::{Result, SegmentError},
};

const SEGMENT_EXT: &str = "seg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentRole {
    Active,
    Frozen,
}

impl SegmentRole {
    pub fn suffix(self) -> &'static str {
        match self {
            SegmentRole::Active => "active",
            SegmentRole::Frozen => "frozen",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "active" => Some(SegmentRole::Active),
            "frozen" => Some(SegmentRole::Frozen),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Identity of a segment's backing storage. The generation changes on
/// every rotation; the role does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentId {
    pub stream: String,
    pub generation: u64,
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:06}", self.stream, self.generation)
    }
}

struct SegmentFile {
    path: PathBuf,
    writer: Option<File>,
    sealed: bool,
    row_count: u64,
    len: u64,
}

struct SegmentInner {
    id: SegmentId,
    role: SegmentRole,
    file: Mutex<SegmentFile>,
}

/// Shared reference to one segment. Stale after the segment is renamed
/// or dropped: appends through a stale handle fail with
/// [`SegmentError::SegmentNotFound`].
#[derive(Clone)]
pub struct SegmentHandle {
    inner: Arc<SegmentInner>,
}

impl SegmentHandle {
    pub fn id(&self) -> &SegmentId {
        &self.inner.id
    }

    pub fn stream(&self) -> &str {
        &self.inner.id.stream
    }

    pub fn role(&self) -> SegmentRole {
        self.inner.role
    }

    pub fn row_count(&self) -> u64 {
        self.inner.file.lock().row_count
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.file.lock().sealed
    }

    /// Append one record. Serialized with rename on the segment's file
    /// lock: once a rename seals the segment this fails, so a record is
    /// never silently written to an identity that has already rotated.
    pub fn append(&self, record: &Record) -> Result<()> {
        let mut file = self.inner.file.lock();
        if file.sealed {
            return Err(SegmentError::SegmentNotFound {
                segment: self.inner.id.to_string(),
            });
        }
        let writer = file.writer.as_mut().ok_or_else(|| SegmentError::SegmentNotFound {
            segment: self.inner.id.to_string(),
        })?;
        let frame = codec::encode_record(record);
        if let Err(err) = std::io::Write::write_all(writer, &frame) {
            // Roll back a possible partial frame so the file stays
            // scannable after a transient write failure.
            let len = file.len;
            if let Some(w) = file.writer.as_mut() {
                if let Err(trunc_err) = w.set_len(len) {
                    warn!(
                        "segment {}: failed to truncate partial frame: {}",
                        self.inner.id, trunc_err
                    );
                }
            }
            return Err(err.into());
        }
        file.len += frame.len() as u64;
        file.row_count += 1;
        Ok(())
    }

    /// Read the full contents. Takes the file lock so the snapshot is
    /// consistent with in-flight appends; restartable.
    pub fn scan(&self) -> Result<Vec<Record>> {
        let file = self.inner.file.lock();
        let mut reader = File::open(&file.path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SegmentError::SegmentNotFound {
                    segment: self.inner.id.to_string(),
                }
            } else {
                SegmentError::Io(err)
            }
        })?;
        codec::read_all(&mut reader, &self.inner.id.to_string())
    }
}

impl fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .finish()
    }
}

struct StoreInner {
    segments: HashMap<(String, SegmentRole), Arc<SegmentInner>>,
    generations: HashMap<String, u64>,
}

/// Registry of segments per `(stream, role)` plus their on-disk files.
///
/// Segment identities are mutated only through the store (the rotation
/// coordinator); writers hold handles and append.
pub struct SegmentStore {
    root: PathBuf,
    inner: Mutex<StoreInner>,
}

impl SegmentStore {
    /// Open the store, re-registering any segment files that survived a
    /// previous run. A frozen segment left behind by a failed rotation
    /// cycle is recovered here, not discarded.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut segments = HashMap::new();
        let mut generations: HashMap<String, u64> = HashMap::new();

        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let stream = entry.file_name().to_string_lossy().into_owned();
            for seg_entry in fs::read_dir(entry.path())? {
                let seg_entry = seg_entry?;
                let name = seg_entry.file_name().to_string_lossy().into_owned();
                let Some((generation, role)) = parse_segment_name(&name) else {
                    continue;
                };
                let id = SegmentId {
                    stream: stream.clone(),
                    generation,
                };
                let key = (stream.clone(), role);
                if segments.contains_key(&key) {
                    return Err(SegmentError::Corrupt {
                        segment: id.to_string(),
                        detail: format!("duplicate {role} segment for stream {stream}"),
                    });
                }
                let inner = open_existing(seg_entry.path(), id.clone(), role)?;
                segments.insert(key, inner);
                let max = generations.entry(stream.clone()).or_default();
                *max = (*max).max(generation);
            }
        }

        Ok(Self {
            root,
            inner: Mutex::new(StoreInner {
                segments,
                generations,
            }),
        })
    }

    fn segment_path(&self, stream: &str, generation: u64, role: SegmentRole) -> PathBuf {
        self.root
            .join(stream)
            .join(format!("{:06}.{}.{}", generation, role.suffix(), SEGMENT_EXT))
    }

    /// Create a fresh segment under a new generation for `(stream, role)`.
    pub fn create_segment(&self, stream: &str, role: SegmentRole) -> Result<SegmentHandle> {
        let mut inner = self.inner.lock();
        let key = (stream.to_string(), role);
        if inner.segments.contains_key(&key) {
            return Err(SegmentError::AlreadyExists {
                stream: stream.to_string(),
                role,
            });
        }
        let generation = inner.generations.entry(stream.to_string()).or_default();
        *generation += 1;
        let generation = *generation;
        let path = self.segment_path(stream, generation, role);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(&path)?;
        codec::write_header(&mut file)?;
        file.sync_data()?;
        let len = codec::SEGMENT_HEADER_SIZE as u64;
        let segment = Arc::new(SegmentInner {
            id: SegmentId {
                stream: stream.to_string(),
                generation,
            },
            role,
            file: Mutex::new(SegmentFile {
                path,
                writer: Some(file),
                sealed: role == SegmentRole::Frozen,
                row_count: 0,
                len,
            }),
        });
        inner.segments.insert(key, segment.clone());
        Ok(SegmentHandle { inner: segment })
    }

    /// Atomically move the `(stream, from)` segment to the `to` role.
    ///
    /// The segment is sealed under its file lock before the filesystem
    /// rename, so a concurrent append either completed beforehand (its
    /// record travels with the file) or observes the seal and fails with
    /// `SegmentNotFound` for the caller to buffer and retry.
    pub fn rename(&self, stream: &str, from: SegmentRole, to: SegmentRole) -> Result<SegmentHandle> {
        let mut inner = self.inner.lock();
        let from_key = (stream.to_string(), from);
        let to_key = (stream.to_string(), to);
        if inner.segments.contains_key(&to_key) {
            return Err(SegmentError::AlreadyExists {
                stream: stream.to_string(),
                role: to,
            });
        }
        let segment = inner
            .segments
            .get(&from_key)
            .cloned()
            .ok_or_else(|| SegmentError::SegmentNotFound {
                segment: format!("{stream}/{from}"),
            })?;

        let new_path = self.segment_path(stream, segment.id.generation, to);
        let (row_count, len) = {
            let mut file = segment.file.lock();
            file.sealed = true;
            if let Err(err) = fs::rename(&file.path, &new_path) {
                file.sealed = false;
                return Err(err.into());
            }
            if let Some(writer) = file.writer.take() {
                if let Err(err) = writer.sync_data() {
                    warn!("segment {}: sync after rename failed: {}", segment.id, err);
                }
            }
            file.path = new_path.clone();
            (file.row_count, file.len)
        };

        let renamed = Arc::new(SegmentInner {
            id: segment.id.clone(),
            role: to,
            file: Mutex::new(SegmentFile {
                path: new_path,
                writer: None,
                sealed: true,
                row_count,
                len,
            }),
        });
        inner.segments.remove(&from_key);
        inner.segments.insert(to_key, renamed.clone());
        Ok(SegmentHandle { inner: renamed })
    }

    /// Irreversibly delete a frozen segment and its backing file.
    pub fn drop_segment(&self, handle: &SegmentHandle) -> Result<()> {
        if handle.role() == SegmentRole::Active {
            return Err(SegmentError::NotFrozen {
                segment: handle.id().to_string(),
            });
        }
        let mut inner = self.inner.lock();
        let key = (handle.stream().to_string(), handle.role());
        match inner.segments.get(&key) {
            Some(current) if Arc::ptr_eq(current, &handle.inner) => {
                let path = handle.inner.file.lock().path.clone();
                inner.segments.remove(&key);
                fs::remove_file(path)?;
                Ok(())
            }
            _ => Err(SegmentError::SegmentNotFound {
                segment: handle.id().to_string(),
            }),
        }
    }

    /// Current handle for `(stream, role)`, if one is registered.
    pub fn handle(&self, stream: &str, role: SegmentRole) -> Option<SegmentHandle> {
        let inner = self.inner.lock();
        inner
            .segments
            .get(&(stream.to_string(), role))
            .map(|segment| SegmentHandle {
                inner: segment.clone(),
            })
    }
}

fn parse_segment_name(name: &str) -> Option<(u64, SegmentRole)> {
    let mut parts = name.split('.');
    let generation = parts.next()?.parse().ok()?;
    let role = SegmentRole::from_suffix(parts.next()?)?;
    if parts.next()? != SEGMENT_EXT || parts.next().is_some() {
        return None;
    }
    Some((generation, role))
}

fn open_existing(path: PathBuf, id: SegmentId, role: SegmentRole) -> Result<Arc<SegmentInner>> {
    // Full read validates the header and every frame before the segment
    // rejoins the registry.
    let mut reader = File::open(&path)?;
    let records = codec::read_all(&mut reader, &id.to_string())?;
    let row_count = records.len() as u64;
    let len = fs::metadata(&path)?.len();
    let writer = match role {
        SegmentRole::Active => Some(OpenOptions::new().read(true).append(true).open(&path)?),
        SegmentRole::Frozen => None,
    };
    Ok(Arc::new(SegmentInner {
        id,
        role,
        file: Mutex::new(SegmentFile {
            path,
            writer,
            sealed: role == SegmentRole::Frozen,
            row_count,
            len,
        }),
    }))
}
