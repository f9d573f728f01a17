//! On-disk index format.
//!
//! Two companion files live next to the configured index path:
//! - `<name>.index`: `DAVI` magic, format version (u32 LE), dimension (u32 LE),
//!   vector count (u64 LE), then `count * dimension` f32 LE values.
//! - `<name>.data`: JSON manifest with the model id, counts, a SHA-256 of the
//!   vector payload, the corpus fingerprint and the ordered chunk list.
//!
//! Both halves are written to uniquely named `.part` siblings and renamed
//! into place while an exclusive lock on `<name>.lock` is held. Loading
//! checks every field against the other half and fails closed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::RetrievalError;
use super::index::VectorIndex;
use super::types::Chunk;

const MAGIC: &[u8; 4] = b"DAVI";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub data: PathBuf,
    pub lock: PathBuf,
}

impl IndexPaths {
    pub fn for_base(base: &Path) -> Self {
        Self {
            vectors: base.with_extension("index"),
            data: base.with_extension("data"),
            lock: base.with_extension("lock"),
        }
    }

    pub fn both_exist(&self) -> bool {
        self.vectors.is_file() && self.data.is_file()
    }

    pub fn any_exists(&self) -> bool {
        self.vectors.exists() || self.data.exists()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexManifest {
    format_version: u32,
    model_id: String,
    dimension: usize,
    count: usize,
    vectors_sha256: String,
    #[serde(default)]
    corpus_fingerprint: String,
    built_at: DateTime<Utc>,
    chunks: Vec<Chunk>,
}

/// Manifest fields without the chunk list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub format_version: u32,
    pub model_id: String,
    pub dimension: usize,
    pub count: usize,
    pub vectors_sha256: String,
    #[serde(default)]
    pub corpus_fingerprint: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VectorHeader {
    pub format_version: u32,
    pub dimension: usize,
    pub count: usize,
}

/// What `check_index` reports about a persisted index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInspection {
    pub paths: IndexPaths,
    pub vectors_bytes: Option<u64>,
    pub data_bytes: Option<u64>,
    pub header: Option<VectorHeader>,
    pub manifest: Option<ManifestSummary>,
    pub problems: Vec<String>,
}

impl IndexInspection {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty() && self.header.is_some() && self.manifest.is_some()
    }
}

pub fn save(index: &VectorIndex, base: &Path) -> Result<IndexPaths, RetrievalError> {
    let paths = IndexPaths::for_base(base);
    if let Some(parent) = paths.vectors.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| RetrievalError::io(parent, err))?;
        }
    }

    let lock = open_lock(&paths.lock)?;
    FileExt::lock_exclusive(&lock)
        .map_err(|err| RetrievalError::io(&paths.lock, err))?;
    let result = write_pair(index, &paths);
    let _ = FileExt::unlock(&lock);
    result?;

    tracing::info!(
        "Saved vector index ({} vectors) to {}",
        index.vector_count(),
        paths.vectors.display()
    );
    Ok(paths)
}

fn write_pair(index: &VectorIndex, paths: &IndexPaths) -> Result<(), RetrievalError> {
    let mut payload = Vec::with_capacity(index.vector_count() * index.dimension() * 4);
    for value in index.vector_values() {
        payload.extend_from_slice(&value.to_le_bytes());
    }

    let manifest = IndexManifest {
        format_version: FORMAT_VERSION,
        model_id: index.model_id().to_string(),
        dimension: index.dimension(),
        count: index.len(),
        vectors_sha256: hex::encode(Sha256::digest(&payload)),
        corpus_fingerprint: index.corpus_fingerprint().to_string(),
        built_at: index.built_at(),
        chunks: index.chunks().to_vec(),
    };

    let dimension = u32::try_from(index.dimension())
        .map_err(|_| RetrievalError::Serialization("dimension exceeds u32".to_string()))?;
    let mut vectors_file = Vec::with_capacity(HEADER_LEN + payload.len());
    vectors_file.extend_from_slice(MAGIC);
    vectors_file.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    vectors_file.extend_from_slice(&dimension.to_le_bytes());
    vectors_file.extend_from_slice(&(index.vector_count() as u64).to_le_bytes());
    vectors_file.extend_from_slice(&payload);

    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|err| RetrievalError::Serialization(err.to_string()))?;

    let vectors_part = part_path(&paths.vectors);
    let data_part = part_path(&paths.data);
    let result = publish_parts(&vectors_part, &vectors_file, &data_part, &manifest_json, paths);
    if result.is_err() {
        for part in [&vectors_part, &data_part] {
            if let Err(err) = fs::remove_file(part) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not remove {}: {}", part.display(), err);
                }
            }
        }
    }
    result
}

fn publish_parts(
    vectors_part: &Path,
    vectors_file: &[u8],
    data_part: &Path,
    manifest_json: &[u8],
    paths: &IndexPaths,
) -> Result<(), RetrievalError> {
    write_file(vectors_part, vectors_file)?;
    write_file(data_part, manifest_json)?;

    // Data first: a crash between the renames leaves a checksum mismatch, not a silent pair.
    fs::rename(data_part, &paths.data).map_err(|err| RetrievalError::io(&paths.data, err))?;
    fs::rename(vectors_part, &paths.vectors)
        .map_err(|err| RetrievalError::io(&paths.vectors, err))?;
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), RetrievalError> {
    let file = File::create(path).map_err(|err| RetrievalError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .and_then(|_| writer.flush())
        .map_err(|err| RetrievalError::io(path, err))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|err| RetrievalError::io(path, err))
}

/// Temp sibling, unique per write.
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    PathBuf::from(name)
}

fn open_lock(path: &Path) -> Result<File, RetrievalError> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|err| RetrievalError::io(path, err))
}

/// Load and fully validate both halves.
pub fn load(base: &Path) -> Result<VectorIndex, RetrievalError> {
    let paths = IndexPaths::for_base(base);
    for path in [&paths.vectors, &paths.data] {
        if !path.is_file() {
            return Err(RetrievalError::Corrupt(format!(
                "companion file missing: {}",
                path.display()
            )));
        }
    }

    // Read-only deployments may not be able to create the lock file.
    let lock = open_lock(&paths.lock).ok();
    if let Some(lock) = &lock {
        if let Err(err) = FileExt::lock_shared(lock) {
            tracing::debug!("Could not take shared index lock: {}", err);
        }
    }
    let result = read_pair(&paths);
    if let Some(lock) = &lock {
        let _ = FileExt::unlock(lock);
    }
    let index = result?;

    tracing::info!(
        "Loaded vector index ({} vectors, model {}) from {}",
        index.vector_count(),
        index.model_id(),
        paths.vectors.display()
    );
    Ok(index)
}

fn read_pair(paths: &IndexPaths) -> Result<VectorIndex, RetrievalError> {
    let vectors_bytes = read_all(&paths.vectors)?;
    let data_bytes = read_all(&paths.data)?;

    let header = parse_header(&vectors_bytes)?;
    let manifest: IndexManifest = serde_json::from_slice(&data_bytes)
        .map_err(|err| RetrievalError::Corrupt(format!("unreadable manifest: {}", err)))?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(RetrievalError::Corrupt(format!(
            "unsupported manifest version {}",
            manifest.format_version
        )));
    }
    if manifest.count != header.count || manifest.chunks.len() != header.count {
        return Err(RetrievalError::Corrupt(format!(
            "count mismatch: {} vectors, manifest says {}, {} chunks listed",
            header.count,
            manifest.count,
            manifest.chunks.len()
        )));
    }
    if manifest.dimension != header.dimension {
        return Err(RetrievalError::Corrupt(format!(
            "dimension mismatch: vectors {} vs manifest {}",
            header.dimension, manifest.dimension
        )));
    }

    let payload = &vectors_bytes[HEADER_LEN..];
    let expected_len = header
        .count
        .checked_mul(header.dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RetrievalError::Corrupt("vector header overflows".to_string()))?;
    if payload.len() != expected_len {
        return Err(RetrievalError::Corrupt(format!(
            "vector payload is {} bytes, expected {}",
            payload.len(),
            expected_len
        )));
    }

    let checksum = hex::encode(Sha256::digest(payload));
    if !checksum.eq_ignore_ascii_case(&manifest.vectors_sha256) {
        return Err(RetrievalError::Corrupt(
            "vector payload checksum does not match manifest".to_string(),
        ));
    }

    let vectors: Vec<f32> = payload
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect();

    VectorIndex::from_parts(
        manifest.model_id,
        manifest.dimension,
        manifest.chunks,
        vectors,
        manifest.corpus_fingerprint,
        manifest.built_at,
    )
}

fn read_all(path: &Path) -> Result<Vec<u8>, RetrievalError> {
    let mut file = File::open(path).map_err(|err| RetrievalError::io(path, err))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|err| RetrievalError::io(path, err))?;
    Ok(bytes)
}

fn parse_header(bytes: &[u8]) -> Result<VectorHeader, RetrievalError> {
    if bytes.len() < HEADER_LEN {
        return Err(RetrievalError::Corrupt(format!(
            "vector file is {} bytes, shorter than its header",
            bytes.len()
        )));
    }
    if &bytes[..4] != MAGIC {
        return Err(RetrievalError::Corrupt("vector file has bad magic".to_string()));
    }
    let u32_at = |offset: usize| {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    };
    let format_version = u32_at(4);
    if format_version != FORMAT_VERSION {
        return Err(RetrievalError::Corrupt(format!(
            "unsupported vector file version {}",
            format_version
        )));
    }
    let dimension = u32_at(8) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = usize::try_from(u64::from_le_bytes(count_bytes))
        .map_err(|_| RetrievalError::Corrupt("vector count overflows".to_string()))?;

    Ok(VectorHeader {
        format_version,
        dimension,
        count,
    })
}

/// Cheap health report: file sizes, vector header and manifest summary.
/// Never loads vectors into an index and needs no embedder.
pub fn inspect(base: &Path) -> IndexInspection {
    let paths = IndexPaths::for_base(base);
    let mut problems = Vec::new();

    let vectors_bytes = fs::metadata(&paths.vectors).ok().map(|m| m.len());
    let data_bytes = fs::metadata(&paths.data).ok().map(|m| m.len());
    if vectors_bytes.is_none() {
        problems.push(format!("missing {}", paths.vectors.display()));
    }
    if data_bytes.is_none() {
        problems.push(format!("missing {}", paths.data.display()));
    }

    let header = vectors_bytes.and_then(|_| match read_header_only(&paths.vectors) {
        Ok(header) => Some(header),
        Err(err) => {
            problems.push(err.to_string());
            None
        }
    });

    let manifest = data_bytes.and_then(|_| {
        match read_all(&paths.data).and_then(|bytes| {
            serde_json::from_slice::<ManifestSummary>(&bytes)
                .map_err(|err| RetrievalError::Corrupt(format!("unreadable manifest: {}", err)))
        }) {
            Ok(summary) => Some(summary),
            Err(err) => {
                problems.push(err.to_string());
                None
            }
        }
    });

    if header.is_some_and(|h| h.count == 0) {
        problems.push("index holds no vectors".to_string());
    }

    if let (Some(header), Some(manifest)) = (&header, &manifest) {
        if header.count != manifest.count {
            problems.push(format!(
                "vector count {} does not match manifest count {}",
                header.count, manifest.count
            ));
        }
        if header.dimension != manifest.dimension {
            problems.push(format!(
                "vector dimension {} does not match manifest dimension {}",
                header.dimension, manifest.dimension
            ));
        }
        if let Some(size) = vectors_bytes {
            match expected_file_len(header) {
                Some(expected) if size != expected => problems.push(format!(
                    "vector file is {} bytes, header implies {}",
                    size, expected
                )),
                Some(_) => {}
                None => problems.push(format!(
                    "vector header overflows: {} vectors of dimension {}",
                    header.count, header.dimension
                )),
            }
        }
    }

    IndexInspection {
        paths,
        vectors_bytes,
        data_bytes,
        header,
        manifest,
        problems,
    }
}

/// Total `.index` size the header describes, or `None` when it cannot be represented.
fn expected_file_len(header: &VectorHeader) -> Option<u64> {
    (header.count as u64)
        .checked_mul(header.dimension as u64)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN as u64))
}

fn read_header_only(path: &Path) -> Result<VectorHeader, RetrievalError> {
    let mut file = File::open(path).map_err(|err| RetrievalError::io(path, err))?;
    let mut bytes = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let read = file
            .read(&mut bytes[filled..])
            .map_err(|err| RetrievalError::io(path, err))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    parse_header(&bytes[..filled])
}
