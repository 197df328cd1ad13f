//! Two-artifact index bundle: rkyv vectors plus a JSON identity map, switched by generation.

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{from_bytes, to_bytes};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::blocking::Deadline;
use crate::checksum::bundle_checksum;
use crate::error::{IndexError, Result};
use crate::index::VectorIndex;
use crate::types::DocId;

/// Vector half of the bundle, serialized with rkyv.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
struct VectorsFile {
    checksum: u64,
    dimension: u64,
    count: u64,
    data: Vec<f32>,
}

/// Identity half of the bundle, serialized as JSON so it can be inspected by hand.
#[derive(Debug, Serialize, Deserialize)]
struct IdMapFile {
    checksum: u64,
    count: u64,
    ids: Vec<DocId>,
}

/// A persisted [`VectorIndex`] and its identity map, written and loaded as one unit.
///
/// Every save writes both files into a fresh generation directory, then switches the
/// `CURRENT` pointer file to it with a single rename. Readers follow the pointer, so they see
/// either the old pair or the new pair and never one half of each. The generation that was
/// current before a save is kept until the next save so a concurrent reader can finish.
///
/// ```text
/// vectors/
///   CURRENT              gen-00000007
///   gen-00000006/        previous generation
///   gen-00000007/
///     vectors.rkyv
///     id_map.json
/// ```
///
/// Both files still carry the vector count and a checksum over the pair, which catches a
/// generation edited by hand. Saves to one directory must not run concurrently.
///
/// # Example
///
/// ```rust,no_run
/// use paperdex_retrieval::index::VectorIndex;
/// use paperdex_retrieval::persistence::IndexBundle;
///
/// let bundle = IndexBundle::new("./data/vectors");
/// bundle.save(&VectorIndex::empty(384)).unwrap();
/// let restored = bundle.load().unwrap();
/// assert!(restored.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct IndexBundle {
    dir: PathBuf,
}

impl IndexBundle {
    /// File name of the vector artifact inside a generation.
    pub const VECTORS_FILE: &'static str = "vectors.rkyv";
    /// File name of the identity map artifact inside a generation.
    pub const ID_MAP_FILE: &'static str = "id_map.json";
    /// File naming the current generation directory.
    pub const CURRENT_FILE: &'static str = "CURRENT";

    const CURRENT_TEMP: &'static str = "CURRENT.tmp";
    const GENERATION_PREFIX: &'static str = "gen-";

    /// Creates a bundle rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the bundle directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the directory `CURRENT` points at, or `None` if nothing was saved yet.
    ///
    /// # Errors
    /// Returns [`IndexError::CorruptIndex`] if `CURRENT` does not name a generation.
    pub fn current_generation(&self) -> Result<Option<PathBuf>> {
        let Some(bytes) = read_optional(&self.dir.join(Self::CURRENT_FILE))? else {
            return Ok(None);
        };
        let name = std::str::from_utf8(&bytes)
            .map(str::trim)
            .map_err(|e| IndexError::CorruptIndex(format!("{}: {e}", Self::CURRENT_FILE)))?;
        if parse_generation(name).is_none() {
            return Err(IndexError::CorruptIndex(format!(
                "{} names no generation: {name:?}",
                Self::CURRENT_FILE
            )));
        }
        Ok(Some(self.dir.join(name)))
    }

    /// Writes `index` to disk, replacing the current bundle.
    ///
    /// # Errors
    /// Returns an error if serialization or any filesystem operation fails.
    pub fn save(&self, index: &VectorIndex) -> Result<()> {
        self.save_within(index, &Deadline::never())
    }

    /// Like [`IndexBundle::save`], but checks `deadline` right before switching `CURRENT`.
    ///
    /// If the deadline has passed, or any step fails, the new generation is removed and the
    /// previous bundle stays current.
    ///
    /// # Errors
    /// The error of [`Deadline::check`], or a serialization or filesystem error.
    pub fn save_within(&self, index: &VectorIndex, deadline: &Deadline) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let generation = self.next_generation()?;
        let name = generation_name(generation);
        let gen_dir = self.dir.join(&name);

        if let Err(err) = self.write_generation(index, &name, &gen_dir, deadline) {
            discard(&gen_dir, |path| fs::remove_dir_all(path));
            discard(&self.dir.join(Self::CURRENT_TEMP), |path| fs::remove_file(path));
            return Err(err);
        }
        // The rename has landed; from here on nothing may undo it.
        if let Err(err) = sync_dir(&self.dir) {
            warn!(dir = %self.dir.display(), error = %err, "could not sync bundle directory");
        }
        self.prune(generation);

        info!(
            dir = %self.dir.display(),
            generation = %name,
            vectors = index.len(),
            dimension = index.dimension(),
            "persisted index bundle"
        );
        Ok(())
    }

    fn write_generation(
        &self,
        index: &VectorIndex,
        name: &str,
        gen_dir: &Path,
        deadline: &Deadline,
    ) -> Result<()> {
        let ids = index.identity().as_slice();
        let checksum = bundle_checksum(index.dimension(), ids, index.data());
        let count = ids.len() as u64;

        let vectors = VectorsFile {
            checksum,
            dimension: index.dimension() as u64,
            count,
            data: index.data().to_vec(),
        };
        let vector_bytes =
            to_bytes::<RkyvError>(&vectors).map_err(|e| IndexError::Serialization(e.to_string()))?;

        let id_map = IdMapFile {
            checksum,
            count,
            ids: ids.to_vec(),
        };
        let id_map_bytes = serde_json::to_vec_pretty(&id_map)?;

        fs::create_dir(gen_dir)?;
        write_synced(&gen_dir.join(Self::VECTORS_FILE), &vector_bytes)?;
        write_synced(&gen_dir.join(Self::ID_MAP_FILE), &id_map_bytes)?;
        sync_dir(gen_dir)?;

        let pointer_temp = self.dir.join(Self::CURRENT_TEMP);
        write_synced(&pointer_temp, format!("{name}\n").as_bytes())?;
        deadline.check()?;
        fs::rename(&pointer_temp, self.dir.join(Self::CURRENT_FILE))?;
        Ok(())
    }

    fn generations(&self) -> Result<Vec<u64>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(generation) = entry.file_name().to_str().and_then(parse_generation) {
                found.push(generation);
            }
        }
        Ok(found)
    }

    fn next_generation(&self) -> Result<u64> {
        let latest = self.generations()?.into_iter().max().unwrap_or(0);
        latest
            .checked_add(1)
            .ok_or_else(|| IndexError::CorruptIndex("generation counter exhausted".into()))
    }

    /// Removes every generation older than the one `current` replaced.
    fn prune(&self, current: u64) {
        let generations = match self.generations() {
            Ok(generations) => generations,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "could not list bundle generations");
                return;
            }
        };
        let previous = generations.iter().copied().filter(|&g| g < current).max();
        for generation in generations {
            if generation != current && Some(generation) != previous {
                discard(&self.dir.join(generation_name(generation)), |path| {
                    fs::remove_dir_all(path)
                });
            }
        }
    }

    /// Loads the current generation.
    ///
    /// Returns `Ok(None)` if no bundle was ever saved.
    ///
    /// # Errors
    /// Returns [`IndexError::CorruptIndex`] if `CURRENT` is unreadable, either artifact is
    /// missing or fails to parse, or the two disagree in count or checksum.
    pub fn load(&self) -> Result<Option<VectorIndex>> {
        let Some(gen_dir) = self.current_generation()? else {
            debug!(dir = %self.dir.display(), "no index bundle on disk");
            return Ok(None);
        };

        let vector_bytes = read_optional(&gen_dir.join(Self::VECTORS_FILE))?
            .ok_or_else(|| missing(&gen_dir, Self::VECTORS_FILE))?;
        let id_map_bytes = read_optional(&gen_dir.join(Self::ID_MAP_FILE))?
            .ok_or_else(|| missing(&gen_dir, Self::ID_MAP_FILE))?;

        let mut aligned = AlignedVec::<16>::with_capacity(vector_bytes.len());
        aligned.extend_from_slice(&vector_bytes);
        let vectors = from_bytes::<VectorsFile, RkyvError>(&aligned).map_err(|e| {
            IndexError::CorruptIndex(format!("{}: {e}", Self::VECTORS_FILE))
        })?;
        let id_map: IdMapFile = serde_json::from_slice(&id_map_bytes).map_err(|e| {
            IndexError::CorruptIndex(format!("{}: {e}", Self::ID_MAP_FILE))
        })?;

        if vectors.count != id_map.count || id_map.count != id_map.ids.len() as u64 {
            return Err(IndexError::CorruptIndex(format!(
                "length mismatch: {} vectors, {} identifiers",
                vectors.count,
                id_map.ids.len()
            )));
        }
        if vectors.checksum != id_map.checksum {
            return Err(IndexError::CorruptIndex(
                "vector and identity artifacts come from different builds".into(),
            ));
        }

        let dimension = usize::try_from(vectors.dimension)
            .map_err(|_| IndexError::CorruptIndex("dimension out of range".into()))?;
        let index = VectorIndex::from_parts(dimension, id_map.ids, vectors.data)?;

        let actual = bundle_checksum(index.dimension(), index.identity().as_slice(), index.data());
        if actual != vectors.checksum {
            return Err(IndexError::CorruptIndex("checksum mismatch".into()));
        }

        info!(
            dir = %gen_dir.display(),
            vectors = index.len(),
            dimension = index.dimension(),
            "loaded index bundle"
        );
        Ok(Some(index))
    }
}

fn generation_name(generation: u64) -> String {
    format!("{}{generation:08}", IndexBundle::GENERATION_PREFIX)
}

fn parse_generation(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(IndexBundle::GENERATION_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn missing(gen_dir: &Path, file: &str) -> IndexError {
    IndexError::CorruptIndex(format!("{} is missing", gen_dir.join(file).display()))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Best-effort removal of a leftover path.
fn discard(path: &Path, remove: impl FnOnce(&Path) -> std::io::Result<()>) {
    match remove(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "could not remove bundle leftover"),
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample() -> VectorIndex {
        VectorIndex::build(
            2,
            vec![
                (DocId::from_u64(4), vec![1.0, 0.0]),
                (DocId::from_u64(2), vec![0.6, 0.8]),
            ],
            1e-3,
        )
        .unwrap()
    }

    fn larger() -> VectorIndex {
        VectorIndex::build(
            2,
            vec![
                (DocId::from_u64(1), vec![1.0, 0.0]),
                (DocId::from_u64(2), vec![0.0, 1.0]),
                (DocId::from_u64(3), vec![0.6, 0.8]),
            ],
            1e-3,
        )
        .unwrap()
    }

    fn current(bundle: &IndexBundle) -> PathBuf {
        bundle.current_generation().unwrap().unwrap()
    }

    fn generation_dirs(bundle: &IndexBundle) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(bundle.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(IndexBundle::GENERATION_PREFIX))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path().join("vectors"));
        let index = sample();

        bundle.save(&index).unwrap();
        let generation = current(&bundle);
        assert!(generation.join(IndexBundle::VECTORS_FILE).exists());
        assert!(generation.join(IndexBundle::ID_MAP_FILE).exists());
        assert!(!bundle.dir().join(IndexBundle::CURRENT_TEMP).exists());

        let loaded = bundle.load().unwrap().unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn load_nonexistent() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        assert!(bundle.current_generation().unwrap().is_none());
        assert!(bundle.load().unwrap().is_none());
    }

    #[test]
    fn save_empty() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&VectorIndex::empty(8)).unwrap();
        let loaded = bundle.load().unwrap().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), 8);
    }

    #[test]
    fn each_save_switches_to_a_new_generation() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());

        bundle.save(&sample()).unwrap();
        assert_eq!(current(&bundle), dir.path().join("gen-00000001"));

        bundle.save(&larger()).unwrap();
        assert_eq!(current(&bundle), dir.path().join("gen-00000002"));
        assert_eq!(bundle.load().unwrap().unwrap(), larger());
        assert_eq!(generation_dirs(&bundle), vec!["gen-00000001", "gen-00000002"]);

        bundle.save(&sample()).unwrap();
        assert_eq!(generation_dirs(&bundle), vec!["gen-00000002", "gen-00000003"]);
        assert_eq!(bundle.load().unwrap().unwrap(), sample());
    }

    #[test]
    fn abandoned_save_keeps_previous_bundle() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&sample()).unwrap();

        let spent = Deadline::after("index bundle save", Duration::ZERO);
        let err = bundle.save_within(&larger(), &spent).unwrap_err();
        assert!(matches!(err, IndexError::Timeout { .. }));

        assert_eq!(bundle.load().unwrap().unwrap(), sample());
        assert_eq!(generation_dirs(&bundle), vec!["gen-00000001"]);
        assert!(!dir.path().join(IndexBundle::CURRENT_TEMP).exists());
    }

    #[test]
    fn failed_pointer_write_keeps_previous_bundle() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&sample()).unwrap();

        // A directory in the way makes the pointer write fail after both halves are written.
        fs::create_dir(dir.path().join(IndexBundle::CURRENT_TEMP)).unwrap();
        assert!(bundle.save(&larger()).is_err());

        assert_eq!(bundle.load().unwrap().unwrap(), sample());
        assert_eq!(generation_dirs(&bundle), vec!["gen-00000001"]);
    }

    #[test]
    fn bad_pointer_is_corrupt() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&sample()).unwrap();

        fs::write(dir.path().join(IndexBundle::CURRENT_FILE), "latest\n").unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));

        fs::write(dir.path().join(IndexBundle::CURRENT_FILE), "gen-00000009\n").unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));
    }

    #[test]
    fn missing_half_is_corrupt() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&sample()).unwrap();
        fs::remove_file(current(&bundle).join(IndexBundle::ID_MAP_FILE)).unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));

        bundle.save(&sample()).unwrap();
        fs::remove_file(current(&bundle).join(IndexBundle::VECTORS_FILE)).unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));
    }

    #[test]
    fn mismatched_halves_are_corrupt() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&sample()).unwrap();
        let old_id_map = fs::read(current(&bundle).join(IndexBundle::ID_MAP_FILE)).unwrap();

        bundle.save(&larger()).unwrap();
        fs::write(current(&bundle).join(IndexBundle::ID_MAP_FILE), old_id_map).unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));
    }

    #[test]
    fn same_length_from_other_build_is_corrupt() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&sample()).unwrap();
        let old_id_map = fs::read(current(&bundle).join(IndexBundle::ID_MAP_FILE)).unwrap();

        let other = VectorIndex::build(
            2,
            vec![
                (DocId::from_u64(4), vec![0.0, 1.0]),
                (DocId::from_u64(2), vec![1.0, 0.0]),
            ],
            1e-3,
        )
        .unwrap();
        bundle.save(&other).unwrap();
        fs::write(current(&bundle).join(IndexBundle::ID_MAP_FILE), old_id_map).unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let bundle = IndexBundle::new(dir.path());
        bundle.save(&sample()).unwrap();
        fs::write(current(&bundle).join(IndexBundle::VECTORS_FILE), b"not rkyv").unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));

        bundle.save(&sample()).unwrap();
        fs::write(current(&bundle).join(IndexBundle::ID_MAP_FILE), b"{").unwrap();
        assert!(matches!(bundle.load(), Err(IndexError::CorruptIndex(_))));
    }
}
