//! Content-addressed on-disk audio cache.
//!
//! Entries are named `{fingerprint}{ext}` inside the cache directory. While
//! a live request is being captured the bytes go to a per-writer
//! `{fingerprint}{ext}.XXXXXX.part` file, which is renamed over the final name
//! only after a successful fetch. Concurrent writers of one fingerprint never
//! share a temp file; the last one to commit wins.

pub mod wav;

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{BufferError, TtsError};
use crate::format::OutputFormat;
use wav::{WavFormat, WAV_HEADER_LEN};

/// Bytes pushed to the playback sink per read.
pub const PLAYBACK_CHUNK: usize = 4096;

/// Suffix of in-progress capture files.
pub const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Lowercase hex SHA-256 over the four request-defining fields. Fields
    /// are NUL-separated so that moving characters between them changes the
    /// key.
    pub fn compute_key(voice: &str, model: &str, format: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        for (i, field) in [voice, model, format, text].iter().enumerate() {
            if i > 0 {
                hasher.update([0u8]);
            }
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn final_path(&self, key: &str, format: &OutputFormat) -> PathBuf {
        self.dir.join(format!("{key}{}", format.cache_extension()))
    }

    /// Returns the committed entry for `key`, if there is a non-empty one.
    pub fn lookup(&self, key: &str, format: &OutputFormat) -> Option<PathBuf> {
        let path = self.final_path(key, format);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path),
            _ => None,
        }
    }

    /// Streams a committed entry into `sink` in [`PLAYBACK_CHUNK`] pieces,
    /// skipping the header of `.wav` entries. Returns the payload length.
    pub fn stream_playback<F>(&self, path: &Path, mut sink: F) -> Result<u64, TtsError>
    where
        F: FnMut(&[u8]) -> Result<(), BufferError>,
    {
        let mut file = File::open(path)?;
        if is_wav_path(path) {
            file.seek(SeekFrom::Start(WAV_HEADER_LEN as u64))?;
        }

        let mut chunk = [0u8; PLAYBACK_CHUNK];
        let mut total = 0u64;
        loop {
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            sink(&chunk[..n])?;
            total += n as u64;
        }
        debug!("Replayed {} cached bytes from {}", total, path.display());
        Ok(total)
    }

    /// Opens a fresh temp file for write-through capture of `key`.
    pub fn begin_write(
        &self,
        key: &str,
        format: &OutputFormat,
        fallback_to_pcm: bool,
    ) -> io::Result<CacheWriter> {
        let final_path = self.final_path(key, format);
        let wav = format.stored_wav_format(fallback_to_pcm);

        let temp = tempfile::Builder::new()
            .prefix(&format!("{key}{}.", format.cache_extension()))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)?;
        let temp_path = temp.path().to_path_buf();
        let mut file = BufWriter::new(temp);
        if wav.is_some() {
            file.seek(SeekFrom::Start(WAV_HEADER_LEN as u64))?;
        }

        Ok(CacheWriter {
            file: Some(file),
            temp_path,
            final_path,
            wav,
            bytes_written: 0,
        })
    }
}

fn is_wav_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

/// Write-through handle for one cache entry. Dropping it without a
/// successful [`commit`](Self::commit) removes the temp file.
#[derive(Debug)]
pub struct CacheWriter {
    file: Option<BufWriter<NamedTempFile>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    wav: Option<WavFormat>,
    bytes_written: u64,
}

impl CacheWriter {
    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "cache entry already closed"));
        };
        file.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Publishes the entry when `success` and at least one byte was written,
    /// otherwise discards it. Returns the final path when published. Calling
    /// it again after the entry was closed does nothing.
    pub fn commit(&mut self, success: bool) -> io::Result<Option<PathBuf>> {
        let Some(file) = self.file.take() else {
            return Ok(None);
        };
        if !success || self.bytes_written == 0 {
            self.remove_temp(file);
            info!("Discarded partial cache file {}", self.temp_path.display());
            return Ok(None);
        }

        // On failure the temp file is dropped, which removes it.
        self.publish(file)?;
        info!("Cached audio saved: {}", self.final_path.display());
        Ok(Some(self.final_path.clone()))
    }

    pub fn discard(&mut self) {
        // Discarding never fails; a missing temp file is already the goal.
        let _ = self.commit(false);
    }

    fn publish(&self, mut file: BufWriter<NamedTempFile>) -> io::Result<()> {
        if let Some(format) = self.wav {
            let data_size = u32::try_from(self.bytes_written).unwrap_or(u32::MAX);
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&wav::header(format, data_size))?;
        }
        let temp = file.into_inner().map_err(|e| e.into_error())?;

        // `persist` renames over an existing entry.
        temp.persist(&self.final_path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_temp(&self, file: BufWriter<NamedTempFile>) {
        // Unflushed bytes are irrelevant; the file is going away.
        let (temp, _) = file.into_parts();
        if let Err(e) = temp.close() {
            warn!("Failed to remove cache temp file {}: {e}", self.temp_path.display());
        }
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ulaw() -> OutputFormat {
        OutputFormat::parse("ulaw_8000").unwrap()
    }

    #[test]
    fn test_key_is_deterministic_and_field_sensitive() {
        let base = CacheStore::compute_key("voice", "model", "ulaw_8000", "hello");
        assert_eq!(base, CacheStore::compute_key("voice", "model", "ulaw_8000", "hello"));
        assert_eq!(base.len(), 64);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert_ne!(base, CacheStore::compute_key("voicf", "model", "ulaw_8000", "hello"));
        assert_ne!(base, CacheStore::compute_key("voice", "modem", "ulaw_8000", "hello"));
        assert_ne!(base, CacheStore::compute_key("voice", "model", "ulaw_8001", "hello"));
        assert_ne!(base, CacheStore::compute_key("voice", "model", "ulaw_8000", "hellp"));
        assert_ne!(
            CacheStore::compute_key("ab", "c", "f", "t"),
            CacheStore::compute_key("a", "bc", "f", "t")
        );
    }

    #[test]
    fn test_commit_publishes_wav_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let key = CacheStore::compute_key("v", "m", "ulaw_8000", "hi");

        let mut writer = store.begin_write(&key, &ulaw(), true).unwrap();
        writer.append(&[1, 2, 3, 4]).unwrap();
        writer.append(&[5, 6]).unwrap();
        assert!(store.lookup(&key, &ulaw()).is_none());

        let path = writer.commit(true).unwrap().unwrap();
        assert_eq!(store.lookup(&key, &ulaw()), Some(path.clone()));
        assert!(!writer.temp_path().exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 44 + 6);

        let mut replayed = Vec::new();
        let n = store
            .stream_playback(&path, |chunk| {
                replayed.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 6);
        assert_eq!(replayed, vec![1, 2, 3, 4, 5, 6]);

        // A second commit is a no-op.
        assert_eq!(writer.commit(true).unwrap(), None);
        assert!(path.exists());
    }

    #[test]
    fn test_failed_or_empty_capture_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        let mut writer = store.begin_write("k1", &ulaw(), true).unwrap();
        writer.append(&[1, 2]).unwrap();
        assert!(writer.temp_path().exists());
        assert_eq!(writer.commit(false).unwrap(), None);
        assert_eq!(writer.commit(false).unwrap(), None);
        assert!(!writer.temp_path().exists());
        assert!(store.lookup("k1", &ulaw()).is_none());

        let mut writer = store.begin_write("k2", &ulaw(), true).unwrap();
        assert_eq!(writer.commit(true).unwrap(), None);
        assert!(store.lookup("k2", &ulaw()).is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_discards_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let temp = {
            let mut writer = store.begin_write("k", &ulaw(), true).unwrap();
            writer.append(&[0; 10]).unwrap();
            writer.temp_path().to_path_buf()
        };
        assert!(!temp.exists());
    }

    #[test]
    fn test_mp3_entry_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let mp3 = OutputFormat::parse("mp3_44100_128").unwrap();

        let mut writer = store.begin_write("k", &mp3, true).unwrap();
        writer.append(b"ID3data").unwrap();
        let path = writer.commit(true).unwrap().unwrap();
        assert!(path.to_string_lossy().ends_with("k.mp3"));
        assert_eq!(fs::read(&path).unwrap(), b"ID3data");

        let mut replayed = Vec::new();
        store
            .stream_playback(&path, |c| {
                replayed.extend_from_slice(c);
                Ok(())
            })
            .unwrap();
        assert_eq!(replayed, b"ID3data");
    }

    #[test]
    fn test_commit_replaces_stale_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        fs::write(store.final_path("k", &ulaw()), vec![9u8; 100]).unwrap();

        let mut writer = store.begin_write("k", &ulaw(), true).unwrap();
        writer.append(&[1, 2]).unwrap();
        let path = writer.commit(true).unwrap().unwrap();
        assert_eq!(fs::metadata(path).unwrap().len(), 46);
    }

    #[test]
    fn test_empty_file_is_not_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        File::create(store.final_path("k", &ulaw())).unwrap();
        assert!(store.lookup("k", &ulaw()).is_none());
    }

    #[test]
    fn test_overlapping_writers_do_not_share_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        let mut first = store.begin_write("k", &ulaw(), true).unwrap();
        let mut second = store.begin_write("k", &ulaw(), true).unwrap();
        assert_ne!(first.temp_path(), second.temp_path());
        assert!(first.temp_path().to_string_lossy().ends_with(".part"));

        first.append(&[0xAA; 10]).unwrap();
        second.append(&[0xBB; 4]).unwrap();
        let path = first.commit(true).unwrap().unwrap();
        second.append(&[0xBB; 4]).unwrap();
        assert_eq!(fs::read(&path).unwrap()[44..], [0xAA; 10]);

        assert_eq!(second.commit(true).unwrap(), Some(path.clone()));
        assert_eq!(fs::read(&path).unwrap()[44..], [0xBB; 8]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_discarded_overlap_keeps_committed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        let mut first = store.begin_write("k", &ulaw(), true).unwrap();
        let mut second = store.begin_write("k", &ulaw(), true).unwrap();
        first.append(&[1; 6]).unwrap();
        second.append(&[2; 6]).unwrap();
        let path = first.commit(true).unwrap().unwrap();
        second.discard();

        assert_eq!(store.lookup("k", &ulaw()), Some(path.clone()));
        assert_eq!(fs::read(&path).unwrap()[44..], [1; 6]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
