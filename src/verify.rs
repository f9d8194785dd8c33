//! Checking archives that are supposed to be TorrentZipped already.
//!
//! An archive passes when rebuilding it from its own contents reproduces it
//! byte for byte. Directory trees are checked by a fixed pool of workers fed
//! from a bounded queue.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, TorrentZipError};
use crate::staging::StagingMode;
use crate::torrentzip::{Writer, WriterOptions};
use crate::zip::ZipReader;

pub const DEFAULT_JOBS: usize = 8;

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Number of archives checked at the same time.
    pub jobs: usize,
    /// Failing archives are copied here when set.
    pub fail_dir: Option<PathBuf>,
    pub staging: StagingMode,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            fail_dir: None,
            staging: StagingMode::default(),
        }
    }
}

/// Outcome of [`verify_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    /// Archives that failed, sorted by path.
    pub failed: Vec<PathBuf>,
    /// Total size of the checked archives.
    pub bytes: u64,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: VerifyReport) {
        self.checked += other.checked;
        self.failed.extend(other.failed);
        self.bytes += other.bytes;
    }
}

/// Sink that only hashes what it is given.
#[derive(Default)]
pub struct DigestWriter {
    hasher: Sha256,
}

impl DigestWriter {
    /// Lowercase hex SHA-256 of everything written.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// SHA-256 of the file at `path`, hex encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut digest = DigestWriter::default();
    io::copy(&mut file, &mut digest)?;
    Ok(digest.finish())
}

/// SHA-256 of the TorrentZip archive rebuilt from the contents of the
/// archive at `path`.
///
/// Every entry is inflated and written again under its stored name.
pub fn canonical_digest(path: &Path, staging: &StagingMode) -> Result<String> {
    let source = ZipReader::open_path(path)?;
    let options = WriterOptions {
        staging: staging.clone(),
    };
    let mut zip = Writer::with_options(DigestWriter::default(), &options)?;

    for entry in source.entries() {
        let mut contents = source.open(entry)?;
        io::copy(&mut contents, &mut zip.create_bytes(&entry.raw_name)?)?;
    }

    Ok(zip.close()?.finish())
}

/// Check that the archive at `path` is in canonical form.
///
/// Returns [`TorrentZipError::Mismatch`] when the rebuilt archive differs,
/// or whatever error stopped the rebuild. Either way the archive is copied
/// into `options.fail_dir` if one is set.
pub fn verify_archive(path: &Path, options: &VerifyOptions) -> Result<()> {
    let outcome = check(path, &options.staging);

    if let Err(err) = &outcome {
        warn!(path = %path.display(), error = %err, "verification failed");
        if let Some(dir) = &options.fail_dir {
            if let Err(copy_err) = quarantine(path, dir) {
                warn!(
                    path = %path.display(),
                    fail_dir = %dir.display(),
                    error = %copy_err,
                    "failed to copy archive"
                );
            }
        }
    }
    outcome
}

fn check(path: &Path, staging: &StagingMode) -> Result<()> {
    let expected = hash_file(path)?;
    let actual = canonical_digest(path, staging)?;
    if expected != actual {
        return Err(TorrentZipError::Mismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    debug!(path = %path.display(), sha256 = %actual, "archive is canonical");
    Ok(())
}

fn quarantine(path: &Path, dir: &Path) -> io::Result<u64> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "archive path has no file name")
    })?;
    fs::copy(path, dir.join(name))
}

/// All `.zip` files below `roots`, in walk order.
///
/// A root that is itself a file is returned when it has the extension.
pub fn scan_archives(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let is_zip = entry.path().extension().is_some_and(|ext| ext == "zip");
            if entry.file_type().is_file() && is_zip {
                archives.push(entry.into_path());
            }
        }
    }
    Ok(archives)
}

/// Verify every archive found below `roots` with `options.jobs` workers.
///
/// Failures are counted in the report, not returned. An error means the
/// scan itself or a worker failed.
pub async fn verify_all(roots: &[PathBuf], options: &VerifyOptions) -> Result<VerifyReport> {
    let archives = {
        let roots = roots.to_vec();
        tokio::task::spawn_blocking(move || scan_archives(&roots))
            .await
            .map_err(join_error)??
    };
    let jobs = options.jobs.max(1);
    info!(archives = archives.len(), jobs, "verifying archives");

    let (tx, rx) = mpsc::channel::<PathBuf>(jobs * 2);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = JoinSet::new();
    for _ in 0..jobs {
        let rx = Arc::clone(&rx);
        let options = options.clone();
        workers.spawn(async move {
            let mut tally = VerifyReport::default();
            loop {
                let next = rx.lock().await.recv().await;
                let Some(path) = next else {
                    break;
                };

                let bytes = archive_size(&path).await;
                let task_path = path.clone();
                let task_options = options.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    verify_archive(&task_path, &task_options)
                })
                .await;

                tally.checked += 1;
                tally.bytes += bytes;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => tally.failed.push(path),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "verification task died");
                        tally.failed.push(path);
                    }
                }
            }
            tally
        });
    }

    for path in archives {
        if tx.send(path).await.is_err() {
            break;
        }
    }
    drop(tx);

    let mut report = VerifyReport::default();
    while let Some(joined) = workers.join_next().await {
        report.merge(joined.map_err(join_error)?);
    }
    report.failed.sort();

    info!(
        checked = report.checked,
        failed = report.failed.len(),
        bytes = report.bytes,
        "verification finished"
    );
    Ok(report)
}

/// Size of `path` for the report. A failed lookup is logged and counts as 0.
async fn archive_size(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot read archive size");
            0
        }
    }
}

fn join_error(err: JoinError) -> TorrentZipError {
    io::Error::other(err).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::ZipWriter;

    fn write_canonical(path: &Path, files: &[(&str, &[u8])]) {
        let mut zip = Writer::new(File::create(path).unwrap()).unwrap();
        for (name, data) in files {
            zip.create(name).unwrap().write_all(data).unwrap();
        }
        zip.close().unwrap();
    }

    fn write_plain(path: &Path, files: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in files {
            zip.create(name).unwrap().write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    const FILES: &[(&str, &[u8])] = &[
        ("b.txt", b"hello".as_slice()),
        ("A.txt", b"world".as_slice()),
        ("dir/", b"".as_slice()),
    ];

    #[test]
    fn digest_writer_matches_known_vector() {
        let mut digest = DigestWriter::default();
        digest.write_all(b"abc").unwrap();
        assert_eq!(
            digest.finish(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn canonical_archive_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("good.zip");
        write_canonical(&path, FILES);

        assert_eq!(
            canonical_digest(&path, &StagingMode::Memory).unwrap(),
            hash_file(&path).unwrap()
        );
        verify_archive(&path, &VerifyOptions::default()).unwrap();
    }

    #[test]
    fn names_that_are_not_utf8_survive_the_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp437.zip");
        let mut zip = Writer::new(File::create(&path).unwrap()).unwrap();
        zip.create_bytes(b"\x80\x81\x82/\x9a.bin")
            .unwrap()
            .write_all(b"legacy")
            .unwrap();
        zip.create("plain.txt").unwrap().write_all(b"ascii").unwrap();
        zip.close().unwrap();

        verify_archive(&path, &VerifyOptions::default()).unwrap();
    }

    #[test]
    fn plain_archive_fails_and_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let fail_dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.zip");
        write_plain(&path, FILES);

        let options = VerifyOptions {
            fail_dir: Some(fail_dir.path().to_path_buf()),
            ..VerifyOptions::default()
        };
        let err = verify_archive(&path, &options).unwrap_err();
        match err {
            TorrentZipError::Mismatch { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            fs::read(fail_dir.path().join("plain.zip")).unwrap(),
            fs::read(&path).unwrap()
        );
    }

    #[test]
    fn unreadable_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.zip");
        fs::write(&path, b"definitely not a zip archive").unwrap();

        let err = verify_archive(&path, &VerifyOptions::default()).unwrap_err();
        assert!(matches!(err, TorrentZipError::Format(_)), "{err:?}");
    }

    #[test]
    fn scan_finds_only_zip_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("a.zip"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::write(dir.path().join("nested/deeper/b.zip"), b"").unwrap();
        fs::create_dir(dir.path().join("fake.zip")).unwrap();

        let found = scan_archives(&[dir.path().to_path_buf()]).unwrap();
        let found: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            found,
            [PathBuf::from("a.zip"), PathBuf::from("nested/deeper/b.zip")]
        );
    }

    #[tokio::test]
    async fn pool_counts_every_archive() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            let name = format!("entry-{i}.txt");
            let data = format!("contents of archive {i}");
            write_canonical(
                &dir.path().join(format!("good-{i}.zip")),
                &[(name.as_str(), data.as_bytes())],
            );
        }
        write_plain(&dir.path().join("bad.zip"), FILES);

        let options = VerifyOptions {
            jobs: 3,
            staging: StagingMode::Memory,
            ..VerifyOptions::default()
        };
        let report = verify_all(&[dir.path().to_path_buf()], &options)
            .await
            .unwrap();

        assert_eq!(report.checked, 6);
        assert_eq!(report.failed, [dir.path().join("bad.zip")]);
        assert!(!report.is_clean());

        let total: u64 = scan_archives(&[dir.path().to_path_buf()])
            .unwrap()
            .iter()
            .map(|p| fs::metadata(p).unwrap().len())
            .sum();
        assert_eq!(report.bytes, total);
    }

    #[tokio::test]
    async fn vanished_archive_counts_zero_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.zip");
        assert_eq!(archive_size(&path).await, 0);

        fs::write(&path, b"1234").unwrap();
        assert_eq!(archive_size(&path).await, 4);
    }

    #[tokio::test]
    async fn empty_tree_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let report = verify_all(&[dir.path().to_path_buf()], &VerifyOptions::default())
            .await
            .unwrap();
        assert_eq!(report, VerifyReport::default());
        assert!(report.is_clean());
    }
}
