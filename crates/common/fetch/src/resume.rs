//! The resume sidecar: per-worker progress persisted next to the target.
//!
//! The sidecar is a hidden JSON file holding up to 32 `[start, watermark,
//! end]` triples, one per worker, where `watermark` is the last byte the
//! worker durably wrote. Validation is total: any decoding failure or rule
//! violation discards the sidecar and the transfer starts from scratch; a
//! partially trusted record can never corrupt the target.

use crate::plan::MAX_WORKERS;
use std::path::Path;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// `<dir>/.<basename>.resume`
pub(crate) fn sidecar_path(target: &Path) -> PathBuf {
    let basename = target
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    target.with_file_name(format!(".{basename}.resume"))
}

pub(crate) fn remove_sidecar(target: &Path) {
    let _ = std::fs::remove_file(sidecar_path(target));
}

/// Loads the sidecar for `target`, returning the per-worker table when every
/// validity rule holds. An invalid or stale sidecar is deleted on the spot.
///
/// Freshness uses `Last-Modified` as the sole token: the local file must be
/// at least as recent as the remote resource. The record must describe
/// exactly the probed size, with ordered, in-bounds, non-overlapping chunks.
pub(crate) fn load(target: &Path, total_size: i64, remote_modified: i64) -> Option<Vec<[i64; 3]>> {
    let metadata = std::fs::metadata(target).ok()?;
    let local_modified = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);

    let path = sidecar_path(target);
    let record = std::fs::read(&path)
        .ok()
        .and_then(|payload| serde_json::from_slice::<Vec<[i64; 3]>>(&payload).ok());

    match record {
        Some(record) if remote_modified <= local_modified && validate(&record, total_size) => {
            Some(record)
        }
        Some(_) => {
            tracing::debug!(?path, "discarding invalid resume sidecar");
            let _ = std::fs::remove_file(&path);
            None
        }
        None => None,
    }
}

fn validate(record: &[[i64; 3]], total_size: i64) -> bool {
    if record.is_empty() || record.len() > MAX_WORKERS {
        return false;
    }
    for (index, chunk) in record.iter().enumerate() {
        let [start, watermark, end] = *chunk;
        if start < 0 || watermark >= total_size || end >= total_size {
            return false;
        }
        if start > watermark || start > end || watermark > end {
            return false;
        }
        if index == 0 && start != 0 {
            return false;
        }
        if index == record.len() - 1 && end != total_size - 1 {
            return false;
        }
        if index != 0 && start <= record[index - 1][2] {
            return false;
        }
    }
    true
}

/// Writes the current table; called once per reporter tick.
pub(crate) fn store(path: &Path, table: &[[i64; 3]]) -> std::io::Result<()> {
    let payload = serde_json::to_vec(table)?;
    std::fs::write(path, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn sidecar_lives_next_to_the_target() {
        assert_eq!(
            sidecar_path(Path::new("/data/out.bin")),
            PathBuf::from("/data/.out.bin.resume")
        );
        assert_eq!(
            sidecar_path(Path::new("out.bin")),
            PathBuf::from(".out.bin.resume")
        );
    }

    #[test]
    fn accepts_a_consistent_record() {
        let record = [[0, 100, 199], [200, 250, 299]];
        assert!(validate(&record, 300));
    }

    #[test_case(&[] ; "empty record")]
    #[test_case(&[[0, 100, 199], [200, 200, 399]] ; "end exceeds the size")]
    #[test_case(&[[5, 100, 199], [200, 200, 299]] ; "first chunk does not start at zero")]
    #[test_case(&[[0, 100, 199], [200, 200, 250]] ; "last chunk does not reach the last byte")]
    #[test_case(&[[0, 100, 199], [150, 200, 299]] ; "overlapping chunks")]
    #[test_case(&[[0, 250, 199], [200, 250, 299]] ; "watermark past the chunk end")]
    #[test_case(&[[0, 100, 199], [260, 250, 299]] ; "watermark before the chunk start")]
    #[test_case(&[[-1, 100, 199], [200, 250, 299]] ; "negative start")]
    fn rejects_inconsistent_records(record: &[[i64; 3]]) {
        assert!(!validate(record, 300));
    }

    #[test]
    fn rejects_more_chunks_than_workers() {
        let record: Vec<[i64; 3]> = (0..33).map(|i| [i * 10, i * 10, i * 10 + 9]).collect();
        assert!(!validate(&record, 330));
    }

    #[test]
    fn loads_a_fresh_valid_sidecar() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("out.bin");
        std::fs::write(&target, vec![0u8; 300])?;
        store(&sidecar_path(&target), &[[0, 100, 199], [200, 250, 299]])?;

        let record = load(&target, 300, 0);
        assert_eq!(record, Some(vec![[0, 100, 199], [200, 250, 299]]));
        Ok(())
    }

    #[test]
    fn invalid_sidecar_is_deleted_on_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("out.bin");
        std::fs::write(&target, vec![0u8; 300])?;
        store(&sidecar_path(&target), &[[0, 100, 199], [200, 200, 399]])?;

        assert_eq!(load(&target, 300, 0), None);
        assert!(!sidecar_path(&target).exists());
        Ok(())
    }

    #[test]
    fn remote_newer_than_local_file_invalidates_the_sidecar() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("out.bin");
        std::fs::write(&target, vec![0u8; 300])?;
        store(&sidecar_path(&target), &[[0, 100, 199], [200, 250, 299]])?;

        let far_future = 4_000_000_000;
        assert_eq!(load(&target, 300, far_future), None);
        Ok(())
    }
}
