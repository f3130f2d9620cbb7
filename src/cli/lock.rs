use crate::bundling::{CarrierError, RepositoryHandle};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use tracing::debug;

/// Run `f` while holding the repository's advisory write lock.
///
/// Blocks until any other git-carrier process working on the same
/// repository has finished.
pub fn with_repository_lock<T>(
    repo: &RepositoryHandle,
    f: impl FnOnce() -> Result<T, CarrierError>,
) -> Result<T, CarrierError> {
    let path = repo.lock_path();
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;
    let mut lock = RwLock::new(file);
    let _guard = lock.write()?;
    debug!(path = %path.display(), "acquired repository lock");
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RepositoryHandle::new(dir.path(), dir.path());

        let inner = with_repository_lock(&repo, || {
            let other = OpenOptions::new()
                .write(true)
                .open(repo.lock_path())
                .unwrap();
            let mut other = RwLock::new(other);
            let busy = other.try_write().is_err();
            Ok(busy)
        })
        .unwrap();
        assert!(inner);

        let mut after = RwLock::new(
            OpenOptions::new()
                .write(true)
                .open(repo.lock_path())
                .unwrap(),
        );
        assert!(after.try_write().is_ok());
    }

    #[test]
    fn errors_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RepositoryHandle::new(dir.path(), dir.path());
        let err = with_repository_lock::<()>(&repo, || {
            Err(CarrierError::EmptyRange {
                reference: "main".into(),
                base: None,
            })
        })
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EmptyRangeError);
    }
}
