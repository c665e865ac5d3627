use async_recursion::async_recursion;
use tracing::instrument;

use crate::shutdown::ShutdownToken;

/// A candidate photo found on the media, with its modification time captured
/// at scan time.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: std::path::PathBuf,
    pub modified: std::time::SystemTime,
}

// Disc index metadata carries this fragment in its name; photos don't.
const INDEX_MARKER: &str = "index";

fn is_index_file(path: &std::path::Path) -> bool {
    path.file_name()
        .map(|name| {
            name.to_string_lossy()
                .to_lowercase()
                .contains(INDEX_MARKER)
        })
        .unwrap_or(false)
}

/// Enumerate regular files under `root`, skipping disc index metadata.
///
/// Unreadable directories are logged and skipped, never fatal: slow or
/// damaged media should still yield whatever can be read. Cancellation is
/// checked at every directory loop head and returns the subset found so far,
/// also not an error. No ordering is guaranteed.
#[instrument(skip(shutdown))]
pub async fn scan(root: &std::path::Path, shutdown: &ShutdownToken) -> Vec<SourceFile> {
    let mut files = Vec::new();
    walk(root, shutdown, &mut files).await;
    tracing::debug!("scan of {:?} found {} files", root, files.len());
    files
}

#[async_recursion]
async fn walk(dir: &std::path::Path, shutdown: &ShutdownToken, files: &mut Vec<SourceFile>) {
    if shutdown.is_triggered() {
        return;
    }
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!("cannot open directory {:?} for reading: {}", dir, error);
            return;
        }
    };
    loop {
        if shutdown.is_triggered() {
            return;
        }
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                tracing::warn!("failed traversing directory {:?}: {}", dir, error);
                break;
            }
        };
        let path = entry.path();
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!("failed reading metadata from {:?}: {}", &path, error);
                continue;
            }
        };
        if metadata.is_dir() {
            walk(&path, shutdown, files).await;
        } else if metadata.is_file() {
            if is_index_file(&path) {
                tracing::debug!("skipping index metadata {:?}", &path);
                continue;
            }
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(error) => {
                    tracing::warn!("no modification time for {:?}: {}", &path, error);
                    continue;
                }
            };
            files.push(SourceFile { path, modified });
        }
        // symlinks and special files are not photos; skip silently
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;

    #[tokio::test]
    async fn finds_regular_files_recursively() {
        let tmp_dir = testutils::setup_media_dir().await.unwrap();
        let shutdown = ShutdownToken::new();
        let mut names: Vec<String> = scan(&tmp_dir.join("Pictures"), &shutdown)
            .await
            .iter()
            .map(|f| {
                f.path
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        assert_eq!(names, ["IMG_0001.jpg", "IMG_0002.jpg", "IMG_0003.png"]);
    }

    #[tokio::test]
    async fn excludes_index_files_case_insensitively() {
        assert!(is_index_file(std::path::Path::new("/cd/index.html")));
        assert!(is_index_file(std::path::Path::new("/cd/PhotoINDEX.db")));
        assert!(is_index_file(std::path::Path::new("/cd/Indexes.txt")));
        assert!(!is_index_file(std::path::Path::new("/cd/IMG_0001.jpg")));
    }

    #[tokio::test]
    async fn skips_symlinks() {
        let tmp_dir = testutils::setup_media_dir().await.unwrap();
        let pictures = tmp_dir.join("Pictures");
        tokio::fs::symlink(pictures.join("IMG_0001.jpg"), pictures.join("link.jpg"))
            .await
            .unwrap();
        let shutdown = ShutdownToken::new();
        let files = scan(&pictures, &shutdown).await;
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| !f.path.ends_with("link.jpg")));
    }

    #[tokio::test]
    async fn unreadable_root_yields_empty_set() {
        let shutdown = ShutdownToken::new();
        let files = scan(std::path::Path::new("/definitely/not/a/dir"), &shutdown).await;
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn shutdown_aborts_traversal() {
        let tmp_dir = testutils::setup_media_dir().await.unwrap();
        let shutdown = ShutdownToken::new();
        shutdown.trigger();
        let files = scan(&tmp_dir.join("Pictures"), &shutdown).await;
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn captures_modification_time() {
        let tmp_dir = testutils::setup_media_dir().await.unwrap();
        let photo = tmp_dir.join("Pictures").join("IMG_0001.jpg");
        let stamp = testutils::local_time(2024, 1, 1, 12, 0, 0);
        testutils::pin_mtime(&photo, stamp).unwrap();
        let shutdown = ShutdownToken::new();
        let files = scan(&tmp_dir.join("Pictures"), &shutdown).await;
        let found = files.iter().find(|f| f.path == photo).unwrap();
        assert_eq!(found.modified, stamp);
    }
}
