use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{classify_io, content_root, copy_tree, manifest};
use crate::config::PublishTarget;
use crate::contract::{PublishError, PublishRecord, Publisher};

const CONTENT_DIR: &str = "content";
const HISTORY_FILE: &str = "history.jsonl";

/// Writes one record into the history of a destination directory.
type HistoryWriter = fn(&Path, &PublishRecord) -> io::Result<()>;

/// Publishes into `<root>/<location>/content`, recording every publish as one
/// JSON line in `<root>/<location>/history.jsonl`.
///
/// New content is staged next to the live directory and swapped in with
/// renames, so readers see either the old file set or the new one.
pub struct DirectoryPublisher {
    root: PathBuf,
    write_history: HistoryWriter,
}

impl DirectoryPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_history: append_history,
        }
    }

    #[cfg(test)]
    fn with_history_writer(mut self, writer: HistoryWriter) -> Self {
        self.write_history = writer;
        self
    }

    pub fn destination(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    /// Live content directory for `location`.
    pub fn content_dir(&self, location: &str) -> PathBuf {
        self.destination(location).join(CONTENT_DIR)
    }

    /// All records ever published to `location`, oldest first.
    pub fn history(&self, location: &str) -> Result<Vec<PublishRecord>, PublishError> {
        read_history(&self.destination(location))
    }
}

fn read_history(dest: &Path) -> Result<Vec<PublishRecord>, PublishError> {
    let path = dest.join(HISTORY_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(&path).map_err(classify_io)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(classify_io)?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PublishRecord = serde_json::from_str(&line).map_err(|e| {
            error!(error = ?e, path = %path.display(), "[PUBLISH] Corrupt history line");
            PublishError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Appends `record` by writing the whole new history to a sibling file and
/// renaming it over the old one. A failed write leaves the old file as it was.
fn append_history(dest: &Path, record: &PublishRecord) -> io::Result<()> {
    let path = dest.join(HISTORY_FILE);
    let mut line = serde_json::to_vec(record).map_err(io::Error::other)?;
    line.push(b'\n');

    let tmp = dest.join(format!(".{HISTORY_FILE}.{}", Uuid::new_v4()));
    let written = (|| -> io::Result<()> {
        if path.exists() {
            fs::copy(&path, &tmp)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&tmp)?;
        file.write_all(&line)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)
    })();

    if written.is_err() && tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(error = ?e, path = %tmp.display(), "[PUBLISH] Failed to remove temporary history file");
        }
    }
    written
}

fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!(error = ?e, path = %path.display(), "[PUBLISH] Failed to remove leftover directory");
        }
    }
}

/// Renames `from` to `to` as part of a rollback, collecting the failure.
fn restore(from: &Path, to: &Path, failures: &mut Vec<String>) -> bool {
    match fs::rename(from, to) {
        Ok(()) => true,
        Err(e) => {
            error!(
                error = ?e,
                from = %from.display(),
                to = %to.display(),
                "[PUBLISH] Rollback rename failed"
            );
            failures.push(format!("{} -> {}: {e}", from.display(), to.display()));
            false
        }
    }
}

fn rolled_back(cause: io::Error, failures: Vec<String>) -> PublishError {
    let cause = classify_io(cause);
    if failures.is_empty() {
        cause
    } else {
        PublishError::RollbackFailed {
            cause: Box::new(cause),
            restore: failures.join("; "),
        }
    }
}

fn publish_blocking(
    dest: &Path,
    source: &Path,
    target: &PublishTarget,
    write_history: HistoryWriter,
) -> Result<PublishRecord, PublishError> {
    fs::create_dir_all(dest).map_err(classify_io)?;
    let previous = read_history(dest)?;

    let nonce = Uuid::new_v4();
    let staging = dest.join(format!(".staging-{nonce}"));
    let retired = dest.join(format!(".retired-{nonce}"));
    let live = dest.join(CONTENT_DIR);

    let staged = fs::create_dir(&staging)
        .and_then(|_| copy_tree(source, &staging))
        .and_then(|_| manifest(&staging, &[]));
    let files = match staged {
        Ok(files) => files,
        Err(e) => {
            error!(error = ?e, staging = %staging.display(), "[PUBLISH] Staging failed, destination untouched");
            discard(&staging);
            return Err(classify_io(e));
        }
    };
    debug!(files = files.len(), "[PUBLISH] Staged content");

    let record = PublishRecord {
        id: nonce.to_string(),
        sequence: previous.len() as u64 + 1,
        destination: dest.display().to_string(),
        author: target.author.clone(),
        message: target.message(),
        published_at: Utc::now(),
        files,
    };

    let had_content = live.exists();
    if had_content {
        if let Err(e) = fs::rename(&live, &retired) {
            error!(error = ?e, "[PUBLISH] Could not retire live content");
            discard(&staging);
            return Err(classify_io(e));
        }
    }
    if let Err(e) = fs::rename(&staging, &live) {
        error!(error = ?e, "[PUBLISH] Could not swap staged content in, restoring");
        let mut failures = Vec::new();
        let restored = !had_content || restore(&retired, &live, &mut failures);
        discard(&staging);
        if !restored {
            warn!(retired = %retired.display(), "[PUBLISH] Previous content kept aside for recovery");
        }
        return Err(rolled_back(e, failures));
    }

    if let Err(e) = write_history(dest, &record) {
        error!(error = ?e, "[PUBLISH] Could not record publish, rolling back");
        let mut failures = Vec::new();
        if restore(&live, &staging, &mut failures) {
            discard(&staging);
            if had_content && !restore(&retired, &live, &mut failures) {
                warn!(retired = %retired.display(), "[PUBLISH] Previous content kept aside for recovery");
            }
        }
        return Err(rolled_back(e, failures));
    }

    discard(&retired);
    Ok(record)
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    async fn publish(
        &self,
        artifact_path: &Path,
        target: &PublishTarget,
    ) -> Result<PublishRecord, PublishError> {
        let source = content_root(artifact_path, target)?;
        let dest = self.destination(&target.branch_or_location);
        info!(
            source = %source.display(),
            destination = %dest.display(),
            "[PUBLISH] Publishing artifact to directory"
        );

        let target = target.clone();
        let write_history = self.write_history;
        let record = tokio::task::spawn_blocking(move || {
            publish_blocking(&dest, &source, &target, write_history)
        })
        .await
        .map_err(|e| PublishError::Io(io::Error::other(e)))??;

        info!(
            id = %record.id,
            sequence = record.sequence,
            files = record.files.len(),
            "[PUBLISH] Directory publish complete"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorIdentity;

    fn write_artifact(dir: &Path, files: &[(&str, &str)]) {
        for (path, body) in files {
            let p = dir.join(path);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, body).unwrap();
        }
    }

    #[tokio::test]
    async fn first_publish_creates_content_and_history() {
        let artifact = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        write_artifact(artifact.path(), &[("index.html", "<h1>docs</h1>")]);

        let publisher = DirectoryPublisher::new(root.path());
        let target = PublishTarget::new("gh-pages", AuthorIdentity::default());
        let record = publisher.publish(artifact.path(), &target).await.unwrap();

        assert_eq!(record.sequence, 1);
        assert_eq!(record.message, "deploy: local");
        assert_eq!(
            fs::read_to_string(publisher.content_dir("gh-pages").join("index.html")).unwrap(),
            "<h1>docs</h1>"
        );
        assert_eq!(publisher.history("gh-pages").unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn history_of_unknown_location_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let publisher = DirectoryPublisher::new(root.path());
        assert!(publisher.history("nowhere").unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_staging_directories_survive_a_publish() {
        let artifact = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        write_artifact(artifact.path(), &[("a.html", "a")]);
        let publisher = DirectoryPublisher::new(root.path());
        let target = PublishTarget::new("site", AuthorIdentity::default());
        publisher.publish(artifact.path(), &target).await.unwrap();
        publisher.publish(artifact.path(), &target).await.unwrap();

        let mut names: Vec<String> = fs::read_dir(publisher.destination("site"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![CONTENT_DIR, HISTORY_FILE]);
    }

    fn failing_history(_: &Path, _: &PublishRecord) -> io::Result<()> {
        Err(io::Error::other("disk full"))
    }

    #[tokio::test]
    async fn history_failure_after_swap_restores_previous_content() {
        let root = tempfile::tempdir().unwrap();
        let target = PublishTarget::new("site", AuthorIdentity::default());

        let v1 = tempfile::tempdir().unwrap();
        write_artifact(v1.path(), &[("index.html", "v1"), ("old.html", "old")]);
        let first = DirectoryPublisher::new(root.path())
            .publish(v1.path(), &target)
            .await
            .unwrap();

        let v2 = tempfile::tempdir().unwrap();
        write_artifact(v2.path(), &[("index.html", "v2")]);
        let broken = DirectoryPublisher::new(root.path()).with_history_writer(failing_history);
        let err = broken.publish(v2.path(), &target).await.unwrap_err();
        assert!(matches!(err, PublishError::Io(_)), "got {err:?}");

        let content = broken.content_dir("site");
        assert_eq!(fs::read_to_string(content.join("index.html")).unwrap(), "v1");
        assert_eq!(fs::read_to_string(content.join("old.html")).unwrap(), "old");
        assert_eq!(broken.history("site").unwrap(), vec![first]);

        let mut names: Vec<String> = fs::read_dir(broken.destination("site"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![CONTENT_DIR, HISTORY_FILE]);
    }

    #[tokio::test]
    async fn history_failure_on_first_publish_leaves_no_content() {
        let root = tempfile::tempdir().unwrap();
        let artifact = tempfile::tempdir().unwrap();
        write_artifact(artifact.path(), &[("index.html", "v1")]);
        let publisher = DirectoryPublisher::new(root.path()).with_history_writer(failing_history);
        let target = PublishTarget::new("site", AuthorIdentity::default());

        assert!(publisher.publish(artifact.path(), &target).await.is_err());
        assert!(!publisher.content_dir("site").exists());
        assert!(publisher.history("site").unwrap().is_empty());
    }

    #[test]
    fn history_append_keeps_earlier_lines_and_leaves_no_temp_file() {
        let dest = tempfile::tempdir().unwrap();
        let record = |sequence| PublishRecord {
            id: format!("v{sequence}"),
            sequence,
            destination: "d".into(),
            author: AuthorIdentity::default(),
            message: "m".into(),
            published_at: Utc::now(),
            files: Vec::new(),
        };
        append_history(dest.path(), &record(1)).unwrap();
        append_history(dest.path(), &record(2)).unwrap();

        let ids: Vec<_> = read_history(dest.path())
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["v1", "v2"]);
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_restore_is_reported_with_the_cause() {
        let err = rolled_back(
            io::Error::other("disk full"),
            vec!["content -> .staging: busy".into()],
        );
        match err {
            PublishError::RollbackFailed { cause, restore } => {
                assert!(matches!(*cause, PublishError::Io(_)));
                assert!(restore.contains("busy"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
