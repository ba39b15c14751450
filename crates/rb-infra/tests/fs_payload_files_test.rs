//! Real-filesystem payload file access.

use std::path::Path;

use rb_core::ports::PayloadFilesPort;
use rb_infra::FsPayloadFiles;

async fn write(path: &Path, bytes: &[u8]) {
    tokio::fs::write(path, bytes).await.unwrap();
}

#[tokio::test]
async fn ensure_root_creates_nested_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a").join("b");
    let files = FsPayloadFiles::new();
    files.ensure_root(&root).await.unwrap();
    assert!(files.exists(&root).await);
    // idempotent
    files.ensure_root(&root).await.unwrap();
}

#[tokio::test]
async fn list_returns_only_matching_regular_files() {
    let dir = tempfile::tempdir().unwrap();
    let files = FsPayloadFiles::new();
    write(&dir.path().join("one.bin"), b"payload one").await;
    write(&dir.path().join("two.bin"), b"payload two!").await;
    write(&dir.path().join("notes.txt"), b"not a payload").await;
    tokio::fs::create_dir(dir.path().join("folder.bin"))
        .await
        .unwrap();

    let mut listed = files.list(dir.path(), "bin").await.unwrap();
    listed.sort_by(|a, b| a.path.cmp(&b.path));

    let names: Vec<_> = listed.iter().map(|f| f.file_name()).collect();
    assert_eq!(names, ["one.bin", "two.bin"]);
    assert_eq!(listed[0].size, 11);
    assert_eq!(listed[1].size, 12);
    assert!(listed[0].modified.is_some());
}

#[tokio::test]
async fn copy_refuses_to_clobber() {
    let dir = tempfile::tempdir().unwrap();
    let files = FsPayloadFiles::new();
    let from = dir.path().join("src.bin");
    let to = dir.path().join("dst.bin");
    write(&from, b"data").await;

    files.copy(&from, &to).await.unwrap();
    assert_eq!(files.read(&to).await.unwrap(), b"data");
    assert!(files.exists(&from).await, "copy keeps the source");

    let error = files.copy(&from, &to).await.unwrap_err();
    assert_eq!(error.kind(), std::io::ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn rename_moves_and_refuses_to_clobber() {
    let dir = tempfile::tempdir().unwrap();
    let files = FsPayloadFiles::new();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    write(&a, b"aaa").await;
    write(&b, b"bbb").await;

    let error = files.rename(&a, &b).await.unwrap_err();
    assert_eq!(error.kind(), std::io::ErrorKind::AlreadyExists);
    assert_eq!(files.read(&b).await.unwrap(), b"bbb", "target untouched");

    let c = dir.path().join("c.bin");
    files.rename(&a, &c).await.unwrap();
    assert!(!files.exists(&a).await);
    assert_eq!(files.read(&c).await.unwrap(), b"aaa");
}

#[tokio::test]
async fn stat_and_file_size_report_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let files = FsPayloadFiles::new();
    let path = dir.path().join("p.bin");
    write(&path, &[0u8; 4096]).await;

    assert_eq!(files.file_size(&path).await.unwrap(), 4096);
    let stat = files.stat(&path).await.unwrap();
    assert_eq!(stat.size, 4096);
    assert_eq!(stat.file_name(), "p.bin");

    let missing = dir.path().join("missing.bin");
    assert!(files.file_size(&missing).await.is_err());
}
