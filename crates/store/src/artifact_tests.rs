// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sbx_core::SessionId;

fn fs_store(root: &std::path::Path) -> FsArtifactStore {
    FsArtifactStore::new(root, 10 * 1024 * 1024)
}

#[tokio::test]
async fn upload_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = fs_store(dir.path());
    let session = SessionId::new();

    let descriptor = store.upload(&session, "data/out.json", b"{\"a\":1}").await.unwrap();
    assert_eq!(descriptor.path, "data/out.json");
    assert_eq!(descriptor.size_bytes, 7);
    assert_eq!(descriptor.mime_type, "application/json");
    assert!(descriptor.checksum.is_some());

    match store.download(&session, "data/out.json").await.unwrap() {
        Fetched::Inline(bytes) => assert_eq!(bytes, b"{\"a\":1}"),
        Fetched::Presigned(_) => panic!("small file should be inline"),
    }
}

#[tokio::test]
async fn large_files_come_back_presigned() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path(), 16);
    let session = SessionId::new();
    store.upload(&session, "big.bin", &[0u8; 64]).await.unwrap();

    match store.download(&session, "big.bin").await.unwrap() {
        Fetched::Presigned(url) => assert!(url.starts_with("file://")),
        Fetched::Inline(_) => panic!("large file should be presigned"),
    }
}

#[tokio::test]
async fn download_missing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = fs_store(dir.path());
    let err = store.download(&SessionId::new(), "nope.txt").await.unwrap_err();
    assert!(matches!(err, ArtifactError::NotFound(_)));
}

#[tokio::test]
async fn traversal_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = fs_store(dir.path());
    let session = SessionId::new();
    for bad in ["../escape.txt", "/etc/passwd", "a/../../b"] {
        let err = store.upload(&session, bad, b"x").await.unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidPath(_)), "{bad} should be rejected");
    }
}

#[tokio::test]
async fn list_walks_nested_dirs_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let store = fs_store(dir.path());
    let session = SessionId::new();
    store.upload(&session, "b.txt", b"b").await.unwrap();
    store.upload(&session, "sub/a.txt", b"a").await.unwrap();

    let listed = store.list(&session).await.unwrap();
    let paths: Vec<&str> = listed.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, vec!["b.txt", "sub/a.txt"]);
}

#[tokio::test]
async fn list_of_unknown_session_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = fs_store(dir.path());
    assert!(store.list(&SessionId::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_all_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = fs_store(dir.path());
    let session = SessionId::new();
    store.upload(&session, "x.txt", b"x").await.unwrap();

    store.delete_all(&session).await.unwrap();
    assert!(store.list(&session).await.unwrap().is_empty());
    // second delete of the now-absent prefix still succeeds
    store.delete_all(&session).await.unwrap();
}
