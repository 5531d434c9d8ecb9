// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Contract tests run against every Filesystem implementation.

use tabula_fs::{
    AppendFlags, Filesystem, FsError, LocalFilesystem, MemoryFilesystem, MetricsFilesystem,
    OpenFlags, RetryPolicy, SmartFd,
};
use tempfile::TempDir;

fn exercise_lifecycle(fs: &dyn Filesystem) {
    fs.mkdirs("/logs/user").unwrap();
    fs.mkdirs("/logs/user").unwrap();
    assert!(fs.exists("/logs/user").unwrap());

    for (num, body) in [(0, &b"zero"[..]), (1, &b"one"[..]), (5, &b"five!"[..])] {
        let mut fd = SmartFd::new(format!("/logs/user/{num}"), OpenFlags::Overwrite);
        fs.create(&mut fd, -1).unwrap();
        fs.append(&fd, body, AppendFlags::Sync).unwrap();
        fs.sync(&fd).unwrap();
        fs.close(&mut fd).unwrap();
    }

    let mut names: Vec<String> = fs
        .readdir("/logs/user")
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["0", "1", "5"]);
    assert_eq!(fs.length("/logs/user/5").unwrap(), 5);

    let mut reader = SmartFd::new("/logs/user/1", OpenFlags::Read);
    fs.open(&mut reader).unwrap();
    assert_eq!(fs.pread(&reader, 0, 64).unwrap(), b"one");
    fs.close(&mut reader).unwrap();

    fs.remove("/logs/user/0").unwrap();
    assert!(!fs.exists("/logs/user/0").unwrap());
    assert!(fs.remove("/logs/user/0").unwrap_err().is_not_found());

    fs.rmdir("/logs/user").unwrap();
    assert!(!fs.exists("/logs/user").unwrap());
}

fn exercise_closed_handle(fs: &dyn Filesystem) {
    let mut fd = SmartFd::new("/closed", OpenFlags::Overwrite);
    fs.create(&mut fd, -1).unwrap();
    fs.close(&mut fd).unwrap();

    let err = fs.append(&fd, b"late", AppendFlags::None).unwrap_err();
    assert!(matches!(err, FsError::Closed(_)));
    assert!(err.is_transient());
}

#[test]
fn test_local_filesystem_contract() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFilesystem::new(dir.path()).unwrap();
    exercise_lifecycle(&fs);
    exercise_closed_handle(&fs);
}

#[test]
fn test_memory_filesystem_contract() {
    let fs = MemoryFilesystem::new();
    exercise_lifecycle(&fs);
    exercise_closed_handle(&fs);
}

#[test]
fn test_metrics_filesystem_contract() {
    let fs = MetricsFilesystem::new(MemoryFilesystem::new());
    exercise_lifecycle(&fs);
    exercise_closed_handle(&fs);

    let stats = fs.stats();
    assert_eq!(stats.create_count, 4);
    assert_eq!(stats.append_count, 3);
    assert_eq!(stats.bytes_appended, 12);
    assert_eq!(stats.error_count, 2);
}

#[test]
fn test_retry_policy_deserializes_with_defaults() {
    let policy: RetryPolicy = serde_json::from_str(r#"{"retry_delay_ms": 10}"#).unwrap();
    assert_eq!(policy.write_retry_limit, RetryPolicy::DEFAULT_WRITE_RETRY_LIMIT);
    assert_eq!(policy.retry_delay_ms, 10);
}
