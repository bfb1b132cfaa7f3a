use std::fs;

use writers_backup_cli::cli::Command;
use writers_backup_cli::commands::run;
use writers_backup_core::{BackupRecord, BackupSettings};
use writers_backup_storage::{BackupEngine, EventSink};

fn engine(tmp: &tempfile::TempDir) -> BackupEngine {
    let settings = BackupSettings {
        data_root: tmp.path().join("data"),
        ..BackupSettings::default()
    };
    BackupEngine::new(settings, EventSink::disabled()).unwrap()
}

async fn run_text(engine: &BackupEngine, command: Command) -> (bool, String) {
    let mut out = Vec::new();
    let ok = run(command, engine, false, &mut out).await.unwrap();
    (ok, String::from_utf8(out).unwrap())
}

#[tokio::test]
async fn create_list_verify_restore_delete() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(&tmp);
    let draft = tmp.path().join("draft.md");
    fs::write(&draft, "chapter one").unwrap();

    let mut out = Vec::new();
    let ok = run(
        Command::Create {
            path: draft.clone(),
            project: false,
        },
        &engine,
        true,
        &mut out,
    )
    .await
    .unwrap();
    assert!(ok);
    let record: BackupRecord = serde_json::from_slice(&out).unwrap();
    assert_eq!(record.size_bytes, 11);

    let (_, listing) = run_text(
        &engine,
        Command::List {
            path: draft.clone(),
            project: false,
        },
    )
    .await;
    assert!(listing.contains(&record.artifact_path.display().to_string()));
    assert!(listing.ends_with("1 backup, 11 B total\n"));

    let (ok, report) = run_text(
        &engine,
        Command::Verify {
            artifact: record.artifact_path.clone(),
        },
    )
    .await;
    assert!(ok);
    assert!(report.ends_with(": ok\n"));

    fs::write(&draft, "chapter one, revised").unwrap();
    let (ok, _) = run_text(
        &engine,
        Command::Restore {
            artifact: record.artifact_path.clone(),
            destination: None,
            no_safety_backup: false,
        },
    )
    .await;
    assert!(ok);
    assert_eq!(fs::read_to_string(&draft).unwrap(), "chapter one");

    let (_, deleted) = run_text(
        &engine,
        Command::Delete {
            artifact: record.artifact_path.clone(),
        },
    )
    .await;
    assert!(deleted.starts_with("deleted "));

    let (_, listing) = run_text(
        &engine,
        Command::List {
            path: draft.clone(),
            project: false,
        },
    )
    .await;
    // only the pre-restore safety copy remains
    assert!(listing.ends_with("1 backup, 20 B total\n"), "{listing}");
}

#[tokio::test]
async fn verify_reports_failure_without_erroring() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(&tmp);
    let draft = tmp.path().join("draft.md");
    fs::write(&draft, "abc").unwrap();
    let record = engine
        .capture(&draft, writers_backup_core::BackupKind::Manual)
        .await
        .unwrap();
    fs::write(&record.artifact_path, "xyz").unwrap();

    let (ok, report) = run_text(
        &engine,
        Command::Verify {
            artifact: record.artifact_path.clone(),
        },
    )
    .await;
    assert!(!ok);
    assert!(report.contains("content hash mismatch"));
}

#[tokio::test]
async fn create_of_missing_file_is_an_error_with_context() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(&tmp);
    let mut out = Vec::new();
    let err = run(
        Command::Create {
            path: tmp.path().join("nope.md"),
            project: false,
        },
        &engine,
        false,
        &mut out,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().starts_with("backing up"));
    assert!(format!("{err:#}").contains("not found"));
}
