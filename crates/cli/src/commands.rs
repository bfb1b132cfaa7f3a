use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{info, warn};
use writers_backup_core::{BackupKind, BackupRecord, BackupScope};
use writers_backup_scheduler::AutoBackupScheduler;
use writers_backup_storage::{BackupEngine, BackupStore, RestoreOptions, StoreStats, VerifyReport};

use crate::cli::Command;

/// How often `watch` checks whether any timer is still registered.
const WATCH_POLL: Duration = Duration::from_secs(1);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Listing<'a> {
    source_path: &'a Path,
    #[serde(flatten)]
    stats: StoreStats,
    records: &'a [BackupRecord],
}

/// Runs one subcommand. `Ok(false)` means it completed but found a problem,
/// such as a damaged artifact.
pub async fn run<W: Write>(command: Command, engine: &BackupEngine, json: bool, out: &mut W) -> Result<bool> {
    match command {
        Command::Create { path, project } => {
            let record = engine
                .capture_scoped(&path, scope(project), BackupKind::Manual)
                .await
                .with_context(|| format!("backing up {}", path.display()))?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
            } else {
                writeln!(
                    out,
                    "created {} ({})",
                    record.artifact_path.display(),
                    format_size(record.size_bytes)
                )?;
            }
        }
        Command::Restore {
            artifact,
            destination,
            no_safety_backup,
        } => {
            let destination = match destination {
                Some(destination) => destination,
                None => BackupStore::for_artifact(&artifact, engine.settings())
                    .with_context(|| format!("resolving the source of {}", artifact.display()))?
                    .source_path()
                    .to_path_buf(),
            };
            let options = RestoreOptions {
                backup_current_first: !no_safety_backup,
            };
            engine
                .restore(&artifact, &destination, options)
                .await
                .with_context(|| format!("restoring {}", artifact.display()))?;
            if json {
                let value = serde_json::json!({
                    "artifactPath": artifact,
                    "destination": destination,
                });
                writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
            } else {
                writeln!(out, "restored {} -> {}", artifact.display(), destination.display())?;
            }
        }
        Command::List { path, project } => {
            let records = engine
                .list(&path, scope(project))
                .await
                .with_context(|| format!("listing backups of {}", path.display()))?;
            out.write_all(render_list(&path, &records, json)?.as_bytes())?;
        }
        Command::Delete { artifact } => {
            let removed = engine
                .delete(&artifact)
                .await
                .with_context(|| format!("deleting {}", artifact.display()))?;
            if json {
                let value = serde_json::json!({ "artifactPath": artifact, "removed": removed });
                writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
            } else if removed {
                writeln!(out, "deleted {}", artifact.display())?;
            } else {
                writeln!(out, "{} was already gone", artifact.display())?;
            }
        }
        Command::Verify { artifact } => {
            let report = engine
                .verify(&artifact)
                .await
                .with_context(|| format!("verifying {}", artifact.display()))?;
            out.write_all(render_verify(&report, json)?.as_bytes())?;
            return Ok(report.is_ok());
        }
        Command::Watch {
            paths,
            project,
            interval_ms,
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| engine.settings().backup_interval());
            watch(engine, &paths, scope(project), interval).await?;
        }
    }
    Ok(true)
}

async fn watch(engine: &BackupEngine, paths: &[PathBuf], scope: BackupScope, interval: Duration) -> Result<()> {
    let scheduler = AutoBackupScheduler::new(engine.clone(), engine.events().clone());
    for path in paths {
        scheduler
            .start_scoped(path, scope, interval)
            .with_context(|| format!("scheduling backups of {}", path.display()))?;
    }
    info!(
        sources = paths.len(),
        interval_ms = interval_millis(interval),
        "watching, press Ctrl-C to stop"
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("listening for Ctrl-C")?;
                info!("interrupted, stopping auto-backups");
                break;
            }
            _ = tokio::time::sleep(WATCH_POLL) => {
                if scheduler.registered_paths().is_empty() {
                    warn!("no watched sources remain");
                    break;
                }
            }
        }
    }
    scheduler.stop_all().await;
    Ok(())
}

fn interval_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

fn scope(project: bool) -> BackupScope {
    if project {
        BackupScope::Project
    } else {
        BackupScope::File
    }
}

pub fn render_list(source: &Path, records: &[BackupRecord], json: bool) -> Result<String> {
    let stats = StoreStats::of(records);
    if json {
        let listing = Listing {
            source_path: source,
            stats,
            records,
        };
        return Ok(serde_json::to_string_pretty(&listing)? + "\n");
    }

    if records.is_empty() {
        return Ok(format!("no backups of {}\n", source.display()));
    }
    let mut text = String::new();
    for record in records {
        text.push_str(&format!(
            "{}  {:<11}  {:>9}  {}\n",
            record.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            record.kind,
            format_size(record.size_bytes),
            record.artifact_path.display()
        ));
    }
    text.push_str(&format!(
        "{} backup{}, {} total\n",
        stats.count,
        if stats.count == 1 { "" } else { "s" },
        format_size(stats.total_bytes)
    ));
    Ok(text)
}

pub fn render_verify(report: &VerifyReport, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(report)? + "\n");
    }
    let path = report.artifact_path.display();
    if !report.exists {
        return Ok(format!("{path}: missing\n"));
    }
    let mut problems = Vec::new();
    if !report.size_matches {
        problems.push("size differs from the recorded size");
    }
    if report.hash_matches == Some(false) {
        problems.push("content hash mismatch");
    }
    if report.archive_readable == Some(false) {
        problems.push("archive can not be decoded");
    }
    if problems.is_empty() {
        Ok(format!("{path}: ok\n"))
    } else {
        Ok(format!("{path}: {}\n", problems.join("; ")))
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(size_bytes: u64) -> BackupRecord {
        BackupRecord {
            id: "abc".to_owned(),
            source_path: PathBuf::from("/novel/draft.md"),
            artifact_path: PathBuf::from("/novel/.backups/draft.md.2026-10-17T09-05-03-042Z.backup"),
            created_at: Utc.with_ymd_and_hms(2026, 10, 17, 9, 5, 3).unwrap(),
            size_bytes,
            kind: BackupKind::Automatic,
            content_hash: None,
        }
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(5), "5 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn interval_millis_saturates() {
        assert_eq!(interval_millis(Duration::from_secs(300)), 300_000);
        assert_eq!(interval_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn list_text_ends_with_totals() {
        let text = render_list(Path::new("/novel/draft.md"), &[record(5), record(2048)], false).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("2026-10-17T09:05:03.000Z  automatic"));
        assert_eq!(lines[2], "2 backups, 2.0 KB total");

        let empty = render_list(Path::new("/novel/draft.md"), &[], false).unwrap();
        assert_eq!(empty, "no backups of /novel/draft.md\n");
    }

    #[test]
    fn list_json_carries_stats() {
        let raw = render_list(Path::new("/novel/draft.md"), &[record(5)], true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["totalBytes"], 5);
        assert_eq!(value["records"][0]["kind"], "automatic");
    }

    #[test]
    fn verify_text_names_each_problem() {
        let report = VerifyReport {
            artifact_path: PathBuf::from("/x/a.backup"),
            exists: true,
            size_matches: false,
            hash_matches: Some(false),
            archive_readable: None,
        };
        assert_eq!(
            render_verify(&report, false).unwrap(),
            "/x/a.backup: size differs from the recorded size; content hash mismatch\n"
        );
    }
}
