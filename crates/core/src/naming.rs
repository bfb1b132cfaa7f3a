//! Artifact file names.
//!
//! An artifact is named `<basename>.<stamp>.<ext>`, where `<stamp>` is the
//! capture instant as fixed-width ISO-8601 UTC with millisecond precision and
//! `:`/`.` replaced by `-`:
//!
//! ```text
//! notes.md.2026-10-17T09-05-03-042Z.backup
//! notes.md.2026-10-17T09-05-03-042Z_0001.backup
//! ```
//!
//! The second form carries a sequence suffix and is only produced when another
//! artifact of the same source already uses that millisecond. Every stamp
//! field is fixed width and `_` sorts above `.`, so lexicographic order of
//! names for one source is also capture order.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Default artifact extension for single-file backups.
pub const DEFAULT_EXTENSION: &str = "backup";

/// Length of an encoded stamp, e.g. `2026-10-17T09-05-03-042Z`.
const STAMP_LEN: usize = 24;

/// Width of the zero-padded disambiguation sequence.
const SEQ_WIDTH: usize = 4;

const SEQ_SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub basename: String,
    pub created_at: DateTime<Utc>,
    pub seq: u32,
}

impl ArtifactName {
    pub fn new(basename: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            basename: basename.into(),
            created_at: truncate_to_millis(created_at),
            seq: 0,
        }
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn render(&self, extension: &str) -> String {
        let stamp = format_stamp(self.created_at);
        let ext = normalize_extension(extension);
        if self.seq == 0 {
            format!("{}.{stamp}.{ext}", self.basename)
        } else {
            format!("{}.{stamp}{SEQ_SEPARATOR}{:0width$}.{ext}", self.basename, self.seq, width = SEQ_WIDTH)
        }
    }

    /// Decodes a name produced by [`ArtifactName::render`] with the same
    /// extension. Anything else yields `None`.
    pub fn parse(name: &str, extension: &str) -> Option<Self> {
        let ext = normalize_extension(extension);
        let stem = name.strip_suffix(ext)?.strip_suffix('.')?;
        let (basename, tail) = stem.rsplit_once('.')?;
        if basename.is_empty() {
            return None;
        }

        let stamp = tail.get(..STAMP_LEN)?;
        let created_at = parse_stamp(stamp)?;
        let seq = match tail.get(STAMP_LEN..)? {
            "" => 0,
            suffix => {
                let digits = suffix.strip_prefix(SEQ_SEPARATOR)?;
                if digits.len() < SEQ_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                match digits.parse::<u32>().ok()? {
                    0 => return None,
                    n => n,
                }
            }
        };

        Some(Self {
            basename: basename.to_owned(),
            created_at,
            seq,
        })
    }
}

/// Name for a capture of `source` at `instant`, or `None` when the path has no
/// usable final component.
pub fn artifact_name(source: &Path, instant: DateTime<Utc>, extension: &str) -> Option<String> {
    let basename = source_basename(source)?;
    Some(ArtifactName::new(basename, instant).render(extension))
}

pub fn parse_instant(name: &str, extension: &str) -> Option<DateTime<Utc>> {
    ArtifactName::parse(name, extension).map(|n| n.created_at)
}

pub fn parse_source_basename(name: &str, extension: &str) -> Option<String> {
    ArtifactName::parse(name, extension).map(|n| n.basename)
}

pub fn source_basename(source: &Path) -> Option<&str> {
    source.file_name().and_then(|n| n.to_str()).filter(|n| !n.is_empty())
}

pub fn normalize_extension(extension: &str) -> &str {
    extension.trim().trim_start_matches('.')
}

/// Names only carry millisecond precision; instants are truncated before use
/// so the recorded `created_at` matches what the name decodes to.
pub fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(3)
}

fn format_stamp(instant: DateTime<Utc>) -> String {
    instant
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    let bytes = stamp.as_bytes();
    if bytes.len() != STAMP_LEN || !stamp.is_ascii() || bytes[10] != b'T' || bytes[23] != b'Z' {
        return None;
    }
    let rfc3339 = format!(
        "{}T{}:{}:{}.{}Z",
        &stamp[..10],
        &stamp[11..13],
        &stamp[14..16],
        &stamp[17..19],
        &stamp[20..23]
    );
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn instant(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    #[test]
    fn name_format_is_path_safe() {
        let name = artifact_name(
            Path::new("/books/novel/notes.md"),
            instant("2026-10-17T09:05:03.042Z"),
            ".backup",
        )
        .expect("name");
        assert_eq!(name, "notes.md.2026-10-17T09-05-03-042Z.backup");
        assert!(!name.contains(':'));
        assert!(!Path::new(&name).has_root());
    }

    #[test]
    fn round_trips_instant_and_basename() {
        let cases = [
            ("/books/novel/notes.md", "2026-10-17T09:05:03.042Z"),
            ("chapter-01.md", "1999-12-31T23:59:59.999Z"),
            ("/tmp/no_extension", "2030-01-01T00:00:00Z"),
            ("/tmp/many.dots.in.name.txt", "2026-02-13T01:00:00.500Z"),
        ];
        for (source, at) in cases {
            let at = instant(at);
            let name = artifact_name(Path::new(source), at, "backup").expect("name");
            assert_eq!(parse_instant(&name, "backup"), Some(at), "{name}");
            assert_eq!(
                parse_source_basename(&name, "backup").as_deref(),
                source_basename(Path::new(source)),
                "{name}"
            );
        }
    }

    #[test]
    fn sequence_suffix_round_trips_and_sorts_after_plain_name() {
        let at = instant("2026-10-17T09:05:03.042Z");
        let plain = ArtifactName::new("draft.md", at).render("backup");
        let first = ArtifactName::new("draft.md", at).with_seq(1).render("backup");
        let tenth = ArtifactName::new("draft.md", at).with_seq(10).render("backup");

        assert_eq!(first, "draft.md.2026-10-17T09-05-03-042Z_0001.backup");
        assert!(plain < first);
        assert!(first < tenth);

        let parsed = ArtifactName::parse(&tenth, "backup").expect("parse");
        assert_eq!(parsed.seq, 10);
        assert_eq!(parsed.created_at, at);
        assert_eq!(parsed.basename, "draft.md");
    }

    #[test]
    fn names_sort_chronologically() {
        let earlier = artifact_name(Path::new("a.md"), instant("2026-01-09T23:59:59.999Z"), "backup");
        let later = artifact_name(Path::new("a.md"), instant("2026-01-10T00:00:00.000Z"), "backup");
        assert!(earlier < later);
    }

    #[test]
    fn multi_part_extension_is_supported() {
        let at = instant("2026-03-01T12:00:00Z");
        let name = artifact_name(&PathBuf::from("/data/my-novel"), at, "tar.zst").expect("name");
        assert_eq!(name, "my-novel.2026-03-01T12-00-00-000Z.tar.zst");
        assert_eq!(parse_instant(&name, ".tar.zst"), Some(at));
    }

    #[test]
    fn sub_millisecond_precision_is_truncated() {
        let precise = instant("2026-10-17T09:05:03.042999Z");
        let name = ArtifactName::new("x.md", precise);
        assert_eq!(name.created_at, instant("2026-10-17T09:05:03.042Z"));
    }

    #[test]
    fn rejects_foreign_names() {
        for name in [
            "notes.md",
            "notes.md.index.json",
            ".2026-10-17T09-05-03-042Z.backup",
            "notes.md.2026-10-17T09-05-03-042Z.bak",
            "notes.md.2026-13-17T09-05-03-042Z.backup",
            "notes.md.2026-10-17T09-05-03-042Z_0000.backup",
            "notes.md.2026-10-17T09-05-03-042Z_x1.backup",
            "notes.md.2026-10-17T09-05-03-042Z_12.backup",
            "notes.md.2026-10-17T09-05-03-042Z-0001.backup",
            ".wb-tmp-abc123.partial",
        ] {
            assert!(ArtifactName::parse(name, "backup").is_none(), "{name}");
        }
    }

    #[test]
    fn root_path_has_no_name() {
        assert!(artifact_name(Path::new("/"), Utc::now(), "backup").is_none());
    }
}
