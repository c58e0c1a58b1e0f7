//! Disinfector: rename-then-rewrite removal of injected script nodes.
//!
//! The worm injects two `createNode script` blocks into ASCII scenes. Each
//! block starts at a header line naming the node and is followed by a fixed
//! number of `setAttr` lines. Cleaning moves the original aside to
//! `<path>.INFECTED` and streams it back to `<path>` through a two-state
//! filter:
//!
//! - `Copying`: a header line switches to `Skipping(n)` and is dropped; any
//!   other line is written out byte-for-byte, terminator included.
//! - `Skipping(n)`: the line is dropped whatever it contains; after `n`
//!   lines the filter returns to `Copying`.
//!
//! Binary scenes are only moved aside. The backup is never removed here;
//! a partial or structurally incomplete rewrite is.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use memchr::memmem;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::errors::{DephageError, Result};
use crate::core::paths::backup_path;
use crate::scanner::signature::ContentClass;

/// Structural part of every injected header line.
pub const SCRIPT_NODE_HEADER: &[u8] = b"createNode script -n";

// ──────────────────── block kinds ────────────────────

/// The two injected script nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Dropper node that writes `vaccine.py` into the user's scripts folder.
    VaccineGene,
    /// Payload node that re-infects every scene saved afterwards.
    BreedGene,
}

impl BlockKind {
    pub const ALL: [Self; 2] = [Self::VaccineGene, Self::BreedGene];

    /// Node-name token that appears on the header line.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::VaccineGene => "vaccine_gene",
            Self::BreedGene => "breed_gene",
        }
    }

    /// Lines after the header that belong to the block.
    #[must_use]
    pub const fn trailing_lines(self) -> usize {
        match self {
            Self::VaccineGene => 7,
            Self::BreedGene => 4,
        }
    }
}

/// Block kind whose header `line` is, if any.
#[must_use]
pub fn header_kind(line: &[u8]) -> Option<BlockKind> {
    if memmem::find(line, SCRIPT_NODE_HEADER).is_none() {
        return None;
    }
    BlockKind::ALL
        .into_iter()
        .find(|kind| memmem::find(line, kind.token().as_bytes()).is_some())
}

// ──────────────────── line filter ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Copying,
    Skipping(usize),
}

/// What one pass of the line filter saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StripReport {
    pub vaccine_blocks: usize,
    pub breed_blocks: usize,
    pub lines_kept: usize,
    pub lines_removed: usize,
}

impl StripReport {
    fn record(&mut self, kind: BlockKind) {
        match kind {
            BlockKind::VaccineGene => self.vaccine_blocks += 1,
            BlockKind::BreedGene => self.breed_blocks += 1,
        }
    }

    #[must_use]
    pub const fn blocks_of(&self, kind: BlockKind) -> usize {
        match kind {
            BlockKind::VaccineGene => self.vaccine_blocks,
            BlockKind::BreedGene => self.breed_blocks,
        }
    }

    /// Tokens of the block kinds that never appeared.
    #[must_use]
    pub fn missing_blocks(&self) -> Vec<&'static str> {
        BlockKind::ALL
            .into_iter()
            .filter(|kind| self.blocks_of(*kind) == 0)
            .map(BlockKind::token)
            .collect()
    }
}

/// Which side of the stream failed.
#[derive(Debug)]
pub enum StreamFault {
    Read(io::Error),
    Write(io::Error),
}

/// Copy `reader` to `writer`, dropping every injected block.
///
/// Lines are split on `\n` only and written back unchanged, so CRLF endings
/// and a missing final newline survive.
pub fn strip_injected_blocks<R, W>(
    reader: &mut R,
    writer: &mut W,
) -> std::result::Result<StripReport, StreamFault>
where
    R: BufRead,
    W: Write,
{
    let mut report = StripReport::default();
    let mut state = FilterState::Copying;
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(StreamFault::Read)?;
        if read == 0 {
            break;
        }

        if let FilterState::Skipping(remaining) = state {
            report.lines_removed += 1;
            state = if remaining > 1 {
                FilterState::Skipping(remaining - 1)
            } else {
                FilterState::Copying
            };
            continue;
        }

        if let Some(kind) = header_kind(&line) {
            report.record(kind);
            report.lines_removed += 1;
            state = FilterState::Skipping(kind.trailing_lines());
            continue;
        }

        writer.write_all(&line).map_err(StreamFault::Write)?;
        report.lines_kept += 1;
    }

    writer.flush().map_err(StreamFault::Write)?;
    Ok(report)
}

// ──────────────────── clean ────────────────────

/// Successful result of [`clean`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    /// Text scene rewritten without the injected blocks.
    Disinfected { backup: PathBuf, report: StripReport },
    /// Binary scene moved aside untouched; nothing is left at the original path.
    Quarantined { backup: PathBuf },
}

impl CleanOutcome {
    #[must_use]
    pub fn backup(&self) -> &Path {
        match self {
            Self::Disinfected { backup, .. } | Self::Quarantined { backup } => backup,
        }
    }
}

/// Move `path` aside to `<path>.INFECTED` and, for text, rewrite it clean.
///
/// Failure contract:
/// - backup rename fails: nothing was changed.
/// - read/write fails mid-stream: the partial rewrite is removed.
/// - a block kind is never seen: the rewrite is removed and
///   [`DephageError::StructureNotFound`] is returned.
///
/// The backup survives every outcome. Re-scanning the rewritten file is the
/// caller's job.
pub fn clean(path: &Path, content: ContentClass) -> Result<CleanOutcome> {
    clean_with(
        path,
        content,
        |input| BufReader::with_capacity(64 * 1024, input),
        |output| BufWriter::with_capacity(64 * 1024, output),
    )
}

/// [`clean`] with the stream adapters around the backup and rewrite handles
/// supplied by the caller.
fn clean_with<R, W>(
    path: &Path,
    content: ContentClass,
    wrap_reader: impl FnOnce(File) -> R,
    wrap_writer: impl FnOnce(File) -> W,
) -> Result<CleanOutcome>
where
    R: BufRead,
    W: Write,
{
    let backup = backup_path(path);
    move_aside(path, &backup)?;

    if !content.is_text() {
        return Ok(CleanOutcome::Quarantined { backup });
    }

    let input = File::open(&backup).map_err(|source| DephageError::read(&backup, source))?;
    let output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| DephageError::write(path, source))?;

    let mut reader = wrap_reader(input);
    let mut writer = wrap_writer(output);
    let streamed = strip_injected_blocks(&mut reader, &mut writer);
    drop(writer);

    let report = match streamed {
        Ok(report) => report,
        Err(fault) => {
            discard_rewrite(path);
            return Err(match fault {
                StreamFault::Read(source) => DephageError::read(&backup, source),
                StreamFault::Write(source) => DephageError::write(path, source),
            });
        }
    };

    let missing = report.missing_blocks();
    if !missing.is_empty() {
        discard_rewrite(path);
        return Err(DephageError::StructureNotFound {
            path: path.to_path_buf(),
            missing,
        });
    }

    Ok(CleanOutcome::Disinfected { backup, report })
}

/// Rename `path` to `backup`, refusing to overwrite an earlier backup.
fn move_aside(path: &Path, backup: &Path) -> Result<()> {
    let rename_err = |source| DephageError::Rename {
        from: path.to_path_buf(),
        to: backup.to_path_buf(),
        source,
    };

    if fs::symlink_metadata(backup).is_ok() {
        return Err(rename_err(io::Error::new(
            ErrorKind::AlreadyExists,
            "a backup from an earlier clean is in the way",
        )));
    }
    fs::rename(path, backup).map_err(rename_err)
}

/// Remove a rewrite that must not be trusted.
pub fn discard_rewrite(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != ErrorKind::NotFound
    {
        eprintln!("[DPH-CLEAN] unable to discard {}: {err}", path.display());
    }
}

/// SHA-256 hex digest of a file, streamed.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::signature::{Utf8Sniff, detect_file};

    fn strip(input: &[u8]) -> (Vec<u8>, StripReport) {
        let mut out = Vec::new();
        let report = strip_injected_blocks(&mut &input[..], &mut out).unwrap();
        (out, report)
    }

    fn lines(bytes: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// A scene carrying both blocks, shaped like a real infection.
    fn infected_scene() -> String {
        [
            "//Maya ASCII 2020 scene",
            "requires maya \"2020\";",
            "createNode transform -n \"pCube1\";",
            "createNode script -n \"vaccine_gene\";",
            "\trename -uid \"A1\";",
            "\taddAttr -ci true -sn \"nts\" -ln \"notes\" -dt \"string\";",
            "\tsetAttr \".b\" -type \"string\" \"import vaccine\\ncmds.evalDeferred('leukocyte = vaccine.phage()')\";",
            "\tsetAttr \".stp\" 1;",
            "\tsetAttr \".nts\" -type \"string\" \"payload\";",
            "\tsetAttr \".st\" 1;",
            "\tsetAttr \".a\" -type \"string\" \"\";",
            "createNode script -n \"breed_gene\";",
            "\trename -uid \"B2\";",
            "\tsetAttr \".b\" -type \"string\" \"python(\\\"import base64; exec(...)\\\")\";",
            "\tsetAttr \".stp\" 1;",
            "\tsetAttr \".st\" 1;",
            "select -ne :time1;",
            "// End of scene.ma",
        ]
        .join("\n")
            + "\n"
    }

    #[test]
    fn vaccine_block_example_is_removed() {
        let input = "sceneData;\ncreateNode script -n \"vaccine_gene\";\nl1\nl2\nl3\nl4\nl5\nl6\nl7\nkeepMe;\n";
        let (out, report) = strip(input.as_bytes());
        assert_eq!(lines(&out), vec!["sceneData;", "keepMe;"]);
        assert_eq!(report.vaccine_blocks, 1);
        assert_eq!(report.breed_blocks, 0);
        assert_eq!(report.lines_removed, 8);
        assert_eq!(report.lines_kept, 2);
        assert_eq!(report.missing_blocks(), vec!["breed_gene"]);
    }

    #[test]
    fn both_blocks_removed_and_rest_preserved_in_order() {
        let (out, report) = strip(infected_scene().as_bytes());
        assert_eq!(
            lines(&out),
            vec![
                "//Maya ASCII 2020 scene",
                "requires maya \"2020\";",
                "createNode transform -n \"pCube1\";",
                "select -ne :time1;",
                "// End of scene.ma",
            ]
        );
        assert!(report.missing_blocks().is_empty());
        assert_eq!(report.lines_removed, 8 + 5);
        assert!(memmem::find(&out, b"vaccine.phage()").is_none());
    }

    #[test]
    fn header_lookalike_inside_skip_window_is_dropped_not_restarted() {
        // The second header falls inside the first block's 4-line window.
        let input = "a\ncreateNode script -n \"breed_gene\";\n1\ncreateNode script -n \"vaccine_gene\";\n3\n4\nb\n";
        let (out, report) = strip(input.as_bytes());
        assert_eq!(lines(&out), vec!["a", "b"]);
        assert_eq!(report.breed_blocks, 1);
        assert_eq!(report.vaccine_blocks, 0);
    }

    #[test]
    fn repeated_blocks_are_all_removed() {
        let block = "createNode script -n \"breed_gene\";\nx\nx\nx\nx\n";
        let input = format!("top\n{block}mid\n{block}end\n");
        let (out, report) = strip(input.as_bytes());
        assert_eq!(lines(&out), vec!["top", "mid", "end"]);
        assert_eq!(report.breed_blocks, 2);
    }

    #[test]
    fn header_needs_both_structure_and_token() {
        assert_eq!(header_kind(b"// vaccine_gene mentioned in a comment\n"), None);
        assert_eq!(header_kind(b"createNode script -n \"uiConfigurationScriptNode\";\n"), None);
        assert_eq!(
            header_kind(b"createNode script -n \"vaccine_gene\";\r\n"),
            Some(BlockKind::VaccineGene)
        );
        assert_eq!(
            header_kind(b"createNode script -n \"breed_gene\";"),
            Some(BlockKind::BreedGene)
        );
    }

    #[test]
    fn crlf_and_missing_final_newline_survive() {
        let input = b"keep1\r\ncreateNode script -n \"breed_gene\";\r\n1\r\n2\r\n3\r\n4\r\nkeep2";
        let (out, _) = strip(input);
        assert_eq!(out, b"keep1\r\nkeep2");
    }

    #[test]
    fn non_utf8_lines_are_copied_verbatim() {
        let input = b"caf\xe9;\ncreateNode script -n \"breed_gene\";\n1\n2\n3\n4\n\xff\xfe;\n";
        let (out, _) = strip(input);
        assert_eq!(out, b"caf\xe9;\n\xff\xfe;\n");
    }

    #[test]
    fn truncated_block_at_eof_is_tolerated() {
        let input = b"keep\ncreateNode script -n \"vaccine_gene\";\n1\n2\n";
        let (out, report) = strip(input);
        assert_eq!(out, b"keep\n");
        assert_eq!(report.vaccine_blocks, 1);
    }

    #[test]
    fn clean_text_scene_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.ma");
        let original = infected_scene();
        fs::write(&path, &original).unwrap();

        let outcome = clean(&path, ContentClass::Text).unwrap();
        let backup = dir.path().join("shot.ma.INFECTED");
        assert_eq!(outcome.backup(), backup.as_path());
        match &outcome {
            CleanOutcome::Disinfected { report, .. } => {
                assert_eq!(report.vaccine_blocks, 1);
                assert_eq!(report.breed_blocks, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // Backup holds the original bytes; the rewrite no longer carries the marker.
        assert_eq!(fs::read_to_string(&backup).unwrap(), original);
        let detection = detect_file(&path, &Utf8Sniff::default()).unwrap();
        assert!(!detection.infected);
        assert!(fs::read_to_string(&path).unwrap().ends_with("// End of scene.ma\n"));
    }

    #[test]
    fn clean_binary_scene_only_moves_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.mb");
        let mut original = b"FOR8\x00\x00\x00\x10MAYA".to_vec();
        original.extend_from_slice(b"vaccine.phage()");
        original.extend_from_slice(&[0, 1, 2, 0xff]);
        fs::write(&path, &original).unwrap();

        let outcome = clean(&path, ContentClass::Binary).unwrap();
        assert!(matches!(outcome, CleanOutcome::Quarantined { .. }));
        assert!(!path.exists());
        assert_eq!(fs::read(dir.path().join("rig.mb.INFECTED")).unwrap(), original);
    }

    #[test]
    fn missing_block_kind_discards_rewrite_and_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variant.ma");
        let original = "a;\ncreateNode script -n \"vaccine_gene\";\n1\n2\n3\n4\n5\n6\n7\nvaccine.phage()\n";
        fs::write(&path, original).unwrap();

        let err = clean(&path, ContentClass::Text).unwrap_err();
        match &err {
            DephageError::StructureNotFound { missing, .. } => {
                assert_eq!(missing, &vec!["breed_gene"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("variant.ma.INFECTED")).unwrap(),
            original
        );
    }

    #[test]
    fn rename_failure_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.ma");

        let err = clean(&path, ContentClass::Text).unwrap_err();
        assert_eq!(err.code(), "DPH-2002");
        assert!(!path.exists());
        assert!(!dir.path().join("ghost.ma.INFECTED").exists());
    }

    #[test]
    fn existing_backup_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("again.ma");
        let backup = dir.path().join("again.ma.INFECTED");
        fs::write(&path, infected_scene()).unwrap();
        fs::write(&backup, "first infection").unwrap();

        let err = clean(&path, ContentClass::Text).unwrap_err();
        assert_eq!(err.code(), "DPH-2002");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "first infection");
        assert_eq!(fs::read_to_string(&path).unwrap(), infected_scene());
    }

    #[test]
    fn write_fault_is_reported_as_write() {
        struct FailingWriter;
        impl Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let input = b"line\n";
        let fault = strip_injected_blocks(&mut &input[..], &mut FailingWriter).unwrap_err();
        assert!(matches!(fault, StreamFault::Write(_)));
    }

    /// Passes `budget` bytes through, then fails every write.
    struct FlakyWriter<W> {
        inner: W,
        budget: usize,
    }

    impl<W: Write> Write for FlakyWriter<W> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.inner.write(&buf[..n])
        }
        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    /// Yields the first `budget` bytes of the backup, then a read error.
    struct FlakyReader<R> {
        inner: R,
        budget: usize,
    }

    impl<R: io::Read> io::Read for FlakyReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("media error"));
            }
            let cap = buf.len().min(self.budget);
            let n = self.inner.read(&mut buf[..cap])?;
            self.budget -= n;
            Ok(n)
        }
    }

    #[test]
    fn write_fault_mid_rewrite_discards_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.ma");
        fs::write(&path, infected_scene()).unwrap();

        let err = clean_with(path.as_path(), ContentClass::Text, BufReader::new, |output| {
            FlakyWriter {
                inner: output,
                budget: 40,
            }
        })
        .unwrap_err();

        assert_eq!(err.code(), "DPH-2003");
        assert!(!path.exists(), "partial rewrite must be removed");
        assert_eq!(
            fs::read_to_string(backup_path(&path)).unwrap(),
            infected_scene()
        );
    }

    #[test]
    fn read_fault_mid_rewrite_discards_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.ma");
        fs::write(&path, infected_scene()).unwrap();

        let err = clean_with(
            path.as_path(),
            ContentClass::Text,
            |input| {
                BufReader::new(FlakyReader {
                    inner: input,
                    budget: 60,
                })
            },
            |output| output,
        )
        .unwrap_err();

        assert_eq!(err.code(), "DPH-2001");
        assert!(!path.exists(), "partial rewrite must be removed");
        assert_eq!(
            fs::read_to_string(backup_path(&path)).unwrap(),
            infected_scene()
        );
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
