//! Writing recognized text and run reports to disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, warn};

use crate::baidu::{Recognition, RecognitionMode, TextFragment};
use crate::error::AppError;
use crate::ledger::RunSummary;

/// Vertical distance, in pixels, beyond which a fragment starts a new line.
const LINE_BREAK_PX: i64 = 20;

/// Joins fragments into text lines. A fragment whose `top` differs from the
/// previous fragment's by more than [`LINE_BREAK_PX`] starts a new line;
/// fragments without a location count as `top = 0`.
pub fn group_lines(fragments: &[TextFragment]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut last_top: Option<i64> = None;

    for fragment in fragments {
        let top = i64::from(fragment.top.unwrap_or(0));
        let breaks = last_top.is_some_and(|last| (top - last).abs() > LINE_BREAK_PX);
        if breaks {
            push_trimmed(&mut lines, &current);
            current.clear();
        } else if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&fragment.text);
        last_top = Some(top);
    }
    push_trimmed(&mut lines, &current);
    lines
}

fn push_trimmed(lines: &mut Vec<String>, line: &str) {
    let line = line.trim();
    if !line.is_empty() {
        lines.push(line.to_string());
    }
}

/// Renders table rows as a markdown table, the first row being the header.
/// Rows are padded with empty cells to the widest row.
pub fn render_table(rows: &[Vec<String>]) -> Vec<String> {
    let Some(width) = rows.iter().map(Vec::len).max().filter(|w| *w > 0) else {
        return Vec::new();
    };
    let row_line = |row: &Vec<String>| {
        let cells: Vec<String> = (0..width)
            .map(|i| row.get(i).map_or_else(String::new, |c| escape_cell(c)))
            .collect();
        format!("| {} |", cells.join(" | "))
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(row_line(&rows[0]));
    lines.push(format!("| {} |", vec!["---"; width].join(" | ")));
    lines.extend(rows[1..].iter().map(row_line));
    lines
}

fn escape_cell(cell: &str) -> String {
    cell.trim().replace('|', "\\|").replace('\n', " ")
}

/// Renders one recognized image as markdown. Table results render as a
/// table; everything else as grouped text lines.
pub fn render_markdown(id: &str, recognition: &Recognition, mode: RecognitionMode) -> String {
    let title = Path::new(id)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string());

    let mut out = format!(
        "# {title}\n\n> Recognized {} with Baidu OCR ({mode})",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(log_id) = recognition.log_id {
        out.push_str(&format!(", log id {log_id}"));
    }
    // 1..=3 are quarter turns counter-clockwise; -1 means undetected.
    if let Some(direction) = recognition.direction.filter(|d| (1..=3).contains(d)) {
        out.push_str(&format!(", rotated {}° counter-clockwise", direction * 90));
    }
    out.push_str("\n\n");

    let body = if recognition.table.is_empty() {
        group_lines(&recognition.fragments)
    } else {
        render_table(&recognition.table)
    };
    for line in body {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Writes one `<stem>.md` per recognized image into a directory.
///
/// Images from different folders can share a stem; later ones get a
/// numeric suffix instead of overwriting an earlier result of the same run.
pub struct MarkdownWriter {
    dir: PathBuf,
    mode: RecognitionMode,
    written: HashSet<PathBuf>,
}

impl MarkdownWriter {
    pub fn new(dir: &Path, mode: RecognitionMode) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            mode,
            written: HashSet::new(),
        })
    }

    /// Writes the markdown for `id` and returns its path.
    pub fn write(&mut self, id: &str, recognition: &Recognition) -> Result<PathBuf> {
        let stem = Path::new(id)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());

        let mut path = self.dir.join(format!("{stem}.md"));
        let mut n = 1;
        while self.written.contains(&path) {
            n += 1;
            path = self.dir.join(format!("{stem}-{n}.md"));
        }
        if n > 1 {
            warn!(%id, path = %path.display(), "markdown name already used in this run");
        } else if path.exists() {
            debug!(path = %path.display(), "replacing markdown from an earlier run");
        }

        std::fs::write(&path, render_markdown(id, recognition, self.mode))
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.written.insert(path.clone());
        Ok(path)
    }
}

/// Saves the run summary as pretty JSON.
pub fn write_report(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Loads a summary saved by [`write_report`].
pub fn read_report(path: &Path) -> Result<RunSummary> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(AppError::from)
        .with_context(|| format!("{} is not a run report", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::ledger::{Outcome, RunLedger};

    fn fragment(text: &str, top: Option<u32>) -> TextFragment {
        TextFragment {
            text: text.into(),
            top,
        }
    }

    #[test]
    fn fragments_on_same_row_share_a_line() {
        let lines = group_lines(&[
            fragment("Hello", Some(10)),
            fragment("world", Some(25)),
            fragment("Next", Some(60)),
        ]);
        assert_eq!(lines, vec!["Hello world", "Next"]);
    }

    #[test]
    fn line_break_is_measured_from_previous_fragment() {
        let lines = group_lines(&[
            fragment("a", Some(0)),
            fragment("b", Some(20)),
            fragment("c", Some(40)),
            fragment("d", Some(61)),
        ]);
        assert_eq!(lines, vec!["a b c", "d"]);
    }

    #[test]
    fn missing_locations_group_together() {
        let lines = group_lines(&[fragment("one", None), fragment("two", None)]);
        assert_eq!(lines, vec!["one two"]);
    }

    #[test]
    fn blank_fragments_are_dropped() {
        assert!(group_lines(&[]).is_empty());
        let lines = group_lines(&[fragment("  ", Some(0)), fragment("x", Some(100))]);
        assert_eq!(lines, vec!["x"]);
    }

    fn text(fragments: Vec<TextFragment>) -> Recognition {
        Recognition {
            fragments,
            ..Recognition::default()
        }
    }

    fn table(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn table_renders_header_separator_and_rows() {
        let lines = render_table(&table(&[&["Item", "Qty"], &["Paper", "2"], &["Ink"]]));
        assert_eq!(
            lines,
            vec![
                "| Item | Qty |",
                "| --- | --- |",
                "| Paper | 2 |",
                "| Ink |  |",
            ]
        );
    }

    #[test]
    fn table_cells_are_escaped() {
        let lines = render_table(&table(&[&["a|b", " c\nd "]]));
        assert_eq!(lines[0], "| a\\|b | c d |");
        assert!(render_table(&[]).is_empty());
        assert!(render_table(&[Vec::new()]).is_empty());
    }

    #[test]
    fn table_recognition_renders_as_table() {
        let recognition = Recognition {
            table: table(&[&["Name", "Total"], &["Li", "18.00"]]),
            log_id: Some(42),
            direction: Some(1),
            ..Recognition::default()
        };
        let md = render_markdown("invoice.png", &recognition, RecognitionMode::Table);
        assert!(md.contains("(table), log id 42, rotated 90° counter-clockwise"));
        assert!(md.ends_with("| Name | Total |\n| --- | --- |\n| Li | 18.00 |\n"));
    }

    #[test]
    fn same_stem_in_one_run_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MarkdownWriter::new(dir.path(), RecognitionMode::General).unwrap();

        let first = writer
            .write("/a/page.jpg", &text(vec![fragment("first", None)]))
            .unwrap();
        let second = writer
            .write("/b/page.png", &text(vec![fragment("second", None)]))
            .unwrap();

        assert_eq!(first.file_name().unwrap(), "page.md");
        assert_eq!(second.file_name().unwrap(), "page-2.md");
        assert!(std::fs::read_to_string(first).unwrap().ends_with("first\n"));
        assert!(std::fs::read_to_string(second).unwrap().ends_with("second\n"));
    }

    #[test]
    fn markdown_file_uses_image_stem() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MarkdownWriter::new(dir.path(), RecognitionMode::Accurate).unwrap();
        let path = writer
            .write(
                "/scans/page-01.jpg",
                &text(vec![fragment("第一行", Some(5)), fragment("second", Some(50))]),
            )
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "page-01.md");
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("# page-01.jpg\n"));
        assert!(text.contains("(accurate)"));
        assert!(text.ends_with("第一行\nsecond\n"));
    }

    #[test]
    fn report_can_be_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        let ledger = RunLedger::new(1);
        ledger.record(
            "a.jpg",
            Outcome::Failure {
                kind: FailureKind::RateLimited,
                message: "qps".into(),
                attempts: 4,
                elapsed_ms: 12,
            },
        );
        let summary = ledger.summary();

        write_report(&path, &summary).unwrap();
        let loaded = read_report(&path).unwrap();
        assert_eq!(loaded, summary);
    }

    #[test]
    fn read_report_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = read_report(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Json(_))));
    }
}
