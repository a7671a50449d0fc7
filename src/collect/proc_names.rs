use std::collections::HashMap;
use std::path::Path;

use crate::prelude::*;
use lazy_static::lazy_static;
use regex::Regex;

/// Basename of the process-rank snapshot pulled into the session directory.
pub const PROC_SNAPSHOT_FILENAME: &str = "procrank";

lazy_static! {
    // Process names may contain spaces and decorations (e.g. "(Preallocated
    // app)"), so only the first word is considered; the PID is the first
    // digit run after it.
    static ref PROC_LINE_REGEX: Regex = Regex::new(r"^(\S+)\s+\D*(\d+)").unwrap();
    static ref NON_ALPHANUMERIC_REGEX: Regex = Regex::new(r"[^0-9A-Za-z]").unwrap();
}

/// Parse a process-rank snapshot into a PID → normalized name map.
///
/// Lines that don't look like a process entry (headers, separators, totals)
/// are skipped. Names are lowercased with every non-alphanumeric character
/// stripped. When several lines claim the same PID, the last one wins.
pub fn parse_proc_names(snapshot: &str) -> HashMap<u32, String> {
    let mut proc_names = HashMap::new();
    for line in snapshot.lines() {
        let Some(captures) = PROC_LINE_REGEX.captures(line) else {
            continue;
        };
        let Ok(pid) = captures[2].parse::<u32>() else {
            continue;
        };
        let name = NON_ALPHANUMERIC_REGEX
            .replace_all(&captures[1], "")
            .to_lowercase();
        proc_names.insert(pid, name);
    }
    proc_names
}

/// Load the snapshot previously pulled into `out_dir` and parse it.
pub async fn load_proc_names(out_dir: &Path) -> Result<HashMap<u32, String>> {
    let path = out_dir.join(PROC_SNAPSHOT_FILENAME);
    let snapshot = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read process snapshot {}", path.display()))?;
    Ok(parse_proc_names(&snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = "\
APPLICATION     PID       Vss      Rss      Pss      Uss  cmdline
system          106   191312K  172556K  144045K  136208K  /system/runtime/core
(Preallocated)  3107   56884K   42236K   20281K   17652K  /system/runtime/plugin-container
Usage_Stats.app 4059   61656K   46356K   23358K   20072K  /system/runtime/plugin-container
                ------  ------   ------
          TOTAL 309856K
";

    #[test]
    fn test_parse_proc_names() {
        let proc_names = parse_proc_names(SNAPSHOT);

        assert_eq!(proc_names.len(), 3);
        assert_eq!(proc_names[&106], "system");
        assert_eq!(proc_names[&3107], "preallocated");
        assert_eq!(proc_names[&4059], "usagestatsapp");
    }

    #[test]
    fn test_names_are_lowercase_alphanumeric() {
        for name in parse_proc_names(SNAPSHOT).values() {
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_header_and_total_lines_are_skipped() {
        // Neither the header (no digits) nor the indented TOTAL line yields
        // an entry.
        let proc_names = parse_proc_names(
            "APPLICATION  PID  cmdline\n          TOTAL 309856K\n",
        );
        assert!(proc_names.is_empty());
    }

    #[test]
    fn test_duplicate_pid_last_write_wins() {
        let proc_names = parse_proc_names("old-name 42 1K\nnew-name 42 1K\n");
        assert_eq!(proc_names[&42], "newname");
    }

    #[tokio::test]
    async fn test_load_proc_names_from_session_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(PROC_SNAPSHOT_FILENAME), SNAPSHOT).unwrap();

        let proc_names = load_proc_names(dir.path()).await.unwrap();
        assert_eq!(proc_names[&106], "system");
    }
}
