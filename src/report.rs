use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::prelude::*;
use async_compression::tokio::bufread::GzipDecoder;
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, BufReader};

/// Fixed basename of the consolidated report inside the session directory.
/// External viewers load the report under this exact name.
pub const MERGED_REPORT_FILENAME: &str = "memory-reports";

const REPORTS_PROPERTY: &str = "reports";

/// One per-process memory report dump, decoded. Property order is preserved
/// so the merged document keeps the shape of the first fragment.
pub type Dump = Map<String, Value>;

/// Two dumps carried different values for a property that should be
/// session-wide. The first dump's value was kept.
#[derive(Debug)]
pub struct PropertyConflict {
    pub property: String,
    pub kept: Value,
    pub conflicting: Value,
}

#[derive(Debug)]
pub struct MergedReport {
    pub dump: Dump,
    pub conflicts: Vec<PropertyConflict>,
}

/// Read one memory report fragment, gunzipping when the file carries a `.gz`
/// suffix.
pub async fn load_fragment(path: &Path) -> Result<Dump> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open fragment {}", path.display()))?;

    let mut raw = Vec::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        GzipDecoder::new(BufReader::new(file))
            .read_to_end(&mut raw)
            .await
    } else {
        BufReader::new(file).read_to_end(&mut raw).await
    }
    .with_context(|| format!("Failed to read fragment {}", path.display()))?;

    serde_json::from_slice(&raw)
        .with_context(|| format!("Fragment {} is not a valid memory report", path.display()))
}

/// Merge per-process dumps into a single document.
///
/// All properties other than `reports` must be identical across dumps; the
/// `reports` lists are concatenated in dump order. Dumps that disagree on the
/// property set cannot be merged at all. Dumps that agree on the property set
/// but disagree on a value keep the first dump's value, and the disagreement
/// is surfaced in [`MergedReport::conflicts`].
///
/// An empty input means "no report available" and yields `Ok(None)`.
pub fn merge_dumps(dumps: Vec<Dump>) -> Result<Option<MergedReport>> {
    let mut dumps = dumps.into_iter();
    let Some(mut merged) = dumps.next() else {
        return Ok(None);
    };
    let mut conflicts = Vec::new();

    for mut dump in dumps {
        let merged_keys: HashSet<&String> = merged.keys().collect();
        if dump.keys().collect::<HashSet<_>>() != merged_keys {
            bail!("Can't merge dumps because they don't have the same set of properties");
        }

        for (property, value) in &dump {
            if property == REPORTS_PROPERTY {
                continue;
            }
            let kept = &merged[property.as_str()];
            if value != kept {
                conflicts.push(PropertyConflict {
                    property: property.clone(),
                    kept: kept.clone(),
                    conflicting: value.clone(),
                });
            }
        }

        match (
            merged.get_mut(REPORTS_PROPERTY),
            dump.remove(REPORTS_PROPERTY),
        ) {
            (Some(Value::Array(all)), Some(Value::Array(mut extra))) => all.append(&mut extra),
            _ => bail!("Can't merge dumps because '{REPORTS_PROPERTY}' is not a list"),
        }
    }

    Ok(Some(MergedReport {
        dump: merged,
        conflicts,
    }))
}

/// Persist the merged document under [`MERGED_REPORT_FILENAME`] inside the
/// session directory, pretty-printed with 2-space indentation.
pub fn write_merged(out_dir: &Path, report: &MergedReport) -> Result<PathBuf> {
    let path = out_dir.join(MERGED_REPORT_FILENAME);
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &report.dump)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::write::GzipEncoder;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    fn dump(value: Value) -> Dump {
        serde_json::from_value(value).unwrap()
    }

    fn fragment(reports: Value) -> Dump {
        dump(json!({
            "version": 1,
            "hasMozMallocUsableSize": true,
            "reports": reports,
        }))
    }

    #[test]
    fn test_merge_no_dumps_yields_no_report() {
        assert!(merge_dumps(vec![]).unwrap().is_none());
    }

    #[test]
    fn test_merge_single_dump_is_identity() {
        let single = fragment(json!([{"path": "heap/a", "amount": 12}]));
        let merged = merge_dumps(vec![single.clone()]).unwrap().unwrap();
        assert_eq!(merged.dump, single);
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn test_merge_concatenates_reports_in_order() {
        let a = fragment(json!([{"process": "a"}]));
        let b = fragment(json!([{"process": "b"}]));
        let c = fragment(json!([{"process": "c"}]));

        let all_at_once = merge_dumps(vec![a.clone(), b.clone(), c.clone()])
            .unwrap()
            .unwrap();

        // Same reports list as merging [a, b] and then appending c's reports.
        let mut two_then_one = merge_dumps(vec![a, b]).unwrap().unwrap();
        match (
            two_then_one.dump.get_mut("reports"),
            c.get("reports").cloned(),
        ) {
            (Some(Value::Array(all)), Some(Value::Array(mut extra))) => all.append(&mut extra),
            _ => unreachable!(),
        }

        assert_eq!(
            all_at_once.dump["reports"],
            json!([{"process": "a"}, {"process": "b"}, {"process": "c"}])
        );
        assert_eq!(all_at_once.dump["reports"], two_then_one.dump["reports"]);
    }

    #[test]
    fn test_mismatched_property_sets_do_not_merge() {
        let a = fragment(json!([]));
        let mut b = fragment(json!([]));
        b.insert("units".to_string(), json!("bytes"));

        assert!(merge_dumps(vec![a, b]).is_err());
    }

    #[test]
    fn test_conflicting_property_keeps_first_value() {
        let a = fragment(json!([{"process": "a"}]));
        let mut b = fragment(json!([{"process": "b"}]));
        b.insert("version".to_string(), json!(2));

        let merged = merge_dumps(vec![a, b]).unwrap().unwrap();
        assert_eq!(merged.dump["version"], json!(1));
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.conflicts[0].property, "version");
        assert_eq!(merged.conflicts[0].kept, json!(1));
        assert_eq!(merged.conflicts[0].conflicting, json!(2));
        // The conflict doesn't stop the reports from being merged.
        assert_eq!(
            merged.dump["reports"],
            json!([{"process": "a"}, {"process": "b"}])
        );
    }

    #[tokio::test]
    async fn test_load_fragment_gunzips() {
        let dir = tempfile::TempDir::new().unwrap();
        let expected = fragment(json!([{"path": "heap/a"}]));

        let mut encoder = GzipEncoder::new(Vec::new());
        encoder
            .write_all(&serde_json::to_vec(&expected).unwrap())
            .await
            .unwrap();
        encoder.shutdown().await.unwrap();
        let path = dir.path().join("memory-report-main-123.json.gz");
        std::fs::write(&path, encoder.into_inner()).unwrap();

        assert_eq!(load_fragment(&path).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_load_fragment_reads_plain_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let expected = fragment(json!([]));
        let path = dir.path().join("memory-report-main-123.json");
        std::fs::write(&path, serde_json::to_vec(&expected).unwrap()).unwrap();

        assert_eq!(load_fragment(&path).await.unwrap(), expected);
    }

    #[test]
    fn test_write_merged_uses_fixed_name_and_indentation() {
        let dir = tempfile::TempDir::new().unwrap();
        let merged = MergedReport {
            dump: fragment(json!([])),
            conflicts: vec![],
        };

        let path = write_merged(dir.path(), &merged).unwrap();
        assert_eq!(path.file_name().unwrap(), MERGED_REPORT_FILENAME);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("{\n  \"version\""));
    }
}
