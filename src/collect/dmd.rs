use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::prelude::*;
use crate::rewriter::StackRewriter;
use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};

lazy_static! {
    // Matches `dmd-<unixTime>-<pid>.<txt|json>`, with or without a trailing
    // compression suffix (e.g. dmd-1609459200-1234.json.gz).
    static ref DMD_FILENAME_REGEX: Regex = Regex::new(r"^dmd-(\d+)-(\d+)\.(txt|json)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Txt,
    Json,
}

impl DumpKind {
    fn as_str(self) -> &'static str {
        match self {
            DumpKind::Txt => "txt",
            DumpKind::Json => "json",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum DmdClass {
    /// A raw DMD dump carrying the (creation time, pid, kind) triple in its
    /// name.
    Dmd {
        creation_time: u64,
        pid: u32,
        kind: DumpKind,
    },
    /// Anything else; routed through the pipeline under a generic name.
    Generic { output_name: String },
}

impl DmdClass {
    pub fn classify(basename: &str) -> Self {
        if let Some(captures) = DMD_FILENAME_REGEX.captures(basename) {
            // The pattern only admits digit runs, so these parses can only
            // fail on overflow.
            if let (Ok(creation_time), Ok(pid)) =
                (captures[1].parse::<u64>(), captures[2].parse::<u32>())
            {
                let kind = match &captures[3] {
                    "txt" => DumpKind::Txt,
                    _ => DumpKind::Json,
                };
                return DmdClass::Dmd {
                    creation_time,
                    pid,
                    kind,
                };
            }
        }

        let output_name = format!(
            "processed-{}",
            basename.strip_suffix(".gz").unwrap_or(basename)
        );
        DmdClass::Generic { output_name }
    }

    /// The basename the processed artifact is written under, without any
    /// compression suffix. The process name is used when the PID resolves.
    pub fn output_name(&self, proc_names: &HashMap<u32, String>) -> String {
        match self {
            DmdClass::Dmd { pid, kind, .. } => match proc_names.get(pid) {
                Some(name) => format!("dmd-{}-{}.{}", name, pid, kind.as_str()),
                None => format!("dmd-{}.{}", pid, kind.as_str()),
            },
            DmdClass::Generic { output_name } => output_name.clone(),
        }
    }
}

#[derive(Debug)]
pub struct DmdOptions {
    pub compress_logs: bool,
    pub keep_raw_files: bool,
}

/// What happened to one raw dump.
#[derive(Debug)]
pub struct DmdOutcome {
    pub source: PathBuf,
    pub result: Result<PathBuf>,
}

/// Route every raw dump through the stack rewriter.
///
/// A failing dump does not abort the batch: its raw file is left in place,
/// the failure is captured in the returned outcome, and the remaining dumps
/// are still processed. Outputs already produced are never rolled back.
pub async fn process_dmd_files(
    files: &[PathBuf],
    proc_names: &HashMap<u32, String>,
    rewriter: &dyn StackRewriter,
    options: &DmdOptions,
) -> Vec<DmdOutcome> {
    let mut outcomes = Vec::with_capacity(files.len());
    for file in files {
        let result = process_dmd_file(file, proc_names, rewriter, options).await;
        if let Err(error) = &result {
            warn!("Failed to process {}: {error:#}", file.display());
        }
        outcomes.push(DmdOutcome {
            source: file.clone(),
            result,
        });
    }
    outcomes
}

async fn process_dmd_file(
    file: &Path,
    proc_names: &HashMap<u32, String>,
    rewriter: &dyn StackRewriter,
    options: &DmdOptions,
) -> Result<PathBuf> {
    let basename = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Invalid dump file name: {}", file.display()))?;
    let class = DmdClass::classify(basename);
    if let DmdClass::Dmd {
        creation_time, pid, ..
    } = &class
    {
        debug!("{basename}: dump from pid {pid}, created at unix time {creation_time}");
    }

    let mut outfile_name = class.output_name(proc_names);
    if options.compress_logs {
        outfile_name.push_str(".gz");
    }
    let out_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let outfile_path = out_dir.join(outfile_name);

    // Raw artifacts are always stored gzipped at pull time.
    let infile = File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let mut source = GzipDecoder::new(BufReader::new(infile));

    let outfile = File::create(&outfile_path)
        .await
        .with_context(|| format!("Failed to create {}", outfile_path.display()))?;
    let mut dest: Box<dyn AsyncWrite + Unpin + Send> = if options.compress_logs {
        Box::new(GzipEncoder::new(outfile))
    } else {
        Box::new(outfile)
    };

    rewriter.rewrite(&mut source, dest.as_mut()).await?;
    dest.shutdown().await?;

    if !options.keep_raw_files {
        tokio::fs::remove_file(file)
            .await
            .with_context(|| format!("Failed to remove {}", file.display()))?;
    }

    Ok(outfile_path)
}
