use std::path::PathBuf;

use crate::prelude::*;
use crate::report;
use clap::Args;

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// The memory report fragments to merge, in order
    #[arg(required = true, value_name = "FRAGMENT")]
    pub files: Vec<PathBuf>,

    /// Where to write the merged report
    #[arg(long, short = 'o', default_value = report::MERGED_REPORT_FILENAME)]
    pub output: PathBuf,
}

pub async fn run(args: MergeArgs) -> Result<()> {
    let mut dumps = Vec::with_capacity(args.files.len());
    for file in &args.files {
        dumps.push(report::load_fragment(file).await?);
    }

    let Some(merged) = report::merge_dumps(dumps)? else {
        bail!("No fragments to merge");
    };
    for conflict in &merged.conflicts {
        warn!(
            "Fragments don't have the same value for property '{}'; keeping {} over {}",
            conflict.property, conflict.kept, conflict.conflicting
        );
    }

    let file = std::fs::File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    serde_json::to_writer_pretty(file, &merged.dump)?;
    info!(
        "Merged {} fragment(s) into {}",
        args.files.len(),
        args.output.display()
    );
    Ok(())
}
