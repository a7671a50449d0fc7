use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::prelude::*;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

/// Rewrites raw stack frames into readable form while streaming a dump from
/// `source` to `dest`. The resolution engine itself is external; this trait
/// is the only seam the routing pipeline sees.
#[async_trait]
pub trait StackRewriter {
    async fn rewrite(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;
}

/// Pipes the dump through an external fixer binary, stdin to stdout.
pub struct ExternalRewriter {
    program: PathBuf,
}

#[async_trait]
impl StackRewriter for ExternalRewriter {
    async fn rewrite(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;
        let mut stdin = child.stdin.take().context("Fixer has no stdin")?;
        let mut stdout = child.stdout.take().context("Fixer has no stdout")?;

        let feed = async move {
            tokio::io::copy(source, &mut stdin).await?;
            // Close the pipe so the fixer sees EOF and flushes.
            stdin.shutdown().await?;
            drop(stdin);
            Ok::<_, Error>(())
        };
        let drain = async {
            tokio::io::copy(&mut stdout, dest).await?;
            Ok::<_, Error>(())
        };
        tokio::try_join!(feed, drain)?;

        let status = child.wait().await?;
        if !status.success() {
            bail!("{} exited with {}", self.program.display(), status);
        }
        Ok(())
    }
}

/// Used when no fixer is configured: dumps are renamed and recompressed but
/// their frames are left as captured.
pub struct Passthrough;

#[async_trait]
impl StackRewriter for Passthrough {
    async fn rewrite(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        tokio::io::copy(source, dest).await?;
        Ok(())
    }
}

pub fn rewriter_from(fix_stacks: Option<&Path>) -> Box<dyn StackRewriter> {
    match fix_stacks {
        Some(program) => Box::new(ExternalRewriter {
            program: program.to_path_buf(),
        }),
        None => {
            debug!("No stack fixer configured, copying dumps through unchanged");
            Box::new(Passthrough)
        }
    }
}
