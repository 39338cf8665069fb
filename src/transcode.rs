use std::{path::PathBuf, process::Stdio};

use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use tokio::{
  io::AsyncWriteExt,
  process::{ChildStdin, Command},
  sync::oneshot,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::{config::Config, upstream::Upstream, Error, Result};

pub trait Transcoder: Send + Sync {
  /// Wraps `source` so that its bytes come out re-encoded.
  fn transcode(&self, source: Upstream) -> Result<Upstream>;
}

// run ffmpeg to convert whatever comes in to a constant-bitrate mp3.
// requires the ffmpeg executable at the configured path.
pub struct Ffmpeg {
  program: PathBuf,
  args: Vec<String>,
}

impl Ffmpeg {
  pub fn new(config: &Config) -> Self {
    let args = [
      "-hide_banner",
      "-loglevel",
      "error",
      "-i",
      "pipe:0",
      "-vn",
      "-acodec",
      "libmp3lame",
      "-b:a",
      config.mp3_bitrate.as_str(),
      "-f",
      "mp3",
      "pipe:1",
    ];

    Self {
      program: config.ffmpeg_path.clone(),
      args: args.iter().map(|s| s.to_string()).collect(),
    }
  }

  #[cfg(test)]
  fn with_command(program: &str, args: &[&str]) -> Self {
    Self {
      program: program.into(),
      args: args.iter().map(|s| s.to_string()).collect(),
    }
  }

  /// Checks once at startup that the binary can be run at all.
  pub async fn probe(&self) -> bool {
    let output = Command::new(&self.program).arg("-version").output().await;
    match output {
      Ok(out) if out.status.success() => {
        let banner = String::from_utf8_lossy(&out.stdout);
        info!(
          "using encoder: {}",
          banner.lines().next().unwrap_or_default()
        );
        true
      }
      Ok(out) => {
        warn!("encoder probe exited with {}", out.status);
        false
      }
      Err(e) => {
        warn!(
          "encoder {} not usable, mp3 downloads will fail: {}",
          self.program.display(),
          e
        );
        false
      }
    }
  }
}

impl Transcoder for Ffmpeg {
  fn transcode(&self, mut source: Upstream) -> Result<Upstream> {
    let mut child = Command::new(&self.program)
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()?;

    let stdin = child.stdin.take().expect("stdin not opened");
    let stdout = child.stdout.take().expect("stdout not opened");

    // the encoded size is unknown up front, only a failure to open the
    // source is worth reporting early
    let head = source.take_head().map(|head| head.map(|_| None)).boxed();

    let (exit_tx, exit_rx) = oneshot::channel::<Result<()>>();
    let supervisor = tokio::spawn(async move {
      let (fed, status) = tokio::join!(feed(source, stdin), child.wait());
      let outcome = match (fed, status) {
        (Err(e), _) => Err(e),
        (Ok(()), Ok(status)) if status.success() => Ok(()),
        (Ok(()), Ok(status)) => {
          Err(Error::StreamFailure(format!("encoder exited with {status}")))
        }
        (Ok(()), Err(e)) => Err(Error::StreamFailure(format!(
          "failed waiting for encoder: {e}"
        ))),
      };
      let _ = exit_tx.send(outcome);
    });

    let exit = stream::once(async move {
      match exit_rx.await {
        Ok(Err(e)) => Some(Err(e)),
        _ => None,
      }
    })
    .filter_map(futures::future::ready);

    let stream = ReaderStream::new(stdout)
      .map_err(|e| Error::StreamFailure(format!("encoder output: {e}")))
      .chain(exit)
      .boxed();

    Ok(Upstream::new(stream, head, Box::new(supervisor)))
  }
}

async fn feed(mut source: Upstream, mut stdin: ChildStdin) -> Result<()> {
  while let Some(chunk) = source.next_chunk().await {
    let chunk = chunk?;
    if let Err(e) = stdin.write_all(&chunk).await {
      // the encoder stopped reading; its exit status tells why
      debug!("encoder input closed: {}", e);
      return Ok(());
    }
  }

  stdin.shutdown().await.ok();
  Ok(())
}
