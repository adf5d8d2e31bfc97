//! Transcoder subprocess adapter (C5, spec.md §4.5): an
//! `ffmpeg`-equivalent subprocess in copy-mux or baseline-encode mode,
//! emitting HLS playlist + segments into the session folder.
//!
//! Grounded on the pack's Rustyfin transcoder session code: a
//! `tokio::process::Child` wrapped in a handle, killed on `Drop`,
//! `start_kill()`/`wait()` for teardown.

use async_trait::async_trait;
use domain::{
    DomainError, TranscodeInput, TranscodeJobSpec, TranscodeMode, TranscodeOutcome,
    TranscoderHandle, TranscoderProcess,
};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{info, warn};

pub struct FfmpegTranscoderProcess {
    binary: String,
}

impl FfmpegTranscoderProcess {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for FfmpegTranscoderProcess {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

fn build_args(spec: &TranscodeJobSpec, input_arg: &str) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];

    if matches!(spec.mode, TranscodeMode::BaselineEncode) {
        args.push("-fflags".into());
        args.push("+nobuffer".into());
    }

    args.push("-i".into());
    args.push(input_arg.into());

    match spec.mode {
        TranscodeMode::CopyMux => {
            args.extend([
                "-c:v".into(),
                "copy".into(),
                "-c:a".into(),
                "copy".into(),
                "-bsf:v".into(),
                "h264_mp4toannexb".into(),
            ]);
        }
        TranscodeMode::BaselineEncode => {
            args.extend([
                "-c:v".into(),
                "libx264".into(),
                "-profile:v".into(),
                "baseline".into(),
                "-level".into(),
                "3.0".into(),
                "-preset".into(),
                "veryfast".into(),
                "-c:a".into(),
                "aac".into(),
            ]);
        }
    }

    args.extend([
        "-threads".into(),
        spec.thread_count.to_string(),
        "-hls_time".into(),
        spec.segment_duration_seconds.to_string(),
        "-hls_list_size".into(),
        "0".into(),
        "-start_number".into(),
        "0".into(),
        "-hls_segment_filename".into(),
        spec.output_dir.join("segment_%03d.ts").to_string_lossy().into_owned(),
        "-f".into(),
        "hls".into(),
        spec.output_dir.join("playlist.m3u8").to_string_lossy().into_owned(),
    ]);

    args
}

#[async_trait]
impl TranscoderProcess for FfmpegTranscoderProcess {
    async fn spawn(&self, spec: TranscodeJobSpec) -> Result<Box<dyn TranscoderHandle>, DomainError> {
        tokio::fs::create_dir_all(&spec.output_dir)
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))?;

        let (input_arg, stdin_source) = match &spec.input {
            TranscodeInput::Stdin(_) => ("pipe:0".to_string(), true),
            TranscodeInput::FilePath(p) => (p.to_string_lossy().into_owned(), false),
        };

        let args = build_args(&spec, &input_arg);
        info!(binary = %self.binary, ?args, "spawning transcoder");

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(if stdin_source { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| DomainError::ExternalToolMissing(format!("{}: {e}", self.binary)))?;

        if let TranscodeInput::Stdin(mut source) = spec.input {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| DomainError::TranscoderError("transcoder stdin unavailable".into()))?;
            tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut source, &mut stdin).await {
                    warn!(error = %e, "piping source into transcoder stdin failed");
                }
                let _ = stdin.shutdown().await;
            });
        }

        Ok(Box::new(FfmpegTranscoderHandle { child: Some(child) }))
    }
}

struct FfmpegTranscoderHandle {
    child: Option<Child>,
}

#[async_trait]
impl TranscoderHandle for FfmpegTranscoderHandle {
    async fn wait(&mut self) -> TranscodeOutcome {
        let Some(mut child) = self.child.take() else {
            return TranscodeOutcome::Failed("transcoder already waited on".into());
        };

        let stderr = child.stderr.take();
        let status = child.wait().await;

        match status {
            Ok(status) if status.success() => TranscodeOutcome::Finished,
            Ok(status) => {
                let message = if let Some(mut stderr) = stderr {
                    use tokio::io::AsyncReadExt;
                    let mut buf = String::new();
                    let _ = stderr.read_to_string(&mut buf).await;
                    buf.lines().last().unwrap_or("").trim().to_string()
                } else {
                    String::new()
                };
                TranscodeOutcome::Failed(format!("exited with {status}: {message}"))
            }
            Err(e) => TranscodeOutcome::Failed(format!("wait() failed: {e}")),
        }
    }

    async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.child = None;
    }
}

impl Drop for FfmpegTranscoderHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(mode: TranscodeMode) -> TranscodeJobSpec {
        TranscodeJobSpec {
            input: TranscodeInput::FilePath(PathBuf::from("/tmp/in.mp4")),
            output_dir: PathBuf::from("/tmp/out"),
            segment_duration_seconds: 4,
            thread_count: 2,
            mode,
        }
    }

    #[test]
    fn copy_mux_args_include_bsf_and_copy_codecs() {
        let args = build_args(&spec(TranscodeMode::CopyMux), "/tmp/in.mp4");
        assert!(args.windows(2).any(|w| w == ["-c:v".to_string(), "copy".to_string()]));
        assert!(args.iter().any(|a| a == "h264_mp4toannexb"));
        assert!(args.iter().any(|a| a == "hls"));
    }

    #[test]
    fn baseline_encode_args_include_profile_and_nobuffer() {
        let args = build_args(&spec(TranscodeMode::BaselineEncode), "/tmp/in.mp4");
        assert!(args.iter().any(|a| a == "baseline"));
        assert!(args.iter().any(|a| a == "+nobuffer"));
        assert!(args.iter().any(|a| a == "veryfast"));
    }

    #[test]
    fn segment_filename_pattern_matches_spec() {
        let args = build_args(&spec(TranscodeMode::CopyMux), "/tmp/in.mp4");
        assert!(args.iter().any(|a| a.ends_with("segment_%03d.ts")));
    }
}
