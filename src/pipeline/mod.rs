//! Runs the transcoder as a child process and relays its stdout as a byte stream.
//!
//! Every stream request owns exactly one child. A dedicated task reads the child's stdout in
//! fixed-size chunks and forwards them over a bounded channel to a [`MediaStream`]. Dropping the
//! stream (for example when the HTTP client disconnects) cancels the task, which then kills and
//! reaps the child. The same cleanup runs when the child finishes or fails.
//!
//! The child's exit is watched alongside its output. yt-dlp hands stdout to ffmpeg when it
//! merges or re-encodes, so the pipe can outlive the process; once the child has exited the
//! remaining output gets a bounded drain window before the pipeline aborts.

use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

mod process;

pub use process::ProcessState;

use crate::selector::StreamPlan;
use crate::GatewayError;
use process::ChildGuard;

/// Default read size for the relay loop
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the reader task and the HTTP body
const CHANNEL_DEPTH: usize = 4;

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Spawned,
    Streaming,
    Completed,
    Aborted,
}

/// Why a pipeline did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The consumer dropped the stream or cancellation was requested
    Cancelled,
    /// Reading the child's stdout failed
    ReadError(String),
    /// The child closed its output and exited unsuccessfully
    ExitFailure(String),
    /// The child closed its output but did not exit in time
    ExitTimeout,
    /// The child exited but something it started kept the output open
    OutputHeldOpen(String),
}

/// Final result of a pipeline, reported after the child has been reaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed { bytes: u64 },
    Aborted { bytes: u64, reason: AbortReason },
}

impl PipelineOutcome {
    pub fn state(&self) -> PipelineState {
        match self {
            PipelineOutcome::Completed { .. } => PipelineState::Completed,
            PipelineOutcome::Aborted { .. } => PipelineState::Aborted,
        }
    }

    pub fn bytes(&self) -> u64 {
        match self {
            PipelineOutcome::Completed { bytes } | PipelineOutcome::Aborted { bytes, .. } => *bytes,
        }
    }
}

/// Spawns one transcoder process per stream request
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    transcoder: PathBuf,
    chunk_size: usize,
    kill_timeout: Duration,
}

impl PipelineRunner {
    pub fn new(transcoder: impl Into<PathBuf>, chunk_size: usize, kill_timeout: Duration) -> Self {
        Self {
            transcoder: transcoder.into(),
            chunk_size: chunk_size.max(1),
            kill_timeout,
        }
    }

    /// Command line that [`run`](Self::run) would execute, for diagnostics
    pub fn command_line(&self, plan: &StreamPlan, source_url: &str) -> Vec<String> {
        std::iter::once(self.transcoder.display().to_string())
            .chain(plan.transcoder_args(source_url))
            .collect()
    }

    /// Start the transcoder for `plan` and return its output as a stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(&self, plan: &StreamPlan, source_url: &str) -> Result<MediaStream, GatewayError> {
        let mut command = std::process::Command::new(&self.transcoder);
        command
            .args(plan.transcoder_args(source_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut guard = ChildGuard::spawn(command, self.kill_timeout).map_err(|e| {
            tracing::error!("Failed to spawn {}: {}", self.transcoder.display(), e);
            GatewayError::PipelineAborted(format!("failed to spawn transcoder: {}", e))
        })?;

        let pid = guard.id();
        let stdout = guard.take_stdout().ok_or_else(|| {
            GatewayError::PipelineAborted("transcoder stdout was not captured".to_string())
        })?;
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let relay = Relay {
            child: guard,
            stdout,
            tx,
            cancel: cancel.clone(),
            chunk_size: self.chunk_size,
            drain_timeout: self.kill_timeout,
            bytes: 0,
        };

        tracing::debug!(?pid, state = ?PipelineState::Spawned, "Transcoder started");

        let span = tracing::info_span!("pipeline", ?pid, platform = %plan.platform);
        tokio::spawn(
            async move {
                let outcome = relay.run().await;
                match &outcome {
                    PipelineOutcome::Completed { bytes } => {
                        tracing::info!(bytes, "Pipeline completed");
                    }
                    PipelineOutcome::Aborted { bytes, reason } => {
                        tracing::warn!(bytes, ?reason, "Pipeline aborted");
                    }
                }
                let _ = outcome_tx.send(outcome);
            }
            .instrument(span),
        );

        Ok(MediaStream {
            rx,
            pid,
            outcome: Some(outcome_rx),
            _cancel: cancel.drop_guard(),
        })
    }
}

/// Live output of one transcoder process.
///
/// Yields chunks as they arrive. A failure after output has started is yielded as a final
/// `Err`, which makes an HTTP body end without its terminating chunk. Dropping the stream
/// cancels the pipeline.
pub struct MediaStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    pid: Option<u32>,
    outcome: Option<oneshot::Receiver<PipelineOutcome>>,
    _cancel: DropGuard,
}

impl MediaStream {
    /// OS process id of the transcoder, if it was still running at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Receiver for the final outcome, resolved once the child has been reaped.
    ///
    /// Can be taken once; later calls return `None`.
    pub fn take_outcome(&mut self) -> Option<oneshot::Receiver<PipelineOutcome>> {
        self.outcome.take()
    }
}

impl Stream for MediaStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Reader side of a pipeline, owned by the relay task
struct Relay {
    child: ChildGuard,
    stdout: ChildStdout,
    tx: mpsc::Sender<io::Result<Bytes>>,
    cancel: CancellationToken,
    chunk_size: usize,
    /// How long output may keep flowing once the child has exited
    drain_timeout: Duration,
    bytes: u64,
}

impl Relay {
    async fn run(mut self) -> PipelineOutcome {
        tracing::debug!(state = ?PipelineState::Streaming, "Relaying transcoder output");

        let result = self.pump().await;
        // Runs on every path out of the loop
        self.child.terminate().await;

        match result {
            Ok(()) => PipelineOutcome::Completed { bytes: self.bytes },
            Err(reason) => PipelineOutcome::Aborted {
                bytes: self.bytes,
                reason,
            },
        }
    }

    async fn pump(&mut self) -> Result<(), AbortReason> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut exited: Option<ExitStatus> = None;
        let mut drain_deadline: Option<Instant> = None;

        loop {
            // Only polled once the child has exited
            let deadline = drain_deadline.unwrap_or_else(Instant::now);

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AbortReason::Cancelled),
                status = self.child.wait(), if exited.is_none() => {
                    match status {
                        Ok(status) => {
                            tracing::debug!(%status, "Transcoder exited, draining output");
                            exited = Some(status);
                            drain_deadline = Some(Instant::now() + self.drain_timeout);
                            continue;
                        }
                        Err(e) => {
                            let reason = AbortReason::ReadError(e.to_string());
                            self.emit(Err(e)).await;
                            return Err(reason);
                        }
                    }
                }
                _ = sleep_until(deadline), if drain_deadline.is_some() => {
                    return match exited {
                        Some(status) => self.held_open(status).await,
                        None => Err(AbortReason::ExitTimeout),
                    };
                }
                read = self.stdout.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => {
                    return match exited {
                        Some(status) => self.conclude(status).await,
                        None => self.finish().await,
                    };
                }
                Ok(n) => n,
                Err(e) => {
                    let reason = AbortReason::ReadError(e.to_string());
                    self.emit(Err(e)).await;
                    return Err(reason);
                }
            };

            let chunk = Bytes::copy_from_slice(&buf[..n]);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AbortReason::Cancelled),
                sent = self.tx.send(Ok(chunk)) => {
                    if sent.is_err() {
                        return Err(AbortReason::Cancelled);
                    }
                }
            }
            self.bytes += n as u64;
        }
    }

    /// Output closed before the exit was seen; wait (bounded) for the status
    async fn finish(&mut self) -> Result<(), AbortReason> {
        match self.child.wait_for_exit().await {
            Ok(Some(status)) => self.conclude(status).await,
            Ok(None) => {
                self.emit(Err(io::Error::other("transcoder did not exit")))
                    .await;
                Err(AbortReason::ExitTimeout)
            }
            Err(e) => {
                let reason = AbortReason::ReadError(e.to_string());
                self.emit(Err(e)).await;
                Err(reason)
            }
        }
    }

    /// Output closed and the child exited; the status decides between success and abort
    async fn conclude(&self, status: ExitStatus) -> Result<(), AbortReason> {
        if status.success() {
            return Ok(());
        }
        self.emit(Err(io::Error::other(format!("transcoder {}", status))))
            .await;
        Err(AbortReason::ExitFailure(status.to_string()))
    }

    /// The child is gone but its output never closed
    async fn held_open(&self, status: ExitStatus) -> Result<(), AbortReason> {
        tracing::warn!(
            %status,
            "Transcoder output still open {:?} after exit",
            self.drain_timeout
        );
        self.emit(Err(io::Error::other(format!(
            "transcoder {} but its output stayed open",
            status
        ))))
        .await;
        Err(AbortReason::OutputHeldOpen(status.to_string()))
    }

    /// Forward a terminal error unless the consumer is already gone
    async fn emit(&self, item: io::Result<Bytes>) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.tx.send(item) => {}
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::selector::select;
    use futures_util::StreamExt;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Transcoder stand-in that ignores its arguments and runs `body`
    fn fake_transcoder(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn plan() -> StreamPlan {
        select(Platform::Youtube, "22")
    }

    fn runner(path: PathBuf) -> PipelineRunner {
        PipelineRunner::new(path, DEFAULT_CHUNK_SIZE, Duration::from_secs(2))
    }

    #[cfg(target_os = "linux")]
    fn is_reaped(pid: u32) -> bool {
        !std::path::Path::new(&format!("/proc/{}", pid)).exists()
    }

    /// Gone, or a zombie left for whoever inherited it
    #[cfg(target_os = "linux")]
    fn is_dead(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    async fn collect(mut stream: MediaStream) -> (Vec<u8>, Option<io::Error>) {
        let mut data = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => return (data, Some(e)),
            }
        }
        (data, None)
    }

    #[tokio::test]
    async fn test_streams_output_to_completion() {
        let dir = TempDir::new().unwrap();
        let tool = fake_transcoder(&dir, "ok", "head -c 200000 /dev/zero");

        let mut stream = runner(tool).run(&plan(), "https://youtu.be/abc").unwrap();
        let outcome = stream.take_outcome().unwrap();
        let (data, error) = collect(stream).await;

        assert_eq!(data.len(), 200_000);
        assert!(error.is_none());
        assert_eq!(
            outcome.await.unwrap(),
            PipelineOutcome::Completed { bytes: 200_000 }
        );
    }

    #[tokio::test]
    async fn test_chunks_do_not_exceed_chunk_size() {
        let dir = TempDir::new().unwrap();
        let tool = fake_transcoder(&dir, "big", "head -c 300000 /dev/zero");

        let mut stream = runner(tool).run(&plan(), "https://youtu.be/abc").unwrap();
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= DEFAULT_CHUNK_SIZE);
            total += chunk.len();
        }
        assert_eq!(total, 300_000);
    }

    #[tokio::test]
    async fn test_nonzero_exit_ends_with_error() {
        let dir = TempDir::new().unwrap();
        let tool = fake_transcoder(&dir, "fails", "printf partial; exit 3");

        let mut stream = runner(tool).run(&plan(), "https://youtu.be/abc").unwrap();
        let outcome = stream.take_outcome().unwrap();
        let (data, error) = collect(stream).await;

        assert_eq!(data, b"partial");
        assert!(error.is_some());
        match outcome.await.unwrap() {
            PipelineOutcome::Aborted { bytes, reason } => {
                assert_eq!(bytes, 7);
                assert!(matches!(reason, AbortReason::ExitFailure(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_killed_mid_stream_is_reaped() {
        let dir = TempDir::new().unwrap();
        // Ten full chunks, then the process dies from SIGKILL
        let tool = fake_transcoder(&dir, "killed", "head -c 655360 /dev/zero; kill -9 $$");

        let mut stream = runner(tool).run(&plan(), "https://youtu.be/abc").unwrap();
        let pid = stream.pid().unwrap();
        let outcome = stream.take_outcome().unwrap();

        let (data, error) = tokio::time::timeout(Duration::from_secs(10), collect(stream))
            .await
            .expect("stream must terminate");

        assert_eq!(data.len(), 655_360);
        assert!(error.is_some());
        let outcome = outcome.await.unwrap();
        assert_eq!(outcome.state(), PipelineState::Aborted);

        #[cfg(target_os = "linux")]
        assert!(is_reaped(pid));
        let _ = pid;
    }

    #[tokio::test]
    async fn test_killed_with_helper_holding_output() {
        let dir = TempDir::new().unwrap();
        // The background helper keeps stdout open after the transcoder dies, like ffmpeg
        // under a killed yt-dlp
        let tool = fake_transcoder(
            &dir,
            "orphaning",
            "sleep 30 & echo $! > \"$0.helper\"; head -c 655360 /dev/zero; kill -9 $$",
        );

        let mut stream = runner(tool.clone()).run(&plan(), "https://youtu.be/abc").unwrap();
        let pid = stream.pid().unwrap();
        let outcome = stream.take_outcome().unwrap();

        let (data, error) = tokio::time::timeout(Duration::from_secs(10), collect(stream))
            .await
            .expect("stream must terminate while the helper is alive");

        assert_eq!(data.len(), 655_360);
        assert!(error.is_some());

        match outcome.await.unwrap() {
            PipelineOutcome::Aborted { bytes, reason } => {
                assert_eq!(bytes, 655_360);
                assert!(matches!(reason, AbortReason::OutputHeldOpen(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        #[cfg(target_os = "linux")]
        {
            assert!(is_reaped(pid));

            let helper: u32 = std::fs::read_to_string(tool.with_extension("helper"))
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while !is_dead(helper) && std::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(is_dead(helper));
        }
        let _ = pid;
    }

    #[tokio::test]
    async fn test_dropping_stream_kills_child() {
        let dir = TempDir::new().unwrap();
        // Never ends on its own
        let tool = fake_transcoder(&dir, "endless", "exec cat /dev/zero");

        let mut stream = runner(tool).run(&plan(), "https://youtu.be/abc").unwrap();
        let pid = stream.pid().unwrap();
        let outcome = stream.take_outcome().unwrap();

        for _ in 0..3 {
            stream.next().await.unwrap().unwrap();
        }
        drop(stream);

        let outcome = tokio::time::timeout(Duration::from_secs(10), outcome)
            .await
            .expect("cleanup must finish")
            .unwrap();

        match outcome {
            PipelineOutcome::Aborted { reason, bytes } => {
                assert_eq!(reason, AbortReason::Cancelled);
                assert!(bytes > 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        #[cfg(target_os = "linux")]
        assert!(is_reaped(pid));
        let _ = pid;
    }

    #[tokio::test]
    async fn test_undrained_stream_is_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let tool = fake_transcoder(&dir, "endless", "exec cat /dev/zero");

        let mut stream = runner(tool).run(&plan(), "https://youtu.be/abc").unwrap();
        let outcome = stream.take_outcome().unwrap();
        // Never polled
        drop(stream);

        let outcome = tokio::time::timeout(Duration::from_secs(10), outcome)
            .await
            .expect("cleanup must finish")
            .unwrap();
        assert_eq!(outcome.state(), PipelineState::Aborted);
    }

    #[tokio::test]
    async fn test_concurrent_pipelines_are_isolated() {
        let dir = TempDir::new().unwrap();
        let a = fake_transcoder(&dir, "a", "yes a | head -c 100000 | tr -d '\\n'");
        let b = fake_transcoder(&dir, "b", "yes b | head -c 100000 | tr -d '\\n'");

        let stream_a = runner(a).run(&plan(), "https://youtu.be/a").unwrap();
        let stream_b = runner(b).run(&plan(), "https://youtu.be/b").unwrap();
        assert_ne!(stream_a.pid(), stream_b.pid());

        let ((data_a, err_a), (data_b, err_b)) = tokio::join!(collect(stream_a), collect(stream_b));

        assert!(err_a.is_none() && err_b.is_none());
        assert_eq!(data_a.len(), 50_000);
        assert_eq!(data_b.len(), 50_000);
        assert!(data_a.iter().all(|byte| *byte == b'a'));
        assert!(data_b.iter().all(|byte| *byte == b'b'));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = runner(PathBuf::from("/nonexistent/transcoder"));
        let result = runner.run(&plan(), "https://youtu.be/abc");
        assert!(matches!(result, Err(GatewayError::PipelineAborted(_))));
    }

    #[test]
    fn test_command_line() {
        let runner = PipelineRunner::new("yt-dlp", DEFAULT_CHUNK_SIZE, Duration::from_secs(1));
        let line = runner.command_line(&plan(), "https://youtu.be/abc");
        assert_eq!(line[0], "yt-dlp");
        assert_eq!(line[2], "22+bestaudio/best");
    }
}
