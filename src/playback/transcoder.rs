//! Transcode job supervisor
//!
//! Launches FFmpeg for DASH delivery, tracks progress and heartbeats, and
//! reaps jobs whose session went quiet. The supervisor is a single
//! cooperative reconciler: all state updates flow through one mailbox task,
//! while FFmpeg children run unbounded alongside it. Output segments live
//! under a per-job directory that is removed on any terminal state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::model::{MediaPart, TranscodeJob, TranscodeJobState, TranscodeTarget};

/// A running job must see a heartbeat (session or progress) within this
/// window or it is cancelled.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// FFmpeg must come up within this budget.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);

enum Msg {
    Start {
        session_id: Uuid,
        part: MediaPart,
        target: TranscodeTarget,
        seek_offset_ms: Option<i64>,
        reply: oneshot::Sender<Result<TranscodeJob>>,
    },
    Cancel {
        job_id: Uuid,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelForSession {
        session_id: Uuid,
    },
    SessionHeartbeat {
        session_id: Uuid,
    },
    Progress {
        job_id: Uuid,
        out_time_ms: i64,
    },
    Tick,
}

struct LiveJob {
    row: TranscodeJob,
    child: Child,
    duration_ms: Option<i64>,
    last_ping: OffsetDateTime,
    /// FFmpeg finished writing segments; the job stays live (and its
    /// output directory stays) until the session releases the seek window.
    encode_done: bool,
}

/// Public handle. Cloneable; all mutations route through the mailbox.
#[derive(Clone)]
pub struct TranscodeSupervisor {
    tx: mpsc::Sender<Msg>,
}

impl TranscodeSupervisor {
    pub fn start_supervisor(db: Database, cache_root: PathBuf, ffmpeg_path: String) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let actor = SupervisorActor {
            db,
            cache_root,
            ffmpeg_path,
            jobs: HashMap::new(),
            by_session_part: HashMap::new(),
            self_tx: tx.clone(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Start (or reuse) a transcode for a session and part. A running job
    /// with a different target or seek window is cancelled first.
    pub async fn start(
        &self,
        session_id: Uuid,
        part: MediaPart,
        target: TranscodeTarget,
        seek_offset_ms: Option<i64>,
    ) -> Result<TranscodeJob> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Start { session_id, part, target, seek_offset_ms, reply })
            .await
            .context("supervisor gone")?;
        rx.await.context("supervisor dropped request")?
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Cancel { job_id, reply })
            .await
            .context("supervisor gone")?;
        rx.await.context("supervisor dropped request")?
    }

    /// Cancel every job owned by a session (expiry, stop).
    pub async fn cancel_for_session(&self, session_id: Uuid) {
        let _ = self.tx.send(Msg::CancelForSession { session_id }).await;
    }

    /// Session heartbeats keep the session's jobs alive.
    pub async fn session_heartbeat(&self, session_id: Uuid) {
        let _ = self.tx.send(Msg::SessionHeartbeat { session_id }).await;
    }

    /// Periodic reconciliation: child exits, heartbeat expiry, orphan dirs.
    pub async fn tick(&self) {
        let _ = self.tx.send(Msg::Tick).await;
    }
}

struct SupervisorActor {
    db: Database,
    cache_root: PathBuf,
    ffmpeg_path: String,
    jobs: HashMap<Uuid, LiveJob>,
    by_session_part: HashMap<(Uuid, Uuid), Uuid>,
    self_tx: mpsc::Sender<Msg>,
}

impl SupervisorActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Msg>) {
        // Rows left running by a previous process have no live child; fail
        // them and clear their output directories.
        if let Err(e) = self.reap_stale_rows().await {
            warn!(error = %e, "Stale transcode row cleanup failed");
        }

        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Start { session_id, part, target, seek_offset_ms, reply } => {
                    let result = self.handle_start(session_id, part, target, seek_offset_ms).await;
                    let _ = reply.send(result);
                }
                Msg::Cancel { job_id, reply } => {
                    let result = self.finish_job(job_id, TranscodeJobState::Cancelled, None).await;
                    let _ = reply.send(result);
                }
                Msg::CancelForSession { session_id } => {
                    let ids: Vec<Uuid> = self
                        .jobs
                        .values()
                        .filter(|j| j.row.session_id == session_id)
                        .map(|j| j.row.id)
                        .collect();
                    for id in ids {
                        if let Err(e) =
                            self.finish_job(id, TranscodeJobState::Cancelled, None).await
                        {
                            warn!(job_id = %id, error = %e, "Session cancel failed");
                        }
                    }
                }
                Msg::SessionHeartbeat { session_id } => {
                    let now = OffsetDateTime::now_utc();
                    for job in self.jobs.values_mut() {
                        if job.row.session_id == session_id {
                            job.last_ping = now;
                        }
                    }
                }
                Msg::Progress { job_id, out_time_ms } => {
                    self.handle_progress(job_id, out_time_ms).await;
                }
                Msg::Tick => {
                    self.reconcile().await;
                }
            }
        }
    }

    async fn handle_start(
        &mut self,
        session_id: Uuid,
        part: MediaPart,
        target: TranscodeTarget,
        seek_offset_ms: Option<i64>,
    ) -> Result<TranscodeJob> {
        // Exactly one running job per (session, part); an identical request
        // reuses it, a diverging one replaces it.
        if let Some(existing_id) = self.by_session_part.get(&(session_id, part.id)).copied() {
            if let Some(live) = self.jobs.get(&existing_id) {
                if live.row.target == target && live.row.seek_offset_ms == seek_offset_ms {
                    debug!(job_id = %existing_id, "Reusing running transcode job");
                    return Ok(live.row.clone());
                }
            }
            info!(job_id = %existing_id, "Replacing transcode job with new targets");
            self.finish_job(existing_id, TranscodeJobState::Cancelled, None).await?;
        }

        let job_id = Uuid::new_v4();
        let output_dir = self.cache_root.join(job_id.to_string());
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("create {}", output_dir.display()))?;

        let now = OffsetDateTime::now_utc();
        let row = TranscodeJob {
            id: job_id,
            session_id,
            media_part_id: part.id,
            state: TranscodeJobState::Pending,
            progress_percent: 0.0,
            output_dir: output_dir.to_string_lossy().to_string(),
            seek_offset_ms,
            target: target.clone(),
            error_message: None,
            last_ping_at: now,
            created_at: now,
            updated_at: now,
        };
        self.db.transcode_jobs().insert(&row).await?;

        let spawn_result = tokio::time::timeout(
            LAUNCH_TIMEOUT,
            self.spawn_ffmpeg(&part, &target, seek_offset_ms, &output_dir, job_id),
        )
        .await;
        let child = match spawn_result {
            Ok(Ok(child)) => child,
            Ok(Err(e)) => {
                self.db
                    .transcode_jobs()
                    .update_state(job_id, TranscodeJobState::Failed, Some(&e.to_string()))
                    .await?;
                let _ = tokio::fs::remove_dir_all(&output_dir).await;
                return Err(e);
            }
            Err(_) => {
                let message = "ffmpeg launch timed out";
                self.db
                    .transcode_jobs()
                    .update_state(job_id, TranscodeJobState::Failed, Some(message))
                    .await?;
                let _ = tokio::fs::remove_dir_all(&output_dir).await;
                anyhow::bail!(message);
            }
        };

        let mut row = row;
        row.state = TranscodeJobState::Running;
        self.db
            .transcode_jobs()
            .update_state(job_id, TranscodeJobState::Running, None)
            .await?;

        info!(
            job_id = %job_id,
            session_id = %session_id,
            part_id = %part.id,
            video = %target.video_codec,
            audio = %target.audio_codec,
            hw = target.hardware_accel,
            "Transcode started"
        );

        self.jobs.insert(
            job_id,
            LiveJob {
                row: row.clone(),
                child,
                duration_ms: part.duration_ms,
                last_ping: now,
                encode_done: false,
            },
        );
        self.by_session_part.insert((session_id, part.id), job_id);
        Ok(row)
    }

    async fn spawn_ffmpeg(
        &self,
        part: &MediaPart,
        target: &TranscodeTarget,
        seek_offset_ms: Option<i64>,
        output_dir: &std::path::Path,
        job_id: Uuid,
    ) -> Result<Child> {
        let manifest = output_dir.join("manifest.mpd");
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-y");

        if let Some(seek_ms) = seek_offset_ms {
            cmd.args(["-ss", &format!("{:.3}", seek_ms as f64 / 1000.0)]);
        }
        cmd.args(["-i", &part.file_path]);

        if target.hardware_accel {
            cmd.args(["-c:v", &hw_encoder(&target.video_codec)]);
        } else {
            cmd.args(["-c:v", sw_encoder(&target.video_codec)]);
            cmd.args(["-preset", "veryfast"]);
        }
        if let Some(bitrate) = target.video_bitrate {
            cmd.args(["-b:v", &bitrate.to_string()]);
        }
        let mut filters: Vec<String> = Vec::new();
        if let (Some(w), Some(h)) = (target.max_width, target.max_height) {
            filters.push(format!("scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease"));
        }
        if target.tone_mapping {
            filters.push(
                "zscale=t=linear:npl=100,tonemap=hable,zscale=p=bt709:t=bt709:m=bt709,format=yuv420p"
                    .to_string(),
            );
        }
        if !filters.is_empty() {
            cmd.args(["-vf", &filters.join(",")]);
        }

        cmd.args(["-c:a", sw_audio_encoder(&target.audio_codec)]);
        if let Some(bitrate) = target.audio_bitrate {
            cmd.args(["-b:a", &bitrate.to_string()]);
        } else {
            cmd.args(["-b:a", "128k"]);
        }
        if let Some(channels) = target.audio_channels {
            cmd.args(["-ac", &channels.to_string()]);
        }

        cmd.args(["-f", "dash"])
            .args(["-seg_duration", "4"])
            .args(["-use_template", "1"])
            .args(["-use_timeline", "1"])
            .args(["-progress", "pipe:1"])
            .args(["-nostats", "-loglevel", "error"])
            .arg(&manifest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("spawn ffmpeg")?;

        // Progress parser: `-progress pipe:1` emits key=value lines; the
        // out_time updates double as the job's own heartbeat.
        if let Some(stdout) = child.stdout.take() {
            let tx = self.self_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(value) = line.strip_prefix("out_time_us=") {
                        if let Ok(us) = value.trim().parse::<i64>() {
                            let _ = tx
                                .send(Msg::Progress { job_id, out_time_ms: us / 1000 })
                                .await;
                        }
                    }
                }
            });
        }

        Ok(child)
    }

    async fn handle_progress(&mut self, job_id: Uuid, out_time_ms: i64) {
        let Some(job) = self.jobs.get_mut(&job_id) else { return };
        job.last_ping = OffsetDateTime::now_utc();
        let percent = match job.duration_ms {
            Some(total) if total > 0 => ((out_time_ms as f64 / total as f64) * 100.0).min(100.0),
            _ => 0.0,
        };
        job.row.progress_percent = percent;
        if let Err(e) = self.db.transcode_jobs().update_progress(job_id, percent).await {
            debug!(job_id = %job_id, error = %e, "Progress write failed");
        }
    }

    /// Reconcile the live table: finished children, heartbeat expiry.
    async fn reconcile(&mut self) {
        let now = OffsetDateTime::now_utc();
        let mut finished: Vec<(Uuid, TranscodeJobState, Option<String>)> = Vec::new();

        for (id, job) in self.jobs.iter_mut() {
            match job.child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    // Encode finished; the job and its segments stay alive
                    // for the session's seek window.
                    job.encode_done = true;
                }
                Ok(Some(status)) => {
                    finished.push((
                        *id,
                        TranscodeJobState::Failed,
                        Some(format!("ffmpeg exited with {status}")),
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    finished.push((*id, TranscodeJobState::Failed, Some(e.to_string())));
                }
            }

            let silent_for = now - job.last_ping;
            if silent_for > HEARTBEAT_TIMEOUT && job.row.state == TranscodeJobState::Running {
                let state = if job.encode_done {
                    TranscodeJobState::Completed
                } else {
                    TranscodeJobState::Cancelled
                };
                let message = (!job.encode_done).then(|| "heartbeat timeout".to_string());
                finished.push((*id, state, message));
            }
        }

        for (id, state, message) in finished {
            if let Err(e) = self.finish_job(id, state, message.as_deref()).await {
                warn!(job_id = %id, error = %e, "Job finish failed");
            }
        }
    }

    /// Drive one job to a terminal state: kill the child if needed, update
    /// the row, delete the output directory. Completed jobs keep their
    /// segments until the session lets go of the seek window.
    async fn finish_job(
        &mut self,
        job_id: Uuid,
        state: TranscodeJobState,
        error_message: Option<&str>,
    ) -> Result<()> {
        debug_assert!(state.is_terminal());
        let Some(mut job) = self.jobs.remove(&job_id) else {
            // Not live (already terminal or pre-spawn failure); still make
            // sure the row agrees.
            self.db.transcode_jobs().update_state(job_id, state, error_message).await?;
            return Ok(());
        };
        self.by_session_part
            .remove(&(job.row.session_id, job.row.media_part_id));

        if !job.encode_done {
            if let Err(e) = job.child.start_kill() {
                debug!(job_id = %job_id, error = %e, "Child already gone");
            }
        }
        let _ = job.child.wait().await;

        self.db.transcode_jobs().update_state(job_id, state, error_message).await?;

        // Output segments are removed on every terminal state.
        let dir = PathBuf::from(&job.row.output_dir);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if dir.exists() {
                warn!(dir = %dir.display(), error = %e, "Output dir removal failed");
            }
        }

        match state {
            TranscodeJobState::Failed => {
                error!(job_id = %job_id, error = ?error_message, "Transcode failed")
            }
            _ => info!(job_id = %job_id, state = state.as_str(), "Transcode finished"),
        }
        Ok(())
    }

    /// Rows still marked running from a previous process have no child to
    /// wait on; fail them and clear their directories.
    async fn reap_stale_rows(&self) -> Result<()> {
        for row in self.db.transcode_jobs().list_active().await? {
            info!(job_id = %row.id, "Failing transcode row from previous run");
            self.db
                .transcode_jobs()
                .update_state(row.id, TranscodeJobState::Failed, Some("server restarted"))
                .await?;
            let _ = tokio::fs::remove_dir_all(&row.output_dir).await;
        }
        Ok(())
    }
}

fn sw_encoder(codec: &str) -> &'static str {
    match codec {
        "hevc" | "h265" => "libx265",
        "av1" => "libsvtav1",
        _ => "libx264",
    }
}

fn hw_encoder(codec: &str) -> String {
    match codec {
        "hevc" | "h265" => "hevc_vaapi".to_string(),
        "av1" => "av1_vaapi".to_string(),
        _ => "h264_vaapi".to_string(),
    }
}

fn sw_audio_encoder(codec: &str) -> &'static str {
    match codec {
        "opus" => "libopus",
        "ac3" => "ac3",
        "flac" => "flac",
        _ => "aac",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_mapping() {
        assert_eq!(sw_encoder("h264"), "libx264");
        assert_eq!(sw_encoder("hevc"), "libx265");
        assert_eq!(sw_audio_encoder("aac"), "aac");
        assert_eq!(sw_audio_encoder("opus"), "libopus");
        assert_eq!(hw_encoder("h264"), "h264_vaapi");
    }
}
