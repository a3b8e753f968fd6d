//! Batched broadcast dispatch.
//!
//! One message, N recipients. Recipients are chunked into ordered batches;
//! batches run strictly sequentially while every send inside a batch is
//! issued concurrently and joined before the batch is considered done.
//! A failing recipient is an outcome, not an error: it is counted, logged
//! with its reason, and never aborts the job or retries.

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, Instant};

use crate::{
    audit::{AuditEvent, AuditLogger},
    domain::UserId,
    ports::{OutboundSender, ProgressSink},
    Error, Result,
};

#[derive(Clone, Copy, Debug)]
pub struct BroadcastOptions {
    batch_size: usize,
    batch_delay: Duration,
}

impl BroadcastOptions {
    pub const DEFAULT_BATCH_SIZE: usize = 30;
    pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(1000);

    /// Zero-size batches are nonsensical; that is a startup-time config
    /// error, not something to discover mid-job.
    pub fn new(batch_size: usize, batch_delay: Duration) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config(
                "broadcast batch size must be positive".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            batch_delay,
        })
    }
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            batch_delay: Self::DEFAULT_BATCH_DELAY,
        }
    }
}

/// Final tally of one broadcast job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl BroadcastReport {
    pub fn total(&self) -> usize {
        self.delivered + self.failed
    }

    /// Delivered share in percent; 100 for an empty job.
    pub fn success_rate(&self) -> u32 {
        if self.total() == 0 {
            return 100;
        }
        (self.delivered * 100 / self.total()) as u32
    }
}

/// Running tally handed to the progress sink after each batch.
#[derive(Clone, Copy, Debug)]
pub struct BroadcastProgress {
    pub delivered: usize,
    pub failed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl BroadcastProgress {
    pub fn settled(&self) -> usize {
        self.delivered + self.failed
    }

    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        (self.settled() * 100 / self.total) as u32
    }
}

/// Deliver `message` to every recipient in the snapshot.
///
/// At-most-once per recipient: a permanent failure (user blocked the bot,
/// dead chat) counts in `failed` and is never retried within the job.
pub async fn run_broadcast(
    message: &str,
    recipients: &[UserId],
    sender: Arc<dyn OutboundSender>,
    progress: &dyn ProgressSink,
    audit: &AuditLogger,
    opts: BroadcastOptions,
) -> BroadcastReport {
    let started = Instant::now();
    let total = recipients.len();
    let mut report = BroadcastReport::default();

    if total == 0 {
        audit.append(AuditEvent::broadcast_summary(0, 0, 0, 0, message));
        return report;
    }

    for (index, batch) in recipients.chunks(opts.batch_size).enumerate() {
        if index > 0 && !opts.batch_delay.is_zero() {
            sleep(opts.batch_delay).await;
        }

        // Fan out the whole batch, then join every send before moving on.
        let mut handles = Vec::with_capacity(batch.len());
        for &recipient in batch {
            let sender = Arc::clone(&sender);
            let text = message.to_string();
            let handle =
                tokio::spawn(async move { sender.send_text(recipient, &text).await });
            handles.push((recipient, handle));
        }

        for (recipient, handle) in handles {
            match handle.await {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    audit.append(AuditEvent::broadcast_failure(recipient.0, &e.to_string()));
                }
                Err(e) => {
                    report.failed += 1;
                    audit.append(AuditEvent::broadcast_failure(
                        recipient.0,
                        &format!("send task aborted: {e}"),
                    ));
                }
            }
        }

        let snapshot = BroadcastProgress {
            delivered: report.delivered,
            failed: report.failed,
            total,
            elapsed: started.elapsed(),
        };
        if let Err(e) = progress.report(snapshot).await {
            // Best effort only (the status message may have expired).
            eprintln!("[BROADCAST] progress report failed: {e}");
        }
    }

    report.elapsed = started.elapsed();
    audit.append(AuditEvent::broadcast_summary(
        total,
        report.delivered,
        report.failed,
        report.elapsed.as_millis() as u64,
        message,
    ));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NullProgress;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn tmp_log(prefix: &str) -> AuditLogger {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis();
        let pid = std::process::id();
        AuditLogger::new(PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.log")))
    }

    fn audit_events(audit: &AuditLogger) -> Vec<serde_json::Value> {
        std::fs::read_to_string(audit.path())
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    struct RecordingSender {
        sends: Mutex<Vec<i64>>,
        fail_for: Vec<i64>,
    }

    impl RecordingSender {
        fn new(fail_for: Vec<i64>) -> Arc<Self> {
            Arc::new(Self {
                sends: Mutex::new(Vec::new()),
                fail_for,
            })
        }

        fn sends(&self) -> Vec<i64> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutboundSender for RecordingSender {
        async fn send_text(&self, user: UserId, _text: &str) -> Result<()> {
            self.sends.lock().unwrap().push(user.0);
            if self.fail_for.contains(&user.0) {
                return Err(Error::Transport(format!("recipient {} unreachable", user.0)));
            }
            Ok(())
        }
    }

    struct RecordingProgress {
        snapshots: Mutex<Vec<(usize, usize, u32)>>,
    }

    impl RecordingProgress {
        fn new() -> Self {
            Self {
                snapshots: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingProgress {
        async fn report(&self, p: BroadcastProgress) -> Result<()> {
            self.snapshots
                .lock()
                .unwrap()
                .push((p.delivered, p.failed, p.percent()));
            Ok(())
        }
    }

    struct FailingProgress;

    #[async_trait]
    impl ProgressSink for FailingProgress {
        async fn report(&self, _p: BroadcastProgress) -> Result<()> {
            Err(Error::Transport("status message expired".to_string()))
        }
    }

    fn ids(raw: &[i64]) -> Vec<UserId> {
        raw.iter().copied().map(UserId).collect()
    }

    fn fast_opts(batch_size: usize) -> BroadcastOptions {
        BroadcastOptions::new(batch_size, Duration::ZERO).unwrap()
    }

    #[tokio::test]
    async fn zero_recipients_sends_nothing() {
        let sender = RecordingSender::new(vec![]);
        let audit = tmp_log("herald-bc-empty");

        let report = run_broadcast(
            "hello",
            &[],
            sender.clone(),
            &NullProgress,
            &audit,
            fast_opts(30),
        )
        .await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 0);
        assert!(sender.sends().is_empty());

        // The summary record still lands.
        let events = audit_events(&audit);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "broadcast_summary");
        assert_eq!(events[0]["total"], 0);
    }

    #[tokio::test]
    async fn delivers_exactly_once_per_recipient_across_batches() {
        let sender = RecordingSender::new(vec![]);
        let audit = tmp_log("herald-bc-batches");
        let progress = RecordingProgress::new();

        let report = run_broadcast(
            "hi",
            &ids(&[1, 2, 3]),
            sender.clone(),
            &progress,
            &audit,
            fast_opts(2),
        )
        .await;

        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);

        let mut sends = sender.sends();
        sends.sort_unstable();
        assert_eq!(sends, vec![1, 2, 3]);

        // One progress snapshot per batch, settled counts in batch order.
        let snaps = progress.snapshots.lock().unwrap().clone();
        assert_eq!(snaps, vec![(2, 0, 66), (3, 0, 100)]);
    }

    #[tokio::test]
    async fn first_batch_completes_before_the_second_starts() {
        let sender = RecordingSender::new(vec![]);
        let audit = tmp_log("herald-bc-order");

        run_broadcast(
            "hi",
            &ids(&[1, 2, 3, 4]),
            sender.clone(),
            &NullProgress,
            &audit,
            fast_opts(2),
        )
        .await;

        let sends = sender.sends();
        let first: Vec<_> = sends[..2].to_vec();
        let second: Vec<_> = sends[2..].to_vec();
        assert!(first.contains(&1) && first.contains(&2));
        assert!(second.contains(&3) && second.contains(&4));
    }

    #[tokio::test]
    async fn failures_are_counted_and_logged_but_never_abort() {
        let sender = RecordingSender::new(vec![2]);
        let audit = tmp_log("herald-bc-fail");

        let report = run_broadcast(
            "hi",
            &ids(&[1, 2, 3]),
            sender.clone(),
            &NullProgress,
            &audit,
            fast_opts(2),
        )
        .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.success_rate(), 66);

        let events = audit_events(&audit);
        let failures: Vec<_> = events
            .iter()
            .filter(|e| e["event"] == "broadcast_failure")
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["recipient"], 2);

        let summary = events.last().unwrap();
        assert_eq!(summary["event"], "broadcast_summary");
        assert_eq!(summary["delivered"], 2);
        assert_eq!(summary["failed"], 1);
    }

    #[tokio::test]
    async fn failing_progress_sink_does_not_abort_the_job() {
        let sender = RecordingSender::new(vec![]);
        let audit = tmp_log("herald-bc-progress-fail");

        let report = run_broadcast(
            "hi",
            &ids(&[1, 2, 3]),
            sender.clone(),
            &FailingProgress,
            &audit,
            fast_opts(1),
        )
        .await;

        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        assert!(matches!(
            BroadcastOptions::new(0, Duration::ZERO),
            Err(Error::Config(_))
        ));
    }
}
