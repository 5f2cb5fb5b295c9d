// 日志：控制台 + 按天落盘，定时清理过期日志
// Logging: console + one file per day, cron-driven retention sweep

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("无法创建日志文件: {0}")]
    Appender(#[from] InitError),
    #[error("日志系统已初始化: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Timestamps rendered in a fixed timezone.
#[derive(Clone, Copy, Debug)]
pub struct ZonedTime(pub Tz);

impl FormatTime for ZonedTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Utc::now().with_timezone(&self.0).format("%Y-%m-%d %H:%M:%S"))
    }
}

/// `<dir>/YYYY-MM-DD.log`, rotated at UTC midnight.
pub fn daily_appender(log_dir: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_suffix("log")
        .build(log_dir)
}

/// The returned guard flushes the file writer on drop; keep it for the
/// lifetime of the process.
pub fn init(log_dir: &Path, tz: Tz) -> Result<WorkerGuard, LogInitError> {
    let (file_writer, guard) = tracing_appender::non_blocking(daily_appender(log_dir)?);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(ZonedTime(tz)))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(ZonedTime(tz))
                .with_writer(file_writer),
        )
        .try_init()?;
    Ok(guard)
}

/// Delete `*.log` files in `dir` last modified more than `retention` before `now`.
pub async fn sweep_old_logs(dir: &Path, retention: Duration, now: SystemTime) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > retention {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "删除过期日志失败"),
            }
        }
    }
    Ok(removed)
}

/// Sweep once now, then on every tick of `schedule` (evaluated in `tz`).
pub async fn run_retention_schedule(dir: PathBuf, retention: Duration, schedule: Schedule, tz: Tz) {
    loop {
        match sweep_old_logs(&dir, retention, SystemTime::now()).await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "已清理过期日志"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "日志清理失败"),
        }

        let now = Utc::now().with_timezone(&tz);
        let Some(next) = schedule.upcoming(tz).next() else {
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::from_secs(0));
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_only_removes_expired_log_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2024-01-01.log"), "old").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let day = Duration::from_secs(24 * 60 * 60);
        let removed = sweep_old_logs(dir.path(), day, SystemTime::now()).await.unwrap();
        assert_eq!(removed, 0);

        let later = SystemTime::now() + day * 2;
        let removed = sweep_old_logs(dir.path(), day, later).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("2024-01-01.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn daily_file_is_named_by_utc_date() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let (mut writer, guard) = tracing_appender::non_blocking(daily_appender(dir.path()).unwrap());
        writer.write_all(b"line\n").unwrap();
        drop(writer);
        // guard 释放时刷盘
        drop(guard);

        let expected = dir.path().join(format!("{}.log", Utc::now().format("%Y-%m-%d")));
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "line\n");
    }
}
