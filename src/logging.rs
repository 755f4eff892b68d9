use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Lines kept for slow `/api/logs` subscribers before they start lagging.
pub const LOG_CHANNEL_CAPACITY: usize = 500;

/// Tees every formatted log line into a broadcast channel so the web API
/// can stream it, optionally echoing to stdout.
#[derive(Clone)]
pub struct SseMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub struct SseWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(line); // no subscribers is fine
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Installs the global subscriber and returns the sender feeding `/api/logs`.
/// A second call keeps the first subscriber.
pub fn init_tracing(level: Level, suppress_stdout: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
    let make_writer = SseMakeWriter {
        sender: log_tx.clone(),
        suppress_stdout,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writer_broadcasts_each_line() {
        let (tx, mut rx) = broadcast::channel(4);
        let make_writer = SseMakeWriter {
            sender: tx,
            suppress_stdout: true,
        };
        let mut writer = make_writer.make_writer();
        let written = writer.write(b"sync pass done\n").unwrap();
        assert_eq!(written, 15);
        assert_eq!(rx.try_recv().unwrap(), "sync pass done\n");
    }

    #[test]
    fn writer_without_subscribers_still_succeeds() {
        let (tx, rx) = broadcast::channel::<String>(4);
        drop(rx);
        let mut writer = SseMakeWriter {
            sender: tx,
            suppress_stdout: true,
        }
        .make_writer();
        assert!(writer.write(b"nobody listening").is_ok());
        assert!(writer.flush().is_ok());
    }
}
