use market_core::{Notice, NoticeLevel, Notifier};
use parking_lot::Mutex;
use tracing::{error, info, warn};

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        let tx = notice.tx_hash.map(|h| h.to_string()).unwrap_or_default();
        let link = notice.explorer_url.as_deref().unwrap_or("");
        match notice.level {
            NoticeLevel::Success => {
                info!(target: "app", title = %notice.title, tx = %tx, explorer = %link, "{}", notice.message)
            }
            NoticeLevel::Info => {
                warn!(target: "app", title = %notice.title, "{}", notice.message)
            }
            NoticeLevel::Error => {
                error!(target: "app", title = %notice.title, tx = %tx, "{}", notice.message)
            }
        }
    }
}

/// Keeps notices in memory until drained.
#[derive(Debug, Default)]
pub struct NoticeLog {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }

    pub fn len(&self) -> usize {
        self.notices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.lock().is_empty()
    }
}

impl Notifier for NoticeLog {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Fans a notice out to several notifiers.
pub struct Fanout(pub Vec<Box<dyn Notifier>>);

impl Notifier for Fanout {
    fn notify(&self, notice: Notice) {
        for n in &self.0 {
            n.notify(notice.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn log_drains_in_order() {
        let log = NoticeLog::new();
        log.notify(Notice::success("Listed", "NFT listed"));
        log.notify(Notice::error("Failed", "boom"));
        let got = log.drain();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].level, NoticeLevel::Success);
        assert!(log.is_empty());
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(NoticeLog::new());
        let b = Arc::new(NoticeLog::new());
        let fan = Fanout(vec![
            Box::new(Arc::clone(&a)),
            Box::new(Arc::clone(&b)),
            Box::new(LogNotifier),
        ]);
        fan.notify(Notice::info("Transaction Rejected", "You rejected the request"));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
