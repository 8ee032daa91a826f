//! Best-effort operator notification with an escalation loop and a remote
//! `/stop` command.

pub mod telegram;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SLICE};
use crate::config::RunConfig;
use crate::controller::SuccessSink;
use crate::error::NotifyError;
use crate::logger;
use crate::types::SuccessKind;

pub const PLACEHOLDER_TOKEN: &str = "1234567890:ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const PLACEHOLDER_CHAT: &str = "1234567890";

const STOP_COMMAND: &str = "/stop";
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// One update received from the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    /// Strictly increasing per update.
    pub cursor: i64,
    pub chat: String,
    pub text: String,
}

pub trait Transport: Send + Sync {
    fn send(&self, chat: &str, text: &str) -> Result<(), NotifyError>;

    /// Updates with a cursor greater than `after`.
    fn poll_incoming(&self, after: Option<i64>, timeout: Duration) -> Result<Vec<Incoming>, NotifyError>;
}

pub trait LocalAlert: Send + Sync {
    fn alert(&self, text: &str);
}

/// Terminal bell, plus the system alert sound on macOS.
pub struct TerminalBell;

impl LocalAlert for TerminalBell {
    fn alert(&self, text: &str) {
        use std::io::Write;
        logger::info_p("notify", &format!("local alert: {}", text));
        let mut out = std::io::stdout();
        out.write_all(b"\x07\x07").ok();
        out.flush().ok();
        #[cfg(target_os = "macos")]
        {
            std::thread::spawn(|| {
                std::process::Command::new("afplay")
                    .arg("/System/Library/Sounds/Glass.aiff")
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status()
                    .ok();
            });
        }
    }
}

/// How one alert delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Initial message only.
    Sent,
    /// Operator sent `/stop`; acknowledgement delivered.
    Acknowledged,
    /// Max duration reached; timeout notice delivered.
    TimedOut,
    /// Process shutdown interrupted the escalation loop.
    Cancelled,
    /// Remote channel unusable; local alert raised instead.
    Local,
}

/// State of a single alert delivery.
#[derive(Debug)]
pub struct NotificationSession {
    pub started: Instant,
    pub stop_requested: bool,
    pub cursor: Option<i64>,
}

pub fn success_text(kind: SuccessKind) -> &'static str {
    match kind {
        SuccessKind::Booking => "Booking button clicked. Check the next screen.",
        SuccessKind::Waitlist => "Waitlist button clicked. Check the next screen.",
    }
}

fn is_placeholder(token: &str, chat: &str) -> bool {
    token.trim() == PLACEHOLDER_TOKEN || chat.trim() == PLACEHOLDER_CHAT
}

fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else {
        format!("{} s", secs)
    }
}

struct Inner {
    transport: Option<Box<dyn Transport>>,
    chat: String,
    disabled: AtomicBool,
    cancel: AtomicBool,
    local: Box<dyn LocalAlert>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_duration: Duration,
    waitlist_duration: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the notification channel. Clones share state.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn new(
        transport: Box<dyn Transport>,
        chat: &str,
        local: Box<dyn LocalAlert>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        max_duration: Duration,
    ) -> Self {
        Self::build(Some(transport), chat, local, clock, interval, max_duration)
    }

    /// Local alerts only.
    pub fn disabled(local: Box<dyn LocalAlert>, clock: Arc<dyn Clock>) -> Self {
        Self::build(None, "", local, clock, Duration::from_secs(5), Duration::ZERO)
    }

    fn build(
        transport: Option<Box<dyn Transport>>,
        chat: &str,
        local: Box<dyn LocalAlert>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        max_duration: Duration,
    ) -> Self {
        logger::register_prefix("notify", logger::COLOR_GREEN);
        let disabled = transport.is_none();
        Self {
            inner: Arc::new(Inner {
                transport,
                chat: chat.trim().to_string(),
                disabled: AtomicBool::new(disabled),
                cancel: AtomicBool::new(false),
                local,
                clock,
                interval,
                max_duration,
                waitlist_duration: Duration::ZERO,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Telegram channel when enabled and really configured, otherwise
    /// local alerts only.
    pub fn from_config(config: &RunConfig, clock: Arc<dyn Clock>) -> Self {
        let local = Box::new(TerminalBell);
        if !config.enable_telegram_notification {
            return Self::disabled(local, clock);
        }
        let token = config.telegram_bot_token.as_deref().unwrap_or_default();
        let chat = config.telegram_chat_id.as_deref().unwrap_or_default();
        if token.is_empty() || chat.is_empty() || is_placeholder(token, chat) {
            let notifier = Self::disabled(local, clock);
            logger::warn_p("notify", "telegram credentials are placeholders; remote alerts disabled");
            return notifier;
        }
        let transport = telegram::TelegramTransport::new(token, config.request_timeout());
        Self::new(
            Box::new(transport),
            chat,
            local,
            clock,
            config.escalation_interval(),
            config.alert_max_duration(),
        )
        .with_waitlist_duration(config.waitlist_alert_duration())
    }

    /// Escalate waitlist alerts too (default: single message). Only takes
    /// effect before the notifier is cloned.
    pub fn with_waitlist_duration(mut self, d: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.waitlist_duration = d;
        }
        self
    }

    /// How long a success alert of `kind` escalates.
    pub fn success_duration(&self, kind: SuccessKind) -> Duration {
        match kind {
            SuccessKind::Booking => self.inner.max_duration,
            SuccessKind::Waitlist => self.inner.waitlist_duration,
        }
    }

    pub fn is_remote_enabled(&self) -> bool {
        !self.inner.disabled.load(Ordering::Acquire)
    }

    /// Deliver `text` on a background thread. Never blocks the caller.
    pub fn alert(&self, text: &str, max_duration: Duration) {
        let this = self.clone();
        let text = text.to_string();
        let handle = std::thread::spawn(move || {
            this.deliver(&text, max_duration);
        });
        let mut workers = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
    }

    /// Send the startup summary without escalation.
    pub fn announce(&self, summary: &str) {
        if self.is_remote_enabled() {
            self.alert(summary, Duration::ZERO);
        }
    }

    /// Synchronous delivery; `alert` runs this on its own thread.
    pub fn deliver(&self, text: &str, max_duration: Duration) -> AlertOutcome {
        let inner = &self.inner;
        let Some(transport) = inner.transport.as_deref().filter(|_| self.is_remote_enabled()) else {
            inner.local.alert(text);
            return AlertOutcome::Local;
        };
        if let Err(e) = transport.send(&inner.chat, text) {
            self.disable(&e);
            inner.local.alert(text);
            return AlertOutcome::Local;
        }
        logger::info_p("notify", "alert sent");
        if max_duration.is_zero() {
            return AlertOutcome::Sent;
        }

        // Skip anything sent before this alert.
        let cursor = match transport.poll_incoming(None, Duration::ZERO) {
            Ok(pending) => pending.iter().map(|u| u.cursor).max(),
            Err(e) => {
                self.disable(&e);
                return AlertOutcome::Local;
            }
        };
        let mut session = NotificationSession { started: inner.clock.now(), stop_requested: false, cursor };

        loop {
            let elapsed = inner.clock.now().saturating_duration_since(session.started);
            if elapsed >= max_duration {
                break;
            }
            if !self.sleep(inner.interval) {
                logger::info_p("notify", "alert cancelled by shutdown");
                return AlertOutcome::Cancelled;
            }
            let elapsed = inner.clock.now().saturating_duration_since(session.started);
            if let Err(e) = transport.send(&inner.chat, &format!("Elapsed: {} s...", elapsed.as_secs())) {
                self.disable(&e);
                return AlertOutcome::Local;
            }
            match self.check_stop(transport, &mut session) {
                Ok(true) => {
                    logger::info_p("notify", "stop command received");
                    if let Err(e) = transport.send(&inner.chat, "Received /stop, alerts stopped.") {
                        self.disable(&e);
                    }
                    return AlertOutcome::Acknowledged;
                }
                Ok(false) => {}
                Err(e) => {
                    self.disable(&e);
                    return AlertOutcome::Local;
                }
            }
        }

        let notice = format!(
            "Alert stopped after reaching the maximum duration ({}).",
            human_duration(max_duration)
        );
        if let Err(e) = transport.send(&inner.chat, &notice) {
            self.disable(&e);
        }
        AlertOutcome::TimedOut
    }

    fn check_stop(&self, transport: &dyn Transport, session: &mut NotificationSession) -> Result<bool, NotifyError> {
        for update in transport.poll_incoming(session.cursor, POLL_TIMEOUT)? {
            if session.cursor.is_some_and(|c| update.cursor <= c) {
                continue;
            }
            session.cursor = Some(update.cursor);
            if update.chat == self.inner.chat && update.text.trim().eq_ignore_ascii_case(STOP_COMMAND) {
                session.stop_requested = true;
            }
        }
        Ok(session.stop_requested)
    }

    /// Returns false when cancelled.
    fn sleep(&self, d: Duration) -> bool {
        let clock = &self.inner.clock;
        let deadline = clock.now() + d;
        loop {
            if self.inner.cancel.load(Ordering::Acquire) {
                return false;
            }
            let now = clock.now();
            if now >= deadline {
                return true;
            }
            clock.sleep((deadline - now).min(SLICE));
        }
    }

    fn disable(&self, err: &NotifyError) {
        if !self.inner.disabled.swap(true, Ordering::AcqRel) {
            logger::warn_p("notify", &format!("{}; remote alerts disabled, using local alerts", err));
        }
    }

    /// Cancel running deliveries and wait up to `grace` for them.
    pub fn shutdown(&self, grace: Duration) {
        self.inner.cancel.store(true, Ordering::Release);
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        let deadline = Instant::now() + grace;
        for handle in workers {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                handle.join().ok();
            } else {
                logger::warn_p("notify", "notification still in flight at shutdown, abandoning it");
            }
        }
    }
}

impl SuccessSink for Notifier {
    fn notify_success(&self, kind: SuccessKind) {
        self.alert(success_text(kind), self.success_duration(kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    struct Remote {
        sent: Mutex<Vec<String>>,
        /// Scripted `poll_incoming` answers, in call order.
        polls: Mutex<Vec<Vec<Incoming>>>,
        fail_send: AtomicBool,
    }

    struct RecordingTransport(Arc<Remote>);

    impl Transport for RecordingTransport {
        fn send(&self, _chat: &str, text: &str) -> Result<(), NotifyError> {
            if self.0.fail_send.load(Ordering::Acquire) {
                return Err(NotifyError::Transport("unreachable".into()));
            }
            self.0.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn poll_incoming(&self, after: Option<i64>, _timeout: Duration) -> Result<Vec<Incoming>, NotifyError> {
            let mut polls = self.0.polls.lock().unwrap();
            let batch = if polls.is_empty() { Vec::new() } else { polls.remove(0) };
            Ok(batch.into_iter().filter(|u| after.map_or(true, |a| u.cursor > a)).collect())
        }
    }

    #[derive(Default)]
    struct Bell(Arc<Mutex<Vec<String>>>);

    impl LocalAlert for Bell {
        fn alert(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    fn stop(cursor: i64, chat: &str) -> Incoming {
        Incoming { cursor, chat: chat.into(), text: " /STOP ".into() }
    }

    fn notifier(remote: &Arc<Remote>) -> (Notifier, Arc<Mutex<Vec<String>>>) {
        let rung = Arc::new(Mutex::new(Vec::new()));
        let n = Notifier::new(
            Box::new(RecordingTransport(remote.clone())),
            "42",
            Box::new(Bell(rung.clone())),
            Arc::new(ManualClock::new()),
            Duration::from_secs(5),
            Duration::from_secs(300),
        );
        (n, rung)
    }

    #[test]
    fn zero_duration_sends_once() {
        let remote = Arc::new(Remote::default());
        let (n, _) = notifier(&remote);
        assert_eq!(n.deliver("hello", Duration::ZERO), AlertOutcome::Sent);
        assert_eq!(*remote.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn times_out_with_single_notice() {
        let remote = Arc::new(Remote::default());
        let (n, _) = notifier(&remote);
        assert_eq!(n.deliver("booked", Duration::from_secs(12)), AlertOutcome::TimedOut);
        let sent = remote.sent.lock().unwrap();
        assert_eq!(sent.first().map(String::as_str), Some("booked"));
        assert_eq!(sent.iter().filter(|m| m.starts_with("Elapsed")).count(), 3);
        assert_eq!(sent.iter().filter(|m| m.contains("maximum duration")).count(), 1);
        assert!(!sent.iter().any(|m| m.contains("/stop")));
    }

    #[test]
    fn stop_command_acknowledged_once() {
        let remote = Arc::new(Remote::default());
        *remote.polls.lock().unwrap() = vec![vec![], vec![], vec![stop(7, "42")]];
        let (n, _) = notifier(&remote);
        assert_eq!(n.deliver("booked", Duration::from_secs(300)), AlertOutcome::Acknowledged);
        let sent = remote.sent.lock().unwrap();
        assert_eq!(sent.iter().filter(|m| m.contains("/stop")).count(), 1);
        assert!(!sent.iter().any(|m| m.contains("maximum duration")));
        assert_eq!(sent.iter().filter(|m| m.starts_with("Elapsed")).count(), 2);
    }

    #[test]
    fn stale_stop_is_drained() {
        let remote = Arc::new(Remote::default());
        // The drain poll sees an old /stop, the escalation polls repeat it.
        *remote.polls.lock().unwrap() = vec![vec![stop(3, "42")], vec![stop(3, "42")], vec![stop(3, "42")]];
        let (n, _) = notifier(&remote);
        assert_eq!(n.deliver("booked", Duration::from_secs(12)), AlertOutcome::TimedOut);
    }

    #[test]
    fn stop_from_other_chat_ignored() {
        let remote = Arc::new(Remote::default());
        *remote.polls.lock().unwrap() = vec![vec![], vec![stop(9, "777")]];
        let (n, _) = notifier(&remote);
        assert_eq!(n.deliver("booked", Duration::from_secs(8)), AlertOutcome::TimedOut);
    }

    #[test]
    fn failure_disables_channel_for_good() {
        let remote = Arc::new(Remote::default());
        remote.fail_send.store(true, Ordering::Release);
        let (n, rung) = notifier(&remote);
        assert_eq!(n.deliver("first", Duration::from_secs(300)), AlertOutcome::Local);
        assert!(!n.is_remote_enabled());

        remote.fail_send.store(false, Ordering::Release);
        assert_eq!(n.deliver("second", Duration::ZERO), AlertOutcome::Local);
        assert!(remote.sent.lock().unwrap().is_empty());
        assert_eq!(*rung.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn placeholder_credentials_disable_remote() {
        let mut config = RunConfig::default();
        config.enable_telegram_notification = true;
        config.telegram_bot_token = Some(PLACEHOLDER_TOKEN.into());
        config.telegram_chat_id = Some("555".into());
        let n = Notifier::from_config(&config, Arc::new(ManualClock::new()));
        assert!(!n.is_remote_enabled());

        config.telegram_bot_token = Some("987:real".into());
        config.telegram_chat_id = Some(PLACEHOLDER_CHAT.into());
        let n = Notifier::from_config(&config, Arc::new(ManualClock::new()));
        assert!(!n.is_remote_enabled());
    }

    #[test]
    fn shutdown_cancels_escalation() {
        let remote = Arc::new(Remote::default());
        let (n, _) = notifier(&remote);
        n.shutdown(Duration::from_millis(10));
        assert_eq!(n.deliver("booked", Duration::from_secs(300)), AlertOutcome::Cancelled);
        assert_eq!(remote.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn waitlist_success_is_single_message() {
        let remote = Arc::new(Remote::default());
        let (n, _) = notifier(&remote);
        assert_eq!(n.success_duration(SuccessKind::Booking), Duration::from_secs(300));
        assert_eq!(n.success_duration(SuccessKind::Waitlist), Duration::ZERO);

        n.notify_success(SuccessKind::Waitlist);
        n.shutdown(Duration::from_secs(2));
        assert_eq!(*remote.sent.lock().unwrap(), vec![success_text(SuccessKind::Waitlist).to_string()]);

        let (n, _) = notifier(&remote);
        let n = n.with_waitlist_duration(Duration::from_secs(60));
        assert_eq!(n.success_duration(SuccessKind::Waitlist), Duration::from_secs(60));
    }

    #[test]
    fn success_texts() {
        assert!(success_text(SuccessKind::Booking).starts_with("Booking"));
        assert!(success_text(SuccessKind::Waitlist).starts_with("Waitlist"));
        assert_eq!(human_duration(Duration::from_secs(300)), "5 min");
        assert_eq!(human_duration(Duration::from_secs(45)), "45 s");
    }
}
