//! Share-link transport: URL-safe tokens, the location they live in, and the
//! debounced task that keeps the location current.

use crate::error::PersistenceError;
use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Fragment value that loads the built-in demo session.
pub const DEMO_FRAGMENT: &str = "demo";

/// Default quiet window before a scheduled save runs.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Encodes bytes as unpadded base64url.
pub fn to_token(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a share token, restoring the padding the encoder stripped.
///
/// Tokens written with the standard alphabet (`+`, `/`) are accepted too.
pub fn from_token(token: &str) -> Result<Vec<u8>> {
    let mut normalized: String = token
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    match normalized.len() % 4 {
        0 => {}
        1 => {
            return Err(PersistenceError::InvalidToken(format!(
                "token length {} is not a valid base64 length",
                normalized.len()
            )));
        }
        m => normalized.push_str(&"=".repeat(4 - m)),
    }
    URL_SAFE
        .decode(normalized.as_bytes())
        .map_err(|e| PersistenceError::InvalidToken(e.to_string()))
}

/// Returns the text after the first `#` of `url`, or `""` when there is none.
pub fn fragment_of(url: &str) -> &str {
    url.split_once('#').map_or("", |(_, fragment)| fragment)
}

/// Strips any fragment from `url`.
pub fn without_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

/// Where the current share token is published.
pub trait FragmentLocation: Send + Sync {
    fn read_fragment(&self) -> String;

    /// Replaces the fragment in place, without adding a history entry.
    fn replace_fragment(&self, token: &str);

    /// Fragments the user navigates to. Writes made through
    /// [`replace_fragment`](Self::replace_fragment) are not reported.
    /// `None` when the location cannot report navigation.
    fn watch_navigation(&self) -> Option<watch::Receiver<String>> {
        None
    }
}

/// An in-memory address bar.
#[derive(Debug)]
pub struct MemoryLocation {
    url: Mutex<String>,
    writes: AtomicUsize,
    navigations: watch::Sender<String>,
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new("")
    }
}

impl MemoryLocation {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let (navigations, _) = watch::channel(fragment_of(&url).to_owned());
        Self {
            url: Mutex::new(url),
            writes: AtomicUsize::new(0),
            navigations,
        }
    }

    /// Moves to `url` the way following a link would, notifying watchers.
    pub fn navigate(&self, url: &str) {
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = url.to_owned();
        self.navigations.send_replace(fragment_of(url).to_owned());
    }

    pub fn url(&self) -> String {
        self.url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of times the fragment has been replaced.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl FragmentLocation for MemoryLocation {
    fn read_fragment(&self) -> String {
        fragment_of(&self.url()).to_owned()
    }

    fn replace_fragment(&self, token: &str) {
        let mut url = self.url.lock().unwrap_or_else(PoisonError::into_inner);
        let base = without_fragment(&url).to_owned();
        *url = if token.is_empty() {
            base
        } else {
            format!("{base}#{token}")
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn watch_navigation(&self) -> Option<watch::Receiver<String>> {
        Some(self.navigations.subscribe())
    }
}

/// Runs a save after a quiet window with no further [`schedule`] calls.
///
/// Every schedule restarts the window. A schedule that arrives while a save
/// is running produces exactly one follow-up save.
///
/// [`schedule`]: DebouncedSaver::schedule
pub struct DebouncedSaver {
    wake: Arc<Notify>,
    flush_now: Arc<Notify>,
    pending: Arc<AtomicBool>,
    saving: Arc<AtomicBool>,
    completed: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl DebouncedSaver {
    /// Spawns the saver task on the current runtime.
    pub fn spawn<F, Fut>(quiet: Duration, save: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wake = Arc::new(Notify::new());
        let flush_now = Arc::new(Notify::new());
        let pending = Arc::new(AtomicBool::new(false));
        let saving = Arc::new(AtomicBool::new(false));
        let (completed_tx, completed) = watch::channel(0u64);

        let task = tokio::spawn({
            let wake = wake.clone();
            let flush_now = flush_now.clone();
            let pending = pending.clone();
            let saving = saving.clone();
            async move {
                loop {
                    wake.notified().await;
                    loop {
                        tokio::select! {
                            () = tokio::time::sleep(quiet) => break,
                            () = flush_now.notified() => break,
                            () = wake.notified() => {}
                        }
                    }
                    saving.store(true, Ordering::SeqCst);
                    pending.store(false, Ordering::SeqCst);
                    debug!("running debounced save");
                    save().await;
                    saving.store(false, Ordering::SeqCst);
                    completed_tx.send_modify(|count| *count += 1);
                }
            }
        });

        Self {
            wake,
            flush_now,
            pending,
            saving,
            completed,
            task,
        }
    }

    pub fn schedule(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// True while a save is running.
    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    /// True while a save is scheduled but has not started.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of saves that have completed.
    pub fn completed_saves(&self) -> u64 {
        *self.completed.borrow()
    }

    /// Cuts any pending quiet window short and waits until no save is
    /// pending or running.
    pub async fn flush(&self) {
        let mut completed = self.completed.clone();
        completed.borrow_and_update();
        while self.is_pending() || self.is_saving() {
            self.flush_now.notify_waiters();
            if completed.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stops the saver; pending saves are dropped.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for DebouncedSaver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_token_is_url_safe_and_unpadded() {
        let token = to_token(&[0xfb, 0xff, 0xfe, 0x01]);
        assert_eq!(token, "-__-AQ");
        assert_eq!(from_token(&token).unwrap(), vec![0xfb, 0xff, 0xfe, 0x01]);
    }

    #[test]
    fn test_standard_alphabet_and_padding_accepted() {
        assert_eq!(from_token("+//+AQ==").unwrap(), vec![0xfb, 0xff, 0xfe, 0x01]);
        assert_eq!(from_token("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_bad_tokens_rejected() {
        assert!(matches!(
            from_token("abcde"),
            Err(PersistenceError::InvalidToken(_))
        ));
        assert!(matches!(
            from_token("ab$d"),
            Err(PersistenceError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_fragment_of() {
        assert_eq!(fragment_of("https://ic10emu.dev/#abc"), "abc");
        assert_eq!(fragment_of("https://ic10emu.dev/"), "");
        assert_eq!(fragment_of("#demo"), "demo");
        assert_eq!(without_fragment("https://ic10emu.dev/#abc"), "https://ic10emu.dev/");
    }

    #[test]
    fn test_memory_location_replaces_in_place() {
        let location = MemoryLocation::new("https://ic10emu.dev/#old");
        location.replace_fragment("new");
        assert_eq!(location.url(), "https://ic10emu.dev/#new");
        assert_eq!(location.read_fragment(), "new");
        location.replace_fragment("");
        assert_eq!(location.url(), "https://ic10emu.dev/");
        assert_eq!(location.write_count(), 2);
    }

    #[tokio::test]
    async fn test_navigation_is_watched_but_replacement_is_not() {
        let location = MemoryLocation::new("https://ic10emu.dev/");
        let mut navigations = location.watch_navigation().unwrap();

        location.replace_fragment("abc");
        assert!(!navigations.has_changed().unwrap());

        location.navigate("https://ic10emu.dev/#demo");
        navigations.changed().await.unwrap();
        assert_eq!(*navigations.borrow_and_update(), "demo");
        assert_eq!(location.read_fragment(), "demo");
        assert_eq!(location.write_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_token_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
            let token = to_token(&bytes);
            prop_assert!(!token.contains('='));
            prop_assert_eq!(from_token(&token).unwrap(), bytes);
        }
    }

    fn counting_saver(quiet: Duration) -> (DebouncedSaver, Arc<AtomicUsize>) {
        let saves = Arc::new(AtomicUsize::new(0));
        let saver = DebouncedSaver::spawn(quiet, {
            let saves = saves.clone();
            move || {
                let saves = saves.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    saves.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        (saver, saves)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_save() {
        let (saver, saves) = counting_saver(DEFAULT_DEBOUNCE);

        for _ in 0..5 {
            saver.schedule();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert_eq!(saves.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert_eq!(saver.completed_saves(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_during_save_runs_one_follow_up() {
        let (saver, saves) = counting_saver(Duration::from_millis(100));

        saver.schedule();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(saver.is_saving());
        saver.schedule();
        saver.schedule();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(saves.load(Ordering::SeqCst), 2);
        assert!(!saver.is_saving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_pending_save() {
        let (saver, saves) = counting_saver(Duration::from_secs(60));

        saver.schedule();
        tokio::task::yield_now().await;
        saver.flush().await;
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(!saver.is_pending());

        // nothing pending, returns straight away
        saver.flush().await;
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }
}
