//! Tunnel session lifecycle
//!
//! `Bridge` is the control surface the managed host drives: `start` launches
//! the engine's blocking entry point on a detached session thread, `stop`
//! signals it to return. One session at a time; the engine module is loaded
//! lazily on first use and kept for the process lifetime.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::finalize_config;
use crate::engine::{HevEngine, TunnelEngine};
use crate::error::Result;

type EngineLoader = dyn Fn() -> Result<Arc<dyn TunnelEngine>> + Send + Sync;

struct Shared {
    /// Engine slot. The mutex doubles as the one-time-load guard: a caller
    /// racing the first load waits here instead of loading the module twice.
    engine: Mutex<Option<Arc<dyn TunnelEngine>>>,
    loader: Box<EngineLoader>,
    /// True exactly while a session's blocking run call is in flight.
    running: AtomicBool,
}

impl Shared {
    /// Return the cached engine, loading it on first use.
    ///
    /// A failed load leaves the slot empty so a later call retries.
    fn engine(&self) -> Result<Arc<dyn TunnelEngine>> {
        let mut slot = self.engine.lock().unwrap();
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }
        match (self.loader)() {
            Ok(engine) => {
                *slot = Some(Arc::clone(&engine));
                Ok(engine)
            }
            Err(err) => {
                log::error!("failed to load tunnel engine: {err}");
                Err(err)
            }
        }
    }

    /// Session body, run on the detached session thread.
    ///
    /// Owns both transitions of the running flag: true on entry, false when
    /// the engine's run call returns. The engine's exit status is logged and
    /// otherwise discarded; by the time it is known, the `start` call that
    /// launched the session has long returned.
    fn run_session(&self, config: &CString) {
        self.running.store(true, Ordering::SeqCst);
        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };
        let rc = engine.run(config);
        log::info!("hev-socks5-tunnel exited rc={rc}");
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Control surface for the tunnel engine lifecycle.
///
/// Cheap to clone; clones share the engine slot and the running flag. The
/// FFI layer keeps one process-wide instance, but nothing here requires
/// that: embedders may own a `Bridge` directly and inject a fake engine
/// through [`Bridge::with_engine_loader`].
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    /// Create a bridge backed by the real hev-socks5-tunnel module.
    pub fn new() -> Self {
        Self::with_engine_loader(|| {
            HevEngine::load().map(|engine| Arc::new(engine) as Arc<dyn TunnelEngine>)
        })
    }

    /// Create a bridge with a custom engine loader.
    ///
    /// The loader runs at most once per successful load, under the engine
    /// lock, on whichever thread first needs the engine.
    pub fn with_engine_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn TunnelEngine>> + Send + Sync + 'static,
    {
        Bridge {
            shared: Arc::new(Shared {
                engine: Mutex::new(None),
                loader: Box::new(loader),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Whether a session's blocking run call is currently in flight.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start a tunnel session.
    ///
    /// Finalizes the configuration text (injecting `tunfd: <tun_fd>` unless
    /// the caller already supplied the key), then launches the session on a
    /// detached thread and returns without waiting for the engine to come
    /// up. Calling `start` while a session is running is a successful no-op.
    ///
    /// # Errors
    /// Fails if the engine module cannot be loaded, if the configuration
    /// text contains an interior NUL byte, or if the session thread cannot
    /// be spawned.
    pub fn start(&self, config: &str, tun_fd: i32) -> Result<()> {
        // This check and the flag set inside the session thread are not
        // atomic as a pair: two concurrent start() calls can both pass it
        // and launch two sessions. Accepted for the single-caller usage the
        // bridge serves; see DESIGN.md.
        if self.is_running() {
            return Ok(());
        }
        self.shared.engine()?;
        let config = CString::new(finalize_config(config, tun_fd))?;
        self.spawn_session(config)?;
        Ok(())
    }

    /// Ask the engine to end the in-flight session.
    ///
    /// Best-effort and asynchronous: the quit entry point is expected to
    /// make the blocked run call return, which clears the running flag from
    /// the session thread. `stop` neither touches the flag nor waits. A
    /// `stop` with no session in flight, or with an engine that never
    /// loaded, is a no-op.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        let engine = match self.shared.engine() {
            Ok(engine) => engine,
            Err(_) => return,
        };
        engine.quit();
    }

    /// Spawn the detached session thread.
    ///
    /// `start` drops the returned handle; tests keep it to await session
    /// completion deterministically.
    pub(crate) fn spawn_session(&self, config: CString) -> Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let session = thread::Builder::new()
            .name("hev-tunnel".to_string())
            .spawn(move || shared.run_session(&config))?;
        Ok(session)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::ffi::CStr;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;
    use std::time::Duration;

    type RunningProbe = Box<dyn Fn() -> bool + Send + Sync>;

    /// Scriptable stand-in for the native engine. When `blocking`, `run`
    /// parks until `quit` like the real entry point does.
    struct FakeEngine {
        configs: Mutex<Vec<String>>,
        quit_calls: AtomicUsize,
        exit_status: i32,
        blocking: bool,
        quit_requested: Mutex<bool>,
        quit_signal: Condvar,
        probe: Mutex<Option<RunningProbe>>,
        flag_seen_at_run: Mutex<Option<bool>>,
    }

    impl FakeEngine {
        fn new(exit_status: i32, blocking: bool) -> Arc<Self> {
            Arc::new(FakeEngine {
                configs: Mutex::new(Vec::new()),
                quit_calls: AtomicUsize::new(0),
                exit_status,
                blocking,
                quit_requested: Mutex::new(false),
                quit_signal: Condvar::new(),
                probe: Mutex::new(None),
                flag_seen_at_run: Mutex::new(None),
            })
        }

        fn run_count(&self) -> usize {
            self.configs.lock().unwrap().len()
        }

        fn quit_count(&self) -> usize {
            self.quit_calls.load(Ordering::SeqCst)
        }

        fn config_passed(&self, index: usize) -> String {
            self.configs.lock().unwrap()[index].clone()
        }

        fn set_probe(&self, probe: RunningProbe) {
            *self.probe.lock().unwrap() = Some(probe);
        }

        fn flag_seen_at_run(&self) -> Option<bool> {
            *self.flag_seen_at_run.lock().unwrap()
        }
    }

    impl TunnelEngine for FakeEngine {
        fn run(&self, config: &CStr) -> i32 {
            if let Some(probe) = self.probe.lock().unwrap().as_ref() {
                *self.flag_seen_at_run.lock().unwrap() = Some(probe());
            }
            self.configs
                .lock()
                .unwrap()
                .push(config.to_str().unwrap().to_string());
            if self.blocking {
                let mut quit = self.quit_requested.lock().unwrap();
                while !*quit {
                    let (guard, timeout) = self
                        .quit_signal
                        .wait_timeout(quit, Duration::from_secs(5))
                        .unwrap();
                    quit = guard;
                    if timeout.timed_out() {
                        panic!("fake engine was never asked to quit");
                    }
                }
                // Rearm so a later session blocks again.
                *quit = false;
            }
            self.exit_status
        }

        fn quit(&self) {
            self.quit_calls.fetch_add(1, Ordering::SeqCst);
            let mut quit = self.quit_requested.lock().unwrap();
            *quit = true;
            self.quit_signal.notify_all();
        }
    }

    fn bridge_with(engine: &Arc<FakeEngine>) -> Bridge {
        let engine = Arc::clone(engine);
        Bridge::with_engine_loader(move || Ok(Arc::clone(&engine) as Arc<dyn TunnelEngine>))
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        for _ in 0..1000 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let engine = FakeEngine::new(0, true);
        let bridge = bridge_with(&engine);

        bridge.start("mode: client", 5).unwrap();
        assert!(wait_for(|| bridge.is_running() && engine.run_count() == 1));

        for _ in 0..3 {
            bridge.start("mode: client", 5).unwrap();
        }
        assert_eq!(engine.run_count(), 1);

        bridge.stop();
        assert!(wait_for(|| !bridge.is_running()));
    }

    #[test]
    fn test_stop_without_session_is_noop() {
        let engine = FakeEngine::new(0, false);
        let bridge = bridge_with(&engine);

        bridge.stop();
        assert_eq!(engine.quit_count(), 0);
        assert_eq!(engine.run_count(), 0);
    }

    #[test]
    fn test_session_receives_injected_tunfd() {
        let engine = FakeEngine::new(0, false);
        let bridge = bridge_with(&engine);

        bridge.start("foo: bar", 42).unwrap();
        assert!(wait_for(|| engine.run_count() == 1 && !bridge.is_running()));
        assert_eq!(engine.config_passed(0), "foo: bar\ntunfd: 42\n");
    }

    #[test]
    fn test_session_keeps_caller_supplied_tunfd() {
        let engine = FakeEngine::new(0, false);
        let bridge = bridge_with(&engine);

        let config = "mode: client\ntunfd: 7\n";
        bridge.start(config, 42).unwrap();
        assert!(wait_for(|| engine.run_count() == 1 && !bridge.is_running()));
        assert_eq!(engine.config_passed(0), config);
    }

    #[test]
    fn test_flag_lifecycle_across_exit_statuses() {
        for exit_status in [0, 23] {
            let engine = FakeEngine::new(exit_status, false);
            let bridge = bridge_with(&engine);
            let observer = bridge.clone();
            engine.set_probe(Box::new(move || observer.is_running()));

            let config = CString::new(finalize_config("mode: client", 9)).unwrap();
            let session = bridge.spawn_session(config).unwrap();
            session.join().unwrap();

            assert_eq!(engine.flag_seen_at_run(), Some(true));
            assert_eq!(engine.run_count(), 1);
            assert!(!bridge.is_running());
        }
    }

    #[test]
    fn test_start_fails_when_engine_cannot_load() {
        let bridge = Bridge::with_engine_loader(|| {
            Err(BridgeError::EngineLoad("module not found".to_string()))
        });

        assert!(bridge.start("mode: client", 5).is_err());
        assert!(!bridge.is_running());
        // stop must not reach a quit entry point that never resolved.
        bridge.stop();
    }

    #[test]
    fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let engine = FakeEngine::new(0, false);
        let loader_engine = Arc::clone(&engine);
        let loader_attempts = Arc::clone(&attempts);
        let bridge = Bridge::with_engine_loader(move || {
            if loader_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BridgeError::EngineLoad("transient".to_string()))
            } else {
                Ok(Arc::clone(&loader_engine) as Arc<dyn TunnelEngine>)
            }
        });

        assert!(bridge.start("mode: client", 5).is_err());
        bridge.start("mode: client", 5).unwrap();
        assert!(wait_for(|| engine.run_count() == 1 && !bridge.is_running()));
    }

    #[test]
    fn test_engine_is_loaded_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let engine = FakeEngine::new(0, false);
        let loader_engine = Arc::clone(&engine);
        let loader_attempts = Arc::clone(&attempts);
        let bridge = Bridge::with_engine_loader(move || {
            loader_attempts.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&loader_engine) as Arc<dyn TunnelEngine>)
        });

        bridge.start("mode: client", 5).unwrap();
        assert!(wait_for(|| engine.run_count() == 1 && !bridge.is_running()));
        bridge.start("mode: client", 5).unwrap();
        assert!(wait_for(|| engine.run_count() == 2 && !bridge.is_running()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_end_to_end_session_lifecycle() {
        let engine = FakeEngine::new(0, true);
        let bridge = bridge_with(&engine);

        bridge.start("mode: client", 5).unwrap();
        assert!(wait_for(|| bridge.is_running() && engine.run_count() == 1));
        assert_eq!(engine.config_passed(0), "mode: client\ntunfd: 5\n");

        bridge.stop();
        assert_eq!(engine.quit_count(), 1);
        assert!(wait_for(|| !bridge.is_running()));

        // A fresh session is accepted once the flag has cleared.
        bridge.start("mode: client", 5).unwrap();
        assert!(wait_for(|| engine.run_count() == 2));
        bridge.stop();
        assert!(wait_for(|| !bridge.is_running()));
    }
}
