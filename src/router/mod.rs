pub mod memory;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::backend::BackendLoader;
use crate::config::Catalog;
use crate::error::RouterError;
use crate::intent::{detect_intent, Intent};
use crate::protocol::{ActionExecutor, Response};
use crate::session::{CancelToken, ModelSession};
use crate::tokenizer::Tokenizer;

use self::memory::UsageTracker;

/// A failed lazy load is not retried before this much time has passed;
/// dispatches in the window fail fast instead of hammering the loader.
const RETRY_COOLDOWN: Duration = Duration::from_secs(30);

/// Shared handle to one pooled session. `None` inside means an eviction won
/// the race after the handle was cloned out of the pool; dispatchers treat
/// that as "unloaded" and go back through [`Router::ensure_loaded`].
pub type SessionHandle = Arc<Mutex<Option<ModelSession>>>;

enum SlotState {
    Unloaded,
    Loading,
    Loaded(SessionHandle),
    Failed { at: Instant },
}

/// Per-model-name slot. Construction and teardown of a name are serialized
/// through its own mutex so a slow load never blocks unrelated models.
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Unloaded),
            ready: Condvar::new(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RouterStats {
    pub loaded: Vec<String>,
    pub idle: Vec<(String, Duration)>,
}

/// Owns the model pool and turns transcripts into responses. No globals:
/// callers share a `Router` by `Arc`.
pub struct Router {
    pool: RwLock<HashMap<String, Arc<Slot>>>,
    catalog: Catalog,
    loader: Box<dyn BackendLoader>,
    executor: Box<dyn ActionExecutor>,
    usage: UsageTracker,
}

impl Router {
    pub fn new(
        catalog: Catalog,
        loader: Box<dyn BackendLoader>,
        executor: Box<dyn ActionExecutor>,
    ) -> Self {
        let pool = catalog
            .models
            .keys()
            .map(|name| (name.clone(), Slot::new()))
            .collect();
        let usage = UsageTracker::new(catalog.persistent.clone(), catalog.ttl);
        Self {
            // The map's shape is fixed after construction; the RwLock keeps
            // concurrent slot lookups cheap while sessions load and unload
            // inside the slots.
            pool: RwLock::new(pool),
            catalog,
            loader,
            executor,
            usage,
        }
    }

    /// Single public entry point: classify, dispatch, generate.
    ///
    /// Dispatch failures come back as a `Response` with `success == false`;
    /// generation failures (`Inference`, `Cancelled`) propagate as errors.
    pub fn process(&self, transcript: &str) -> Result<Response, RouterError> {
        self.process_with_cancel(transcript, &CancelToken::new())
    }

    pub fn process_with_cancel(
        &self,
        transcript: &str,
        cancel: &CancelToken,
    ) -> Result<Response, RouterError> {
        let intent = detect_intent(transcript);
        let name = intent.model_name();
        debug!(?intent, model = name, "dispatching transcript");

        // An eviction can win the race between handle acquisition and the
        // session lock; one reload attempt covers that window.
        for _ in 0..2 {
            let handle = match self.load_slot(name, false) {
                Ok(handle) => handle,
                Err(RouterError::Unavailable(reason)) => {
                    warn!(model = name, reason = %reason, "dispatch failed");
                    return Ok(Response::failure(unavailable_text(name)));
                }
                Err(e) => return Err(e),
            };

            // Second and later requests against a busy session queue here
            // until the in-flight generation finishes.
            let mut guard = handle.lock().expect("session mutex poisoned");
            let Some(session) = guard.as_mut() else {
                continue;
            };

            self.usage.touch(name);
            return match intent {
                Intent::Action => {
                    let action = session.generate_action(transcript, cancel)?;
                    drop(guard);
                    let (text, success) = self.executor.execute(&action);
                    Ok(Response {
                        text,
                        action: Some(action),
                        success,
                    })
                }
                _ => {
                    let text = session.generate(transcript, cancel)?;
                    Ok(Response {
                        text,
                        action: None,
                        success: true,
                    })
                }
            };
        }

        Ok(Response::failure(unavailable_text(name)))
    }

    /// Lazy load of one model. A construction failure is logged and
    /// swallowed here; the caller only learns `Unavailable`.
    pub fn ensure_loaded(&self, name: &str) -> Result<(), RouterError> {
        self.load_slot(name, false).map(|_| ())
    }

    /// Eager startup path: constructs every configured session in parallel
    /// and fails with every model's error aggregated if any load failed. A
    /// partial pool at startup is considered unsafe to run with.
    pub fn load_all(&self) -> Result<(), RouterError> {
        let mut names: Vec<&str> = self.catalog.models.keys().map(String::as_str).collect();
        names.sort_unstable();

        let mut failures: Vec<String> = Vec::new();
        thread::scope(|scope| {
            let workers: Vec<_> = names
                .iter()
                .map(|&name| scope.spawn(move || (name, self.load_slot(name, true))))
                .collect();
            for worker in workers {
                let (name, result) = worker.join().expect("loader thread panicked");
                if let Err(e) = result {
                    failures.push(format!("{}: {}", name, e));
                }
            }
        });

        if failures.is_empty() {
            info!(models = names.len(), "eager load complete");
            Ok(())
        } else {
            Err(RouterError::Config(format!(
                "eager load failed for {} model(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    pub fn set_persistent(&self, name: &str, persistent: bool) {
        self.usage.set_persistent(name, persistent);
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.usage.set_ttl(ttl);
    }

    pub fn stats(&self) -> RouterStats {
        let pool = self.pool.read().expect("pool lock poisoned");
        let mut loaded: Vec<String> = pool
            .iter()
            .filter(|(_, slot)| {
                matches!(
                    &*slot.state.lock().expect("slot mutex poisoned"),
                    SlotState::Loaded(_)
                )
            })
            .map(|(name, _)| name.clone())
            .collect();
        loaded.sort_unstable();
        RouterStats {
            loaded,
            idle: self.usage.idle_snapshot(),
        }
    }

    fn slot(&self, name: &str) -> Result<Arc<Slot>, RouterError> {
        self.pool
            .read()
            .expect("pool lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::Unavailable(format!("unknown model '{}'", name)))
    }

    /// The per-name state machine behind both load paths. Exactly one
    /// caller transitions a name to `Loading`; everyone else either reuses
    /// the published handle or waits on the condvar for the in-progress
    /// construction instead of racing past it.
    fn load_slot(&self, name: &str, eager: bool) -> Result<SessionHandle, RouterError> {
        let slot = self.slot(name)?;

        let mut state = slot.state.lock().expect("slot mutex poisoned");
        loop {
            match &*state {
                SlotState::Loaded(handle) => return Ok(handle.clone()),
                SlotState::Loading => {
                    state = slot.ready.wait(state).expect("slot mutex poisoned");
                }
                SlotState::Failed { at } if !eager && at.elapsed() < RETRY_COOLDOWN => {
                    return Err(RouterError::Unavailable(format!(
                        "model '{}' failed to load recently, still cooling down",
                        name
                    )));
                }
                SlotState::Unloaded | SlotState::Failed { .. } => break,
            }
        }
        *state = SlotState::Loading;
        drop(state);

        // Construction runs unlocked: it can be slow and must not block
        // dispatches to other models, or waiters' condvar re-checks.
        let built = self.construct(name);

        let mut state = slot.state.lock().expect("slot mutex poisoned");
        let result = match built {
            Ok(session) => {
                info!(model = name, "model session loaded");
                let handle: SessionHandle = Arc::new(Mutex::new(Some(session)));
                *state = SlotState::Loaded(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                *state = SlotState::Failed { at: Instant::now() };
                if eager {
                    Err(e)
                } else {
                    // Degraded mode, on purpose: the system keeps running
                    // with fewer capabilities and the triggering caller is
                    // told only that the model is unavailable.
                    error!(model = name, error = %e, "lazy model load failed");
                    Err(RouterError::Unavailable(format!(
                        "model '{}' is not available",
                        name
                    )))
                }
            }
        };
        drop(state);
        slot.ready.notify_all();
        result
    }

    fn construct(&self, name: &str) -> Result<ModelSession, RouterError> {
        let config = self
            .catalog
            .model(name)
            .ok_or_else(|| RouterError::Config(format!("model '{}' is not in the catalog", name)))?;
        let backend = self
            .loader
            .load(name, config)
            .map_err(|e| RouterError::Config(format!("model '{}': {}", name, e)))?;
        let tokenizer = Tokenizer::from_vocab_file(config.tokenizer_path.as_deref());
        Ok(ModelSession::new(name, backend, tokenizer, config))
    }

    /// Tears one idle session down. Holding the slot lock blocks new
    /// dispatches to this name for the duration; taking the session lock
    /// waits out any in-flight generation (an active generation is never
    /// killed). With both locks held no dispatch can stamp a new touch, so
    /// the staleness re-check here is race-free: a model used after the
    /// sweep's snapshot keeps its session and its fresh timestamp.
    fn evict_stale(&self, name: &str) -> bool {
        let Ok(slot) = self.slot(name) else {
            return false;
        };
        let mut state = slot.state.lock().expect("slot mutex poisoned");
        let handle = match &*state {
            SlotState::Loaded(handle) => handle.clone(),
            _ => {
                // Usage entry without a loaded session, drop the stray.
                self.usage.forget(name);
                return false;
            }
        };

        let mut guard = handle.lock().expect("session mutex poisoned");
        if !self.usage.is_stale(name) {
            return false;
        }

        let session = guard.take();
        drop(session); // backend memory is released here
        drop(guard);
        *state = SlotState::Unloaded;
        drop(state);
        slot.ready.notify_all();
        self.usage.forget(name);
        true
    }

    /// One eviction pass over the usage table.
    pub(crate) fn sweep(&self) {
        for name in self.usage.stale() {
            if self.evict_stale(&name) {
                info!(model = %name, "evicted idle model session");
            }
        }
    }
}

fn unavailable_text(name: &str) -> String {
    format!("desculpe, o modelo '{}' nao esta disponivel agora.", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::backend::InferenceBackend;
    use crate::config::ModelConfig;
    use crate::protocol::ActionDescriptor;
    use crate::sampler::SamplingParams;
    use crate::session::testing::ScriptedBackend;
    use crate::tokenizer::EOS_ID;

    const ACTION_PAYLOAD: &str = r#"{"action":"open_app","params":{"app":"chrome"}}"#;

    fn mk_temp_dir(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time ok")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), ts))
    }

    /// Writes the shared test vocabulary and returns its path.
    fn write_vocab(dir: &PathBuf) -> PathBuf {
        fs::create_dir_all(dir).expect("create temp dir");
        let vocab: HashMap<String, u32> = HashMap::from([
            ("tudo".to_string(), 10),
            ("bem".to_string(), 11),
            (ACTION_PAYLOAD.to_string(), 12),
        ]);
        let path = dir.join("vocab.json");
        fs::write(&path, serde_json::to_vec(&vocab).expect("serialize vocab"))
            .expect("write vocab");
        path
    }

    struct StubLoader {
        loads: Arc<AtomicUsize>,
        load_delay: Duration,
        step_delay: Duration,
        script: Vec<u32>,
    }

    impl StubLoader {
        fn new(script: Vec<u32>) -> (Self, Arc<AtomicUsize>) {
            let loads = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    loads: Arc::clone(&loads),
                    load_delay: Duration::ZERO,
                    step_delay: Duration::ZERO,
                    script,
                },
                loads,
            )
        }
    }

    impl BackendLoader for StubLoader {
        fn load(
            &self,
            _name: &str,
            config: &ModelConfig,
        ) -> anyhow::Result<Box<dyn InferenceBackend>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if !self.load_delay.is_zero() {
                thread::sleep(self.load_delay);
            }
            if config.weights_path.to_string_lossy().contains("missing") {
                anyhow::bail!("weights file not found");
            }
            let mut backend = ScriptedBackend::new(self.script.clone(), 64);
            backend.step_delay = self.step_delay;
            Ok(Box::new(backend))
        }
    }

    struct RecordingExecutor {
        calls: Arc<Mutex<Vec<ActionDescriptor>>>,
    }

    impl RecordingExecutor {
        fn new() -> (Self, Arc<Mutex<Vec<ActionDescriptor>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl ActionExecutor for RecordingExecutor {
        fn execute(&self, action: &ActionDescriptor) -> (String, bool) {
            self.calls.lock().expect("calls mutex").push(action.clone());
            (format!("feito: {}", action.action), true)
        }
    }

    fn test_catalog(dir: &PathBuf, missing: &[&str]) -> Catalog {
        let vocab_path = write_vocab(dir);
        let mut models = HashMap::new();
        for name in ["phi", "llama", "qwen", "vision", "coder"] {
            let file = if missing.contains(&name) {
                format!("{}-missing.gguf", name)
            } else {
                format!("{}.gguf", name)
            };
            models.insert(
                name.to_string(),
                ModelConfig {
                    weights_path: dir.join(file),
                    tokenizer_path: Some(vocab_path.clone()),
                    system_prompt: String::new(),
                    sampling: SamplingParams::greedy(),
                    max_tokens: 8,
                },
            );
        }
        Catalog {
            models,
            persistent: HashSet::new(),
            ttl: Duration::from_secs(300),
            tick: Duration::from_secs(30),
        }
    }

    fn build_router(
        dir: &PathBuf,
        missing: &[&str],
        script: Vec<u32>,
    ) -> (Arc<Router>, Arc<AtomicUsize>, Arc<Mutex<Vec<ActionDescriptor>>>) {
        let (loader, loads) = StubLoader::new(script);
        let (executor, calls) = RecordingExecutor::new();
        let router = Router::new(
            test_catalog(dir, missing),
            Box::new(loader),
            Box::new(executor),
        );
        (Arc::new(router), loads, calls)
    }

    #[test]
    fn concurrent_ensure_loaded_constructs_exactly_once() {
        let dir = mk_temp_dir("vox_router_once");
        let (loader, loads) = StubLoader::new(vec![10, EOS_ID]);
        let loader = StubLoader {
            load_delay: Duration::from_millis(40),
            ..loader
        };
        let (executor, _) = RecordingExecutor::new();
        let router = Arc::new(Router::new(
            test_catalog(&dir, &[]),
            Box::new(loader),
            Box::new(executor),
        ));

        let (tx, rx) = mpsc::channel();
        for _ in 0..8 {
            let router = Arc::clone(&router);
            let tx = tx.clone();
            thread::spawn(move || {
                tx.send(router.ensure_loaded("phi").is_ok()).expect("send");
            });
        }
        for _ in 0..8 {
            assert!(rx.recv_timeout(Duration::from_secs(5)).expect("join"));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(router.stats().loaded, vec!["phi".to_string()]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn distinct_cold_models_load_in_parallel() {
        let dir = mk_temp_dir("vox_router_parallel");
        let (loader, _) = StubLoader::new(vec![10, EOS_ID]);
        let loader = StubLoader {
            load_delay: Duration::from_millis(150),
            ..loader
        };
        let (executor, _) = RecordingExecutor::new();
        let router = Arc::new(Router::new(
            test_catalog(&dir, &[]),
            Box::new(loader),
            Box::new(executor),
        ));

        let started = Instant::now();
        let vision = {
            let router = Arc::clone(&router);
            thread::spawn(move || router.process("vendo a tela").expect("vision"))
        };
        let code = {
            let router = Arc::clone(&router);
            thread::spawn(move || router.process("explica esse código").expect("code"))
        };
        assert!(vision.join().expect("vision thread").success);
        assert!(code.join().expect("code thread").success);

        // Serial loading would need at least 300ms.
        assert!(
            started.elapsed() < Duration::from_millis(280),
            "cold loads serialized: {:?}",
            started.elapsed()
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn failed_lazy_load_degrades_and_backs_off() {
        let dir = mk_temp_dir("vox_router_degraded");
        let (router, loads, _) = build_router(&dir, &["phi"], vec![10, EOS_ID]);

        let response = router.process("oi, tudo certo?").expect("degraded response");
        assert!(!response.success);
        assert!(response.text.contains("phi"));
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        // Within the cooldown the loader must not be hit again.
        let response = router.process("oi de novo").expect("still degraded");
        assert!(!response.success);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(matches!(
            router.ensure_loaded("phi"),
            Err(RouterError::Unavailable(_))
        ));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn eager_load_all_aggregates_every_failure() {
        let dir = mk_temp_dir("vox_router_eager_fail");
        let (router, _, _) = build_router(&dir, &["qwen", "vision"], vec![10, EOS_ID]);

        let err = router.load_all().expect_err("startup must fail");
        match err {
            RouterError::Config(msg) => {
                assert!(msg.contains("qwen"));
                assert!(msg.contains("vision"));
                assert!(msg.contains("2 model(s)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn eager_load_all_loads_the_full_pool() {
        let dir = mk_temp_dir("vox_router_eager_ok");
        let (router, loads, _) = build_router(&dir, &[], vec![10, EOS_ID]);

        router.load_all().expect("eager load");
        assert_eq!(loads.load(Ordering::SeqCst), 5);
        assert_eq!(router.stats().loaded.len(), 5);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn end_to_end_action_flow() {
        let dir = mk_temp_dir("vox_router_action");
        let (router, _, calls) = build_router(&dir, &[], vec![12, EOS_ID]);

        let response = router.process("abre o chrome").expect("action flow");
        assert!(response.success);
        assert!(!response.text.is_empty());

        let action = response.action.expect("structured action");
        assert_eq!(action.action, "open_app");
        assert_eq!(
            action.params.get("app").and_then(serde_json::Value::as_str),
            Some("chrome")
        );

        let calls = calls.lock().expect("calls mutex");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], action);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn simple_dispatch_generates_text() {
        let dir = mk_temp_dir("vox_router_simple");
        let (router, _, calls) = build_router(&dir, &[], vec![10, 11, EOS_ID]);

        let response = router.process("oi, como vai?").expect("simple flow");
        assert!(response.success);
        assert_eq!(response.text, "tudo bem");
        assert!(response.action.is_none());
        assert!(calls.lock().expect("calls mutex").is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn busy_session_queues_second_request() {
        let dir = mk_temp_dir("vox_router_queue");
        // The script spans both generations: the backend keeps emitting
        // id 10 so each call runs its full 8-token budget.
        let (loader, loads) = StubLoader::new(vec![10; 32]);
        let loader = StubLoader {
            step_delay: Duration::from_millis(20),
            ..loader
        };
        let (executor, _) = RecordingExecutor::new();
        let router = Arc::new(Router::new(
            test_catalog(&dir, &[]),
            Box::new(loader),
            Box::new(executor),
        ));

        let started = Instant::now();
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let router = Arc::clone(&router);
                thread::spawn(move || router.process("oi").expect("queued request"))
            })
            .collect();
        for worker in workers {
            assert!(worker.join().expect("worker thread").success);
        }

        // One session, two full 8-token generations back to back (about
        // 160ms each): the second call queued instead of being rejected
        // or run in parallel.
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(
            started.elapsed() >= Duration::from_millis(300),
            "requests overlapped: {:?}",
            started.elapsed()
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn sweep_evicts_idle_models_and_reload_works() {
        let dir = mk_temp_dir("vox_router_evict");
        let (router, loads, _) = build_router(&dir, &[], vec![10, EOS_ID]);
        router.set_ttl(Duration::ZERO);

        assert!(router.process("oi").expect("first dispatch").success);
        assert_eq!(router.stats().loaded, vec!["phi".to_string()]);

        router.sweep();
        assert!(router.stats().loaded.is_empty());
        assert!(router.stats().idle.is_empty());

        assert!(router.process("oi").expect("reload dispatch").success);
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn persistent_models_survive_sweeps() {
        let dir = mk_temp_dir("vox_router_persistent");
        let (router, _, _) = build_router(&dir, &[], vec![10, EOS_ID]);
        router.set_ttl(Duration::ZERO);
        router.set_persistent("phi", true);

        assert!(router.process("oi").expect("dispatch").success);
        router.sweep();
        assert_eq!(router.stats().loaded, vec!["phi".to_string()]);

        // Dropping the exemption makes the next sweep reclaim it.
        router.set_persistent("phi", false);
        router.sweep();
        assert!(router.stats().loaded.is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn eviction_spares_a_model_touched_after_the_staleness_snapshot() {
        let dir = mk_temp_dir("vox_router_fresh_touch");
        let (router, _, _) = build_router(&dir, &[], vec![10, EOS_ID]);
        router.set_ttl(Duration::from_millis(50));

        assert!(router.process("oi").expect("dispatch").success);
        thread::sleep(Duration::from_millis(70));
        let stale = router.usage.stale();
        assert_eq!(stale, vec!["phi".to_string()]);

        // A dispatch lands between the staleness snapshot and the teardown;
        // the re-check under the locks must spare the session.
        router.usage.touch("phi");
        assert!(!router.evict_stale("phi"));
        assert_eq!(router.stats().loaded, vec!["phi".to_string()]);
        assert_eq!(router.stats().idle.len(), 1);

        // Once it idles past the TTL again, the sweep reclaims it.
        thread::sleep(Duration::from_millis(70));
        router.sweep();
        assert!(router.stats().loaded.is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn eviction_waits_for_an_inflight_generation() {
        let dir = mk_temp_dir("vox_router_inflight");
        let (loader, _) = StubLoader::new(vec![10, 10, 10, 10, EOS_ID]);
        let loader = StubLoader {
            step_delay: Duration::from_millis(30),
            ..loader
        };
        let (executor, _) = RecordingExecutor::new();
        let router = Arc::new(Router::new(
            test_catalog(&dir, &[]),
            Box::new(loader),
            Box::new(executor),
        ));
        router.set_ttl(Duration::ZERO);

        let worker = {
            let router = Arc::clone(&router);
            thread::spawn(move || router.process("oi").expect("inflight request"))
        };
        // Give the worker time to grab the session lock.
        thread::sleep(Duration::from_millis(40));

        let sweep_started = Instant::now();
        router.sweep();
        let waited = sweep_started.elapsed();

        assert!(worker.join().expect("worker thread").success);
        assert!(
            waited >= Duration::from_millis(50),
            "sweep did not wait for the in-flight generation: {:?}",
            waited
        );
        assert!(router.stats().loaded.is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn memory_manager_sweeps_in_the_background_and_joins_on_shutdown() {
        let dir = mk_temp_dir("vox_router_manager");
        let (router, _, _) = build_router(&dir, &[], vec![10, EOS_ID]);
        router.set_ttl(Duration::ZERO);

        assert!(router.process("oi").expect("dispatch").success);
        let manager = memory::MemoryManager::spawn(Arc::clone(&router), Duration::from_millis(10))
            .expect("spawn manager");

        let deadline = Instant::now() + Duration::from_secs(2);
        while !router.stats().loaded.is_empty() {
            assert!(Instant::now() < deadline, "background sweep never ran");
            thread::sleep(Duration::from_millis(10));
        }

        manager.shutdown();

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn cancellation_propagates_to_the_caller() {
        let dir = mk_temp_dir("vox_router_cancel");
        let (router, _, _) = build_router(&dir, &[], vec![10, EOS_ID]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = router
            .process_with_cancel("oi", &cancel)
            .expect_err("must cancel");
        assert!(matches!(err, RouterError::Cancelled));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stats_reports_idle_durations_for_touched_models() {
        let dir = mk_temp_dir("vox_router_stats");
        let (router, _, _) = build_router(&dir, &[], vec![10, EOS_ID]);

        assert!(router.process("oi").expect("dispatch").success);
        let stats = router.stats();
        assert_eq!(stats.loaded, vec!["phi".to_string()]);
        assert_eq!(stats.idle.len(), 1);
        assert_eq!(stats.idle[0].0, "phi");
        assert!(stats.idle[0].1 < Duration::from_secs(5));

        let _ = fs::remove_dir_all(dir);
    }
}
