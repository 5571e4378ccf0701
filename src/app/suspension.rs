use crate::app::context::Instance;
use crate::app::executor::{Engine, EngineError, RunState};
use crate::app::result::SequenceResult;
use crate::app::sequence::Registry;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Query parameters delivered by a callback, e.g. `code`, `state`, `error`.
pub type CallbackParams = BTreeMap<String, String>;

/// A paused run. Plain data, so it can be persisted and resumed by a
/// different thread or process than the one that suspended it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub run_id: Uuid,
    pub sequence_name: String,
    pub result: SequenceResult,
    /// Index of the next test to execute.
    pub next_index: usize,
    pub endpoint: String,
    pub redirect_to: Option<String>,
    pub suspended_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("No suspended run {0}")]
    UnknownRun(Uuid),
    #[error("Run {0} has already been resumed")]
    AlreadyResumed(Uuid),
    #[error("Run {run_id} waits at /{expected}, but the callback arrived at /{received}")]
    EndpointMismatch {
        run_id: Uuid,
        expected: String,
        received: String,
    },
    #[error("No run is waiting at /{0}")]
    NothingWaiting(String),
    #[error("{count} runs are waiting at /{endpoint}; the callback must carry a state")]
    Ambiguous { endpoint: String, count: usize },
    #[error("Sequence '{0}' is not registered")]
    UnknownSequence(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CoordinatorError {
    /// Whether the caller, not the harness, is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            CoordinatorError::UnknownSequence(_) | CoordinatorError::Engine(_)
        )
    }
}

/// Keyed storage for suspensions. Must be safe for concurrent use.
pub trait SuspensionStore: Send + Sync {
    fn insert(&self, suspension: Suspension);
    fn get(&self, run_id: &Uuid) -> Option<Suspension>;
    /// Removes and returns the suspension; only one caller can win.
    fn take(&self, run_id: &Uuid) -> Option<Suspension>;
    /// Drops a suspension if present. Never fails.
    fn discard(&self, run_id: &Uuid) -> bool;
    fn all(&self) -> Vec<Suspension>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    suspensions: Mutex<HashMap<Uuid, Suspension>>,
}

impl SuspensionStore for MemoryStore {
    fn insert(&self, suspension: Suspension) {
        lock!(self.suspensions).insert(suspension.run_id, suspension);
    }

    fn get(&self, run_id: &Uuid) -> Option<Suspension> {
        lock!(self.suspensions).get(run_id).cloned()
    }

    fn take(&self, run_id: &Uuid) -> Option<Suspension> {
        lock!(self.suspensions).remove(run_id)
    }

    fn discard(&self, run_id: &Uuid) -> bool {
        lock!(self.suspensions).remove(run_id).is_some()
    }

    fn all(&self) -> Vec<Suspension> {
        lock!(self.suspensions).values().cloned().collect()
    }
}

/// Tracks paused runs and resumes them when their callback arrives.
pub struct Coordinator<S: SuspensionStore = MemoryStore> {
    store: S,
    registry: Arc<Registry>,
    consumed: Mutex<HashSet<Uuid>>,
}

impl Suspension {
    pub fn new(
        result: SequenceResult,
        next_index: usize,
        endpoint: String,
        redirect_to: Option<String>,
    ) -> Self {
        Self {
            run_id: result.run_id,
            sequence_name: result.sequence_name.clone(),
            result,
            next_index,
            endpoint,
            redirect_to,
            suspended_at: Utc::now(),
        }
    }
}

impl Coordinator<MemoryStore> {
    pub fn in_memory(registry: Arc<Registry>) -> Self {
        Self::new(MemoryStore::default(), registry)
    }
}

impl<S: SuspensionStore> Coordinator<S> {
    pub fn new(store: S, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            consumed: Mutex::new(HashSet::new()),
        }
    }

    pub fn suspend(&self, suspension: Suspension) {
        debug!(
            "Run {} of '{}' suspended before test #{} waiting at /{}",
            suspension.run_id, suspension.sequence_name, suspension.next_index, suspension.endpoint
        );
        lock!(self.consumed).remove(&suspension.run_id);
        self.store.insert(suspension);
    }

    /// Resumes `run_id` with the parameters delivered at `endpoint`.
    pub fn resume(
        &self,
        engine: &Engine,
        run_id: Uuid,
        endpoint: &str,
        params: CallbackParams,
        instance: &mut Instance,
    ) -> Result<RunState, CoordinatorError> {
        let pending = match self.store.get(&run_id) {
            Some(pending) => pending,
            None if lock!(self.consumed).contains(&run_id) => {
                return Err(CoordinatorError::AlreadyResumed(run_id))
            }
            None => return Err(CoordinatorError::UnknownRun(run_id)),
        };
        if pending.endpoint != endpoint {
            return Err(CoordinatorError::EndpointMismatch {
                run_id,
                expected: pending.endpoint,
                received: endpoint.to_owned(),
            });
        }
        let sequence = self
            .registry
            .get(&pending.sequence_name)
            .ok_or_else(|| CoordinatorError::UnknownSequence(pending.sequence_name.clone()))?;
        let suspension = self
            .store
            .take(&run_id)
            .ok_or(CoordinatorError::AlreadyResumed(run_id))?;
        info!("Resuming run {} of '{}' from /{}", run_id, sequence.name, endpoint);
        let state = match engine.resume(&sequence, suspension.clone(), params, instance) {
            Ok(state) => state,
            Err(err) => {
                warn!("Run {} could not be resumed, keeping it suspended: {}", run_id, err);
                self.store.insert(suspension);
                return Err(err.into());
            }
        };
        lock!(self.consumed).insert(run_id);
        if let RunState::Suspended(next) = &state {
            self.suspend(next.clone());
        }
        Ok(state)
    }

    /// Finds the single run waiting at `endpoint`.
    pub fn waiting_at(&self, endpoint: &str) -> Result<Uuid, CoordinatorError> {
        let waiting: Vec<Uuid> = self
            .store
            .all()
            .into_iter()
            .filter(|suspension| suspension.endpoint == endpoint)
            .map(|suspension| suspension.run_id)
            .collect();
        match waiting.as_slice() {
            [] => Err(CoordinatorError::NothingWaiting(endpoint.to_owned())),
            [run_id] => Ok(*run_id),
            _ => Err(CoordinatorError::Ambiguous {
                endpoint: endpoint.to_owned(),
                count: waiting.len(),
            }),
        }
    }

    /// Abandons a paused run. Unknown ids are ignored.
    pub fn discard(&self, run_id: &Uuid) -> bool {
        lock!(self.consumed).remove(run_id);
        let discarded = self.store.discard(run_id);
        if discarded {
            info!("Discarded suspended run {}", run_id);
        }
        discarded
    }

    pub fn pending(&self) -> Vec<Suspension> {
        self.store.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::result::Status;
    use crate::app::sequence::SequenceDefinition;
    use crate::app::signal::wait_at_endpoint;
    use crate::app::unit::TestDefinition;
    use crate::app::validator::StructuralValidator;
    use crate::connection::testing::ScriptedClient;
    use std::thread;

    fn definition(id: &str) -> TestDefinition {
        TestDefinition::builder().id(id).name(id).build().unwrap()
    }

    fn fixture() -> (Arc<Registry>, Engine) {
        let sequence = SequenceDefinition::builder("Launch")
            .id_prefix("L")
            .suspendable()
            .test(definition("01"), |_| wait_at_endpoint("redirect", None))
            .test(definition("02"), |ctx| {
                let code = ctx.param("code").unwrap_or_default().to_owned();
                ctx.instance.set("code", code);
                Ok(())
            })
            .build()
            .unwrap();
        let mut registry = Registry::new();
        registry.register(sequence).unwrap();
        let engine = Engine::new(Arc::new(ScriptedClient::new()), Arc::new(StructuralValidator));
        (Arc::new(registry), engine)
    }

    fn suspend(coordinator: &Coordinator, engine: &Engine, registry: &Registry, instance: &mut Instance) -> Uuid {
        let sequence = registry.get("Launch").unwrap();
        match engine.run(&sequence, instance, Uuid::new_v4()) {
            RunState::Suspended(suspension) => {
                let run_id = suspension.run_id;
                coordinator.suspend(suspension);
                run_id
            }
            RunState::Completed(_) => panic!("expected the run to suspend"),
        }
    }

    fn params(code: &str) -> CallbackParams {
        let mut params = CallbackParams::new();
        params.insert("code".to_owned(), code.to_owned());
        params
    }

    #[test]
    fn test_resume_completes_and_second_resume_is_rejected() {
        let (registry, engine) = fixture();
        let coordinator = Coordinator::in_memory(registry.clone());
        let mut instance = Instance::new().unwrap();
        let run_id = suspend(&coordinator, &engine, &registry, &mut instance);

        let state = coordinator
            .resume(&engine, run_id, "redirect", params("abc"), &mut instance)
            .unwrap();
        let finished = match state {
            RunState::Completed(result) => result,
            RunState::Suspended(_) => panic!("expected completion"),
        };
        assert_eq!(finished.status, Status::Pass);
        assert_eq!(instance.get_str("code"), Some("abc"));

        let again = coordinator.resume(&engine, run_id, "redirect", params("xyz"), &mut instance);
        assert!(matches!(again, Err(CoordinatorError::AlreadyResumed(id)) if id == run_id));
        assert!(coordinator.pending().is_empty());
        assert_eq!(instance.get_str("code"), Some("abc"));
    }

    #[test]
    fn test_failed_resume_keeps_run_suspended() {
        let (registry, engine) = fixture();
        let coordinator = Coordinator::in_memory(registry.clone());
        let mut instance = Instance::new().unwrap();
        let run_id = suspend(&coordinator, &engine, &registry, &mut instance);
        let mut stale = coordinator.pending().remove(0);
        stale.next_index = 99;
        coordinator.suspend(stale);

        let error = coordinator
            .resume(&engine, run_id, "redirect", params("abc"), &mut instance)
            .unwrap_err();
        assert!(matches!(
            error,
            CoordinatorError::Engine(EngineError::CursorOutOfRange { cursor: 99, .. })
        ));
        assert!(!error.is_client_error());
        assert_eq!(coordinator.waiting_at("redirect").unwrap(), run_id);

        let again = coordinator.resume(&engine, run_id, "redirect", params("abc"), &mut instance);
        assert!(matches!(again, Err(CoordinatorError::Engine(_))));
        assert_eq!(coordinator.pending().len(), 1);
    }

    #[test]
    fn test_discard_forgets_consumed_run() {
        let (registry, engine) = fixture();
        let coordinator = Coordinator::in_memory(registry.clone());
        let mut instance = Instance::new().unwrap();
        let run_id = suspend(&coordinator, &engine, &registry, &mut instance);
        coordinator
            .resume(&engine, run_id, "redirect", params("abc"), &mut instance)
            .unwrap();
        assert!(lock!(coordinator.consumed).contains(&run_id));

        assert!(!coordinator.discard(&run_id));
        assert!(lock!(coordinator.consumed).is_empty());
        assert!(matches!(
            coordinator.resume(&engine, run_id, "redirect", params("abc"), &mut instance),
            Err(CoordinatorError::UnknownRun(_))
        ));
    }

    #[test]
    fn test_unknown_run_is_rejected() {
        let (registry, engine) = fixture();
        let coordinator = Coordinator::in_memory(registry);
        let mut instance = Instance::new().unwrap();
        let error = coordinator
            .resume(&engine, Uuid::new_v4(), "redirect", params("abc"), &mut instance)
            .unwrap_err();
        assert!(matches!(error, CoordinatorError::UnknownRun(_)));
        assert!(error.is_client_error());
    }

    #[test]
    fn test_endpoint_mismatch_keeps_suspension() {
        let (registry, engine) = fixture();
        let coordinator = Coordinator::in_memory(registry.clone());
        let mut instance = Instance::new().unwrap();
        let run_id = suspend(&coordinator, &engine, &registry, &mut instance);

        let error = coordinator
            .resume(&engine, run_id, "launch", params("abc"), &mut instance)
            .unwrap_err();
        assert!(matches!(error, CoordinatorError::EndpointMismatch { .. }));
        assert_eq!(coordinator.pending().len(), 1);
        assert_eq!(coordinator.waiting_at("redirect").unwrap(), run_id);
    }

    #[test]
    fn test_discard_never_fails() {
        let (registry, engine) = fixture();
        let coordinator = Coordinator::in_memory(registry.clone());
        let mut instance = Instance::new().unwrap();
        let run_id = suspend(&coordinator, &engine, &registry, &mut instance);

        assert!(coordinator.discard(&run_id));
        assert!(!coordinator.discard(&run_id));
        assert!(!coordinator.discard(&Uuid::new_v4()));
        assert!(matches!(
            coordinator.waiting_at("redirect"),
            Err(CoordinatorError::NothingWaiting(_))
        ));
    }

    #[test]
    fn test_ambiguous_endpoint_requires_state() {
        let (registry, engine) = fixture();
        let coordinator = Coordinator::in_memory(registry.clone());
        let mut instance = Instance::new().unwrap();
        suspend(&coordinator, &engine, &registry, &mut instance);
        suspend(&coordinator, &engine, &registry, &mut instance);

        assert!(matches!(
            coordinator.waiting_at("redirect"),
            Err(CoordinatorError::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn test_store_is_safe_across_threads() {
        let (registry, engine) = fixture();
        let store = Arc::new(MemoryStore::default());
        let sequence = registry.get("Launch").unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let engine = engine.clone();
            let sequence = sequence.clone();
            handles.push(thread::spawn(move || {
                let mut instance = Instance::new().unwrap();
                if let RunState::Suspended(suspension) =
                    engine.run(&sequence, &mut instance, Uuid::new_v4())
                {
                    let run_id = suspension.run_id;
                    store.insert(suspension);
                    assert!(store.get(&run_id).is_some());
                    assert!(store.take(&run_id).is_some());
                    assert!(store.take(&run_id).is_none());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(store.all().is_empty());
    }
}
