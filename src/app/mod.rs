macro_rules! lock {
    ($name: expr) => {
        match $name.lock() {
            Ok(locked) => locked,
            Err(poisoned) => poisoned.into_inner(),
        }
    };
}

pub mod assert;
pub mod capture;
pub mod context;
pub mod executor;
pub mod result;
pub mod sequence;
pub mod signal;
pub mod suspension;
pub mod unit;
pub mod validator;

use crate::app::context::Instance;
use crate::app::executor::{Engine, RunState};
use crate::app::result::SequenceResult;
use crate::app::sequence::{Registry, SequenceDefinition};
use crate::app::suspension::{CallbackParams, Coordinator, CoordinatorError};
use crate::app::validator::ResourceValidator;
use crate::configuration::manifest::Manifest;
use crate::connection::HttpClient;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Sequence '{0}' is not registered")]
    UnknownSequence(String),
    #[error("Cannot prepare the testing instance: {0}")]
    Instance(#[from] liquid::Error),
}

/// Runs a selection of sequences against one shared testing instance.
///
/// Sequences run one after another. When a run suspends, the remaining
/// sequences wait until that run is resumed and completes, since they
/// usually depend on what it produces (e.g. an access token).
pub struct App {
    name: String,
    engine: Engine,
    coordinator: Arc<Coordinator>,
    instance: Mutex<Instance>,
    queue: Mutex<VecDeque<Arc<SequenceDefinition>>>,
    confirm: bool,
    completions: Mutex<Sender<SequenceResult>>,
    /// Callbacks being processed right now.
    in_flight: AtomicUsize,
}

impl App {
    pub fn new(
        manifest: &Manifest,
        registry: Registry,
        selection: &[String],
        client: Arc<dyn HttpClient>,
        validator: Arc<dyn ResourceValidator>,
    ) -> Result<(Self, Receiver<SequenceResult>), AppError> {
        let queue = if selection.is_empty() {
            registry.iter().cloned().collect()
        } else {
            // Registration order, whatever order the selection lists.
            for name in selection {
                if registry.get(name).is_none() {
                    return Err(AppError::UnknownSequence(name.clone()));
                }
            }
            registry
                .iter()
                .filter(|sequence| selection.contains(&sequence.name))
                .cloned()
                .collect()
        };
        let instance = Instance::with_fields(manifest.instance_fields())?;
        let (sender, receiver) = channel();
        let app = App {
            name: manifest.name.clone(),
            engine: Engine::new(client, validator),
            coordinator: Arc::new(Coordinator::in_memory(Arc::new(registry))),
            instance: Mutex::new(instance),
            queue: Mutex::new(queue),
            confirm: manifest.confirm,
            completions: Mutex::new(sender),
            in_flight: AtomicUsize::new(0),
        };
        Ok((app, receiver))
    }

    pub fn with_confirmation(mut self, confirm: bool) -> Self {
        self.confirm = self.confirm || confirm;
        self
    }

    pub fn run(&self) {
        info!("Starting session '{}'", self.name);
        info!("Queued {} sequences", lock!(self.queue).len());
        self.advance();
    }

    /// Runs queued sequences until one suspends or the queue is empty.
    fn advance(&self) {
        loop {
            let sequence = match lock!(self.queue).pop_front() {
                Some(sequence) => sequence,
                None => return,
            };
            if sequence.requires_confirmation && !self.confirm {
                warn!(
                    "Sequence '{}' requires confirmation before it runs, skipping",
                    sequence.name
                );
                continue;
            }
            let state = {
                let mut instance = lock!(self.instance);
                self.engine.run(&sequence, &mut instance, Uuid::new_v4())
            };
            if !self.settle(state) {
                return;
            }
        }
    }

    /// Files a run state away; returns whether the run completed.
    fn settle(&self, state: RunState) -> bool {
        match state {
            RunState::Completed(result) => {
                if lock!(self.completions).send(result).is_err() {
                    debug!("Nobody listens for completed sequences");
                }
                true
            }
            RunState::Suspended(suspension) => {
                match &suspension.redirect_to {
                    Some(url) => warn!(
                        "Sequence '{}' is waiting at /{}; open {} to continue",
                        suspension.sequence_name, suspension.endpoint, url
                    ),
                    None => warn!(
                        "Sequence '{}' is waiting at /{}",
                        suspension.sequence_name, suspension.endpoint
                    ),
                }
                self.coordinator.suspend(suspension);
                false
            }
        }
    }

    /// Delivers a callback. Without a run id, the single run waiting at
    /// `endpoint` is resumed.
    pub fn deliver(
        &self,
        run_id: Option<Uuid>,
        endpoint: &str,
        params: CallbackParams,
    ) -> Result<RunState, CoordinatorError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let delivered = self.resume(run_id, endpoint, params);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        delivered
    }

    fn resume(
        &self,
        run_id: Option<Uuid>,
        endpoint: &str,
        params: CallbackParams,
    ) -> Result<RunState, CoordinatorError> {
        let run_id = match run_id {
            Some(run_id) => run_id,
            None => self.coordinator.waiting_at(endpoint)?,
        };
        let state = {
            let mut instance = lock!(self.instance);
            self.coordinator
                .resume(&self.engine, run_id, endpoint, params, &mut instance)?
        };
        match &state {
            RunState::Completed(result) => {
                if lock!(self.completions).send(result.clone()).is_err() {
                    debug!("Nobody listens for completed sequences");
                }
                self.advance();
            }
            RunState::Suspended(suspension) => {
                warn!(
                    "Sequence '{}' suspended again at /{}",
                    suspension.sequence_name, suspension.endpoint
                );
            }
        }
        Ok(state)
    }

    /// Runs still waiting for a callback, plus callbacks being processed.
    pub fn pending(&self) -> usize {
        self.coordinator.pending().len() + self.in_flight.load(Ordering::SeqCst)
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
