//! Bulk operation coordinator
//!
//! `run_bulk` persists the operation and returns; the fan-out runs on a
//! spawned task. Workers never touch the `BulkOperation` themselves: they send
//! item outcomes to one aggregator task per operation, which owns the record
//! until it is finalised.

use super::dispatcher::LetterDispatcher;
use crate::error::{LetterError, Result};
use crate::services::LetterGenerator;
use crate::store::LetterStore;
use futures::{stream, FutureExt, StreamExt};
use letter_types::{
    BulkItemResult, BulkOperation, BulkOperationId, BulkOperationType, BulkRequest, EmployeeId,
    GenerateRequest, LetterId, LetterStatus,
};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Runs one employee's unit of work for any bulk operation type
pub struct ItemProcessor {
    store: Arc<dyn LetterStore>,
    generator: Arc<LetterGenerator>,
    dispatcher: Arc<LetterDispatcher>,
}

impl ItemProcessor {
    pub fn new(
        store: Arc<dyn LetterStore>,
        generator: Arc<LetterGenerator>,
        dispatcher: Arc<LetterDispatcher>,
    ) -> Self {
        Self {
            store,
            generator,
            dispatcher,
        }
    }

    /// Process one employee; failures end up in the returned result
    pub async fn process(&self, request: &BulkRequest, employee_id: &EmployeeId) -> BulkItemResult {
        let employee_name = match self.store.get_employee(employee_id).await {
            Ok(employee) => employee.map(|e| e.name),
            Err(_) => None,
        };

        let generate = GenerateRequest {
            template_id: request.template_id.clone(),
            employee_id: employee_id.clone(),
            signature_id: request.signature_id.clone(),
            field_values: request.common_field_values.clone(),
            actor: request.actor.clone(),
        };

        let (letter_id, outcome) = match request.operation_type {
            BulkOperationType::Generate => match self.generator.generate(&generate).await {
                Ok(letter) => (Some(letter.id), Ok(())),
                Err(e) => (None, Err(e)),
            },
            BulkOperationType::Preview => (None, self.generator.preview(&generate).await.map(|_| ())),
            BulkOperationType::SendEmail => self.send(&generate).await,
        };

        match outcome {
            Ok(()) => BulkItemResult::succeeded(employee_id.clone(), employee_name, letter_id),
            Err(e) => {
                log::warn!("Bulk item for employee {} failed: {}", employee_id, e);
                BulkItemResult::failed(employee_id.clone(), employee_name, letter_id, e.to_string())
            }
        }
    }

    /// Send the employee's newest letter for the template.
    ///
    /// A `Generated` letter is sent as is and a `Failed` one is resent. When
    /// there is no letter, or the newest was already sent, a fresh one is
    /// generated first.
    async fn send(&self, request: &GenerateRequest) -> (Option<LetterId>, Result<()>) {
        let newest = match self
            .store
            .find_letters(&request.template_id, &request.employee_id)
            .await
        {
            Ok(letters) => letters.into_iter().next(),
            Err(e) => return (None, Err(e)),
        };

        let actor = request.actor.as_deref();
        let (letter, resend) = match newest {
            Some(letter) if letter.status == LetterStatus::Generated => (letter, false),
            Some(letter) if letter.status == LetterStatus::Failed => (letter, true),
            _ => match self.generator.generate(request).await {
                Ok(letter) => (letter, false),
                Err(e) => return (None, Err(e)),
            },
        };

        let letter_id = Some(letter.id.clone());
        let outcome = if resend {
            self.dispatcher.resend(&letter, actor).await
        } else {
            self.dispatcher.deliver(&letter, actor).await
        };
        (letter_id, outcome.map(|_| ()))
    }
}

#[derive(Clone)]
pub struct BulkCoordinator {
    store: Arc<dyn LetterStore>,
    processor: Arc<ItemProcessor>,
    permits: Arc<Semaphore>,
    parallelism: usize,
    active: Arc<Mutex<HashMap<BulkOperationId, CancellationToken>>>,
}

impl BulkCoordinator {
    pub fn new(store: Arc<dyn LetterStore>, processor: Arc<ItemProcessor>, parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            store,
            processor,
            permits: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate and persist a bulk operation, then fan out in the background
    pub async fn run_bulk(&self, mut request: BulkRequest) -> Result<BulkOperation> {
        let mut seen = HashSet::new();
        request.employee_ids.retain(|id| seen.insert(id.clone()));
        if request.employee_ids.is_empty() {
            return Err(LetterError::Validation("Bulk request has no employees".to_string()));
        }

        let template = self
            .store
            .get_template(&request.template_id)
            .await?
            .ok_or_else(|| LetterError::NotFound(format!("Template {}", request.template_id)))?;
        if !template.is_active {
            return Err(LetterError::NotFound(format!("Template {} is inactive", template.id)));
        }

        let operation = BulkOperation::new(request);
        self.store.save_bulk_operation(&operation).await?;

        let token = CancellationToken::new();
        self.active.lock().await.insert(operation.id.clone(), token.clone());

        log::info!(
            "Started bulk {:?} operation {} for {} employees",
            operation.operation_type,
            operation.id,
            operation.total_items
        );

        let coordinator = self.clone();
        let snapshot = operation.clone();
        tokio::spawn(async move {
            coordinator.execute(snapshot, token).await;
        });

        Ok(operation)
    }

    async fn execute(self, operation: BulkOperation, token: CancellationToken) {
        let operation_id = operation.id.clone();
        let request = Arc::new(operation.request.clone());
        let (tx, rx) = mpsc::channel(self.parallelism * 2);

        let aggregator = tokio::spawn(aggregate(
            self.store.clone(),
            self.active.clone(),
            operation,
            rx,
            token.clone(),
        ));

        let results = self.run_items(request.clone(), request.employee_ids.clone(), token.clone());
        results
            .for_each(|result| {
                let tx = tx.clone();
                async move {
                    if tx.send(result).await.is_err() {
                        log::error!("Bulk aggregator stopped before all results were recorded");
                    }
                }
            })
            .await;
        drop(tx);

        match aggregator.await {
            Ok(finished) => log::info!(
                "Bulk operation {} finished as {:?}: {} completed, {} failed of {}",
                finished.id,
                finished.status,
                finished.completed_items,
                finished.failed_items,
                finished.total_items
            ),
            Err(e) => {
                log::error!("Bulk aggregator for {} panicked: {}", operation_id, e);
                self.active.lock().await.remove(&operation_id);
            }
        }
    }

    /// Stream of item results on the shared worker pool; items that have not
    /// started when `token` is cancelled are skipped
    pub(crate) fn run_items(
        &self,
        request: Arc<BulkRequest>,
        employee_ids: Vec<EmployeeId>,
        token: CancellationToken,
    ) -> impl futures::Stream<Item = BulkItemResult> + Send + 'static {
        let processor = self.processor.clone();
        let permits = self.permits.clone();

        stream::iter(employee_ids)
            .map(move |employee_id| {
                let processor = processor.clone();
                let permits = permits.clone();
                let request = request.clone();
                let token = token.clone();
                async move {
                    let _permit = permits.acquire_owned().await.ok()?;
                    if token.is_cancelled() {
                        return None;
                    }

                    let work = AssertUnwindSafe(processor.process(&request, &employee_id));
                    Some(work.catch_unwind().await.unwrap_or_else(|_| {
                        BulkItemResult::failed(employee_id.clone(), None, None, "worker panicked")
                    }))
                }
            })
            .buffer_unordered(self.parallelism)
            .filter_map(|result| async move { result })
    }

    /// Request cancellation; `false` if the operation is not running
    pub async fn cancel(&self, operation_id: &BulkOperationId) -> Result<bool> {
        if let Some(token) = self.active.lock().await.get(operation_id) {
            token.cancel();
            log::info!("Cancellation requested for bulk operation {}", operation_id);
            return Ok(true);
        }

        self.get_status(operation_id).await?;
        Ok(false)
    }

    pub async fn get_status(&self, operation_id: &BulkOperationId) -> Result<BulkOperation> {
        self.store
            .get_bulk_operation(operation_id)
            .await?
            .ok_or_else(|| LetterError::NotFound(format!("Bulk operation {}", operation_id)))
    }

    /// All known operations, newest first
    pub async fn list_operations(&self) -> Result<Vec<BulkOperation>> {
        self.store.list_bulk_operations().await
    }

    pub async fn running_operations(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Close operations left `Running` by a previous process
    pub async fn reconcile_interrupted(&self) -> Result<usize> {
        let active = self.active.lock().await;
        let mut reconciled = 0;

        for mut operation in self.store.list_bulk_operations().await? {
            if operation.is_running() && !active.contains_key(&operation.id) {
                operation.finish(true);
                self.store.save_bulk_operation(&operation).await?;
                log::warn!(
                    "Bulk operation {} was interrupted and is now {:?}",
                    operation.id,
                    operation.status
                );
                reconciled += 1;
            }
        }

        Ok(reconciled)
    }

    /// Mark an operation busy for exclusive work such as a retry.
    /// Returns `None` if it is already running.
    pub(crate) async fn claim(&self, operation_id: &BulkOperationId) -> Option<CancellationToken> {
        let mut active = self.active.lock().await;
        if active.contains_key(operation_id) {
            return None;
        }
        let token = CancellationToken::new();
        active.insert(operation_id.clone(), token.clone());
        Some(token)
    }

    pub(crate) async fn save(&self, operation: &BulkOperation) -> Result<()> {
        self.store.save_bulk_operation(operation).await
    }

    pub(crate) async fn release(&self, operation_id: &BulkOperationId) {
        self.active.lock().await.remove(operation_id);
    }
}

/// Single owner of a running operation's counters.
///
/// The operation leaves the active set before its final state is written,
/// so anyone who observes a finished operation can retry it immediately.
async fn aggregate(
    store: Arc<dyn LetterStore>,
    active: Arc<Mutex<HashMap<BulkOperationId, CancellationToken>>>,
    mut operation: BulkOperation,
    mut rx: mpsc::Receiver<BulkItemResult>,
    token: CancellationToken,
) -> BulkOperation {
    while let Some(result) = rx.recv().await {
        operation.record(result);
        if let Err(e) = store.save_bulk_operation(&operation).await {
            log::warn!("Failed to persist progress of bulk operation {}: {}", operation.id, e);
        }
    }

    active.lock().await.remove(&operation.id);
    operation.finish(token.is_cancelled());
    if let Err(e) = store.save_bulk_operation(&operation).await {
        log::error!("Failed to persist final state of bulk operation {}: {}", operation.id, e);
    }
    operation
}
