// Coordinator - top level glue between the remote store's change
// notifications, the reconciler, the flight session, and downstream
// consumers. Explicitly constructed and lifetime-scoped; no process-wide
// singleton.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::guard::{CurrentLocationView, LocationSample};
use crate::reconciler::{ChangeBatch, Document, Reconciler};
use crate::remote::RawSnapshot;
use crate::session::{FlightSession, SessionState, TraceStore};
use crate::trace::FlightTrace;

/// Handle for one attached collection listener.
struct ListenerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

/// Synchronization orchestrator.
///
/// Each attached collection gets exactly one worker task owning that
/// collection's reconciler, so diffs for a collection are strictly
/// serialized in arrival order while independent collections run
/// concurrently. Classified batches fan out over a broadcast channel;
/// location batches additionally route into the flight session's single
/// ingest entry point.
pub struct Coordinator {
    config: SyncConfig,
    store: Arc<dyn TraceStore>,
    session: Arc<RwLock<FlightSession>>,
    listeners: RwLock<HashMap<String, ListenerHandle>>,
    error_tx: mpsc::UnboundedSender<SyncError>,
    /// Receiver half of the decode-error channel, claimable once by the
    /// embedding application.
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncError>>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    pub fn with_config(store: Arc<dyn TraceStore>, config: SyncConfig) -> Self {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        Coordinator {
            config,
            store,
            session: Arc::new(RwLock::new(FlightSession::new())),
            listeners: RwLock::new(HashMap::new()),
            error_tx,
            error_rx: Mutex::new(Some(error_rx)),
        }
    }

    /// Claim the decode-error channel. Errors are logged either way; the
    /// channel lets the application surface them to the user. Returns None
    /// after the first call.
    pub fn take_error_receiver(&self) -> Option<mpsc::UnboundedReceiver<SyncError>> {
        self.error_rx.lock().unwrap().take()
    }

    /// Raw delivery queue to hand to the transport, sized per configuration.
    pub fn delivery_channel(&self) -> (mpsc::Sender<RawSnapshot>, mpsc::Receiver<RawSnapshot>) {
        mpsc::channel(self.config.delivery_queue)
    }

    /// Attach a listener for one remote collection.
    ///
    /// Spawns the collection's worker task and returns a receiver of
    /// classified batches; further consumers come from
    /// `broadcast::Receiver::resubscribe`. Re-attaching an already attached
    /// collection replaces its worker with a fresh reconciler, so the next
    /// delivery is reported as a first sync regardless of any earlier
    /// attachment's cache.
    pub async fn attach<T>(
        &self,
        collection: &str,
        mut deliveries: mpsc::Receiver<RawSnapshot>,
    ) -> broadcast::Receiver<ChangeBatch<T>>
    where
        T: Document + Send + Sync + 'static,
    {
        let (batch_tx, batch_rx) = broadcast::channel(self.config.fanout_capacity);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut reconciler = Reconciler::<T>::new(collection);
        let error_tx = self.error_tx.clone();
        let name = collection.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // A pending detach wins over queued deliveries: an
                    // in-flight diff completes (reconciliation below is
                    // synchronous), but no new diff starts once detach has
                    // been requested.
                    biased;
                    _ = shutdown_rx.recv() => break,
                    delivery = deliveries.recv() => match delivery {
                        Some(snapshot) => {
                            let (batch, errors) = reconciler.reconcile(&snapshot);
                            for err in errors {
                                warn!(collection = %name, %err, "snapshot item dropped");
                                let _ = error_tx.send(err);
                            }
                            debug!(
                                collection = %name,
                                first_sync = batch.first_sync,
                                local_origin = batch.local_origin,
                                added = batch.added.len(),
                                updated = batch.updated.len(),
                                deleted = batch.deleted.len(),
                                "snapshot reconciled"
                            );
                            // No live subscribers is fine
                            let _ = batch_tx.send(batch);
                        }
                        None => break, // transport closed the delivery queue
                    },
                }
            }
            debug!(collection = %name, "listener detached");
        });

        let mut listeners = self.listeners.write().await;
        if let Some(old) = listeners.insert(collection.to_string(), ListenerHandle { shutdown_tx }) {
            debug!(collection = %collection, "replacing existing listener");
            let _ = old.shutdown_tx.try_send(());
        }
        batch_rx
    }

    /// Detach a collection's listener. Idempotent: detaching an unknown or
    /// already-detached collection is a no-op. An in-flight diff completes;
    /// no new diffs start afterwards.
    pub async fn detach(&self, collection: &str) {
        if let Some(handle) = self.listeners.write().await.remove(collection) {
            let _ = handle.shutdown_tx.try_send(());
        }
    }

    /// Attach a location collection and route every added or updated sample
    /// into the flight session (the ordering guard and trace recorder sit
    /// behind its single ingest entry point).
    pub async fn attach_locations(
        &self,
        collection: &str,
        deliveries: mpsc::Receiver<RawSnapshot>,
    ) -> broadcast::Receiver<ChangeBatch<LocationSample>> {
        let batch_rx = self.attach::<LocationSample>(collection, deliveries).await;
        let mut feed = batch_rx.resubscribe();
        let session = Arc::clone(&self.session);
        let name = collection.to_string();

        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(batch) => {
                        for sample in batch.added.iter().chain(batch.updated.iter()) {
                            let accepted = session.write().await.ingest(sample);
                            if !accepted {
                                // Stale sample or no running session; both
                                // are expected steady-state outcomes
                                debug!(
                                    collection = %name,
                                    participant = %sample.participant_id,
                                    timestamp = sample.timestamp,
                                    "location sample not accepted"
                                );
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(collection = %name, skipped, "location router lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        batch_rx
    }

    /// Route one sample into the session. Returns false without mutating
    /// anything when no session is RUNNING (late samples for a just-stopped
    /// flight are expected, not an error) or when the sample is stale.
    pub async fn publish_location(&self, sample: &LocationSample) -> bool {
        self.session.write().await.ingest(sample)
    }

    // Session control surface. Transitions panic on lifecycle misuse, see
    // FlightSession.

    pub async fn start_flight(&self, flight_id: &str) {
        self.session.write().await.start(flight_id);
    }

    /// Stop the running flight. Completes only after the packed trace is
    /// persisted; on failure the session stays RUNNING and the caller may
    /// retry.
    pub async fn stop_flight(&self) -> Result<(), SyncError> {
        self.session.write().await.stop(self.store.as_ref()).await
    }

    pub async fn clear_flight(&self) {
        self.session.write().await.clear();
    }

    pub async fn display_trace(&self, flight_id: &str) -> Result<(), SyncError> {
        self.session
            .write()
            .await
            .display(flight_id, self.store.as_ref())
            .await
    }

    pub async fn quit_display(&self) {
        self.session.write().await.quit_display();
    }

    // Read-only accessors for the UI layer; all return snapshots.

    pub async fn session_state(&self) -> SessionState {
        self.session.read().await.state()
    }

    pub async fn current_locations(&self) -> CurrentLocationView {
        self.session.read().await.current_locations()
    }

    pub async fn current_trace(&self) -> Option<FlightTrace> {
        self.session.read().await.current_trace()
    }

    pub async fn elapsed_seconds(&self) -> u64 {
        self.session.read().await.elapsed_seconds()
    }
}
