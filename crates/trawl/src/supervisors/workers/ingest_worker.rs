use std::sync::Arc;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::common::{ObjectResult, SourceObject};
use crate::supervisors::pipeline::{IngestContext, process_object};
use crate::supervisors::workers::Worker;

/// 👷 One seat in the pool. Takes whatever object is next, never picks favourites.
pub(crate) struct IngestWorker {
    id: usize,
    work_rx: Receiver<(usize, SourceObject)>,
    result_tx: Sender<(usize, ObjectResult)>,
    ctx: Arc<IngestContext>,
}

impl IngestWorker {
    pub(crate) fn new(
        id: usize,
        work_rx: Receiver<(usize, SourceObject)>,
        result_tx: Sender<(usize, ObjectResult)>,
        ctx: Arc<IngestContext>,
    ) -> Self {
        Self {
            id,
            work_rx,
            result_tx,
            ctx,
        }
    }
}

impl Worker for IngestWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!(worker_id = self.id, "👷 clocking in");
            let mut the_handled = 0usize;
            loop {
                // -- 🛑 shutdown first: no new object gets picked up once the alarm has gone off
                let the_next = tokio::select! {
                    biased;
                    _ = self.ctx.shutdown.cancelled() => None,
                    next = self.work_rx.recv() => next.ok(),
                };
                let Some((the_index, the_object)) = the_next else {
                    break;
                };
                trace!(worker_id = self.id, key = %the_object.key, "📥 picked up");

                let the_result = process_object(Arc::clone(&self.ctx), self.id, the_object).await;
                the_handled += 1;
                if self.result_tx.send((the_index, the_result)).await.is_err() {
                    // -- the coordinator stopped listening. nobody to tell, so stop working
                    debug!(worker_id = self.id, "📪 result channel closed, clocking out early");
                    break;
                }
            }
            debug!(worker_id = self.id, handled = the_handled, "🏁 clocking out");
            Ok(())
        })
    }
}
