use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use batchflow_core::error::Result;
use batchflow_core::types::{RunEvent, SessionId};

use crate::supervisor::Supervisor;

/// Ordered, single-pass sequence of events from one flow execution.
///
/// Consumers observe cancellation only between events and stop iterating as
/// soon as a terminal output event (file ready or chat output ready) is seen.
pub type RunEventStream = BoxStream<'static, Result<RunEvent>>;

/// Starts a flow execution for one document under a compiled supervisor.
pub trait RunStreamFactory: Send + Sync + 'static {
    fn open(
        &self,
        supervisor: Arc<Supervisor>,
        document_id: &str,
        session_id: &SessionId,
    ) -> BoxFuture<'_, Result<RunEventStream>>;
}
