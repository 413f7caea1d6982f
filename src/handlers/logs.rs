//! Structured log retrieval from the in-memory ring.

use crate::error::DaemonError;
use crate::handlers::{parse_params, respond};
use crate::logstore::{LogEntry, LogQuery};
use crate::protocol::Request;
use crate::state::DaemonState;

pub async fn handle_query(request: &Request, state: &DaemonState) -> String {
    let id = request.id;
    let query = if request.params.is_null() {
        LogQuery::default()
    } else {
        match parse_params::<LogQuery>(request) {
            Ok(q) => q,
            Err(e) => return respond::<Vec<LogEntry>>(id, Err(e)),
        }
    };

    respond(
        id,
        Ok::<_, DaemonError>(state.logs.query(&query).await),
    )
}
