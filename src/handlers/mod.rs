pub mod auth;
pub mod breakpoints;
pub mod command;
pub mod execution;
pub mod git;
pub mod lint;
pub mod logs;
pub mod patch;
pub mod session;
pub mod testing;

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::DaemonError;
use crate::protocol::*;
use crate::state::DaemonState;

/// Dispatch a request to the appropriate handler
pub async fn dispatch(request: &Request, state: Arc<DaemonState>) -> String {
    let start = Instant::now();
    let method = request.method.as_str();
    let id = request.id;

    debug!("[dispatch] → id={} method={}", id, method);

    let response = match method {
        METHOD_AUTH => auth::handle(request, &state).await,
        METHOD_DEBUG_OPEN => session::handle_open(request, state.clone()).await,
        METHOD_DEBUG_CLOSE => session::handle_close(request, &state).await,
        METHOD_DEBUG_LIST => session::handle_list(request, &state).await,
        METHOD_DEBUG_REMOVE => session::handle_remove(request, &state).await,
        METHOD_DEBUG_CONTINUE => execution::handle_continue(request, &state).await,
        METHOD_DEBUG_STEP => execution::handle_step(request, &state).await,
        METHOD_DEBUG_PAUSE => execution::handle_pause(request, &state).await,
        METHOD_DEBUG_EVALUATE => execution::handle_evaluate(request, &state).await,
        METHOD_BREAKPOINT_SET => breakpoints::handle_set(request, &state).await,
        METHOD_BREAKPOINT_CLEAR => breakpoints::handle_clear(request, &state).await,
        METHOD_BREAKPOINT_LIST => breakpoints::handle_list(request, &state).await,
        METHOD_BREAKPOINT_TOGGLE => breakpoints::handle_toggle(request, &state).await,
        METHOD_COMMAND_RUN => command::handle_run(request, &state).await,
        METHOD_COMMAND_LIST => command::handle_list(request, &state).await,
        METHOD_TEST_RUN => testing::handle_run(request, &state).await,
        METHOD_LINT_RUN => lint::handle_run(request, &state).await,
        METHOD_PATCH_APPLY => patch::handle_apply(request, &state).await,
        METHOD_PATCH_PENDING => patch::handle_pending(request, &state).await,
        METHOD_CONFIRM => patch::handle_confirm(request, &state).await,
        METHOD_REJECT => patch::handle_reject(request, &state).await,
        METHOD_GIT_STATUS => git::handle_status(request, &state).await,
        METHOD_GIT_DIFF => git::handle_diff(request, &state).await,
        METHOD_GIT_COMMIT => git::handle_commit(request, &state).await,
        METHOD_LOG_QUERY => logs::handle_query(request, &state).await,
        _ => {
            warn!("[dispatch] Unknown method: {}", method);
            let resp = ErrorResponse::new(
                request.id,
                INVALID_PARAMS,
                format!("Unknown method: {}", request.method),
            );
            serde_json::to_string(&resp).unwrap()
        }
    };

    let elapsed = start.elapsed();
    let is_error = response.contains("\"error\"");

    if is_error {
        info!("[dispatch] ← id={} method={} error elapsed={:?}", id, method, elapsed);
    } else {
        debug!("[dispatch] ← id={} method={} ok elapsed={:?}", id, method, elapsed);
    }

    response
}

/// Parse request params, mapping malformed input to a validation error.
pub(crate) fn parse_params<T: DeserializeOwned>(request: &Request) -> Result<T, DaemonError> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| DaemonError::Validation(format!("Invalid params: {e}")))
}

/// Serialize a handler outcome into the wire envelope. Every failure
/// becomes an error-shaped response; nothing propagates past here.
pub(crate) fn respond<T: Serialize>(id: u64, outcome: Result<T, DaemonError>) -> String {
    let json = match outcome {
        Ok(result) => serde_json::to_string(&SuccessResponse::new(id, result)),
        Err(err) => serde_json::to_string(&ErrorResponse::from_daemon_error(id, &err)),
    };
    json.unwrap_or_else(|_| {
        format!(r#"{{"id":{id},"error":{{"code":"internal_error","message":"serialization failed"}}}}"#)
    })
}
