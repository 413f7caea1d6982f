use crate::handlers::parse_params;
use crate::protocol::*;
use crate::state::DaemonState;

pub async fn handle(request: &Request, state: &DaemonState) -> String {
    let params: AuthParams = match parse_params(request) {
        Ok(p) => p,
        Err(e) => {
            let resp = ErrorResponse::from_daemon_error(request.id, &e);
            return serde_json::to_string(&resp).unwrap();
        }
    };

    let ok = match &state.token {
        Some(token) => token == &params.token,
        None => true,
    };

    if ok {
        let resp = SuccessResponse::new(request.id, AuthResult { ok: true });
        serde_json::to_string(&resp).unwrap()
    } else {
        let resp = ErrorResponse::new(request.id, AUTH_FAILED, "Invalid token");
        serde_json::to_string(&resp).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::handle;
    use crate::config::Limits;
    use crate::protocol::Request;
    use crate::sandbox::Sandbox;
    use crate::state::DaemonState;

    fn state_with_token(token: Option<&str>) -> DaemonState {
        DaemonState::new(
            token.map(|t| t.to_string()),
            Limits {
                enable_patches: true,
                enable_commands: true,
                timeout_ms: 5_000,
                max_output_bytes: 64 * 1024,
                max_file_bytes: 1_048_576,
            },
            Sandbox::new(std::env::temp_dir(), None, None),
        )
    }

    fn auth_request(token: &str) -> Request {
        Request {
            id: 1,
            method: "auth".to_string(),
            params: serde_json::json!({ "token": token }),
        }
    }

    #[tokio::test]
    async fn correct_token_is_accepted() {
        let state = state_with_token(Some("secret"));
        let response = handle(&auth_request("secret"), &state).await;
        assert!(response.contains("\"ok\":true"));
    }

    #[tokio::test]
    async fn wrong_token_is_an_auth_failure() {
        let state = state_with_token(Some("secret"));
        let response = handle(&auth_request("guess"), &state).await;
        assert!(response.contains("auth_failed"));
        assert!(!response.contains("\"ok\":true"));
    }

    #[tokio::test]
    async fn tokenless_daemon_accepts_any_token() {
        let state = state_with_token(None);
        let response = handle(&auth_request("whatever"), &state).await;
        assert!(response.contains("\"ok\":true"));
    }

    #[tokio::test]
    async fn missing_params_are_invalid() {
        let state = state_with_token(Some("secret"));
        let request = Request {
            id: 7,
            method: "auth".to_string(),
            params: serde_json::Value::Null,
        };
        let response = handle(&request, &state).await;
        assert!(response.contains("invalid_params"));
    }
}
