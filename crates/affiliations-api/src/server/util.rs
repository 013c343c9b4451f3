/// Every route except the health probe requires `X-Secret` to match either
/// the process-configured secret or the stored, rotatable one. The stored
/// secret is read per request so a rotation is effective immediately on
/// every replica.
async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.uri().path() == "/v1/health" {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let stored = { state.kernel.lock().await.api_secret() };
    let stored = match stored {
        Ok(stored) => stored,
        Err(err) => return HttpApiError::from_ledger(err).into_response(),
    };

    if !secret_matches(provided.as_deref(), state.env_secret.as_deref(), stored.as_deref()) {
        return HttpApiError::bad_secret().into_response();
    }

    next.run(request).await
}

/// A request is authorized when its secret matches any configured one; with
/// no secret configured at all, everything is refused.
fn secret_matches(provided: Option<&str>, env_secret: Option<&str>, stored: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    [env_secret, stored]
        .into_iter()
        .flatten()
        .any(|expected| expected == provided)
}

fn parse_prefer_type(raw: Option<&str>) -> Result<Option<RelationKind>, HttpApiError> {
    match raw {
        None => Ok(None),
        Some(raw) => RelationKind::parse(raw).map(Some).ok_or_else(|| {
            HttpApiError::invalid_request(
                "unknown relation type",
                Some(format!("prefer_type={raw}")),
            )
        }),
    }
}
