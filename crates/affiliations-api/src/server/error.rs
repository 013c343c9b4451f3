#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn bad_secret() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: ApiError::new(ErrorCode::BadSecret, "missing or invalid X-Secret", None),
        }
    }

    fn invalid_request(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidRequest, message, details),
        }
    }

    fn from_ledger(err: LedgerError) -> Self {
        let (status, code) = match &err {
            LedgerError::InvalidArity { .. } => (StatusCode::BAD_REQUEST, ErrorCode::InvalidArity),
            LedgerError::DuplicateMarriage(_) => {
                (StatusCode::CONFLICT, ErrorCode::DuplicateMarriage)
            }
            LedgerError::NotAFamily(_) => (StatusCode::BAD_REQUEST, ErrorCode::NotAFamily),
            LedgerError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            LedgerError::Unauthorized(_) => (StatusCode::FORBIDDEN, ErrorCode::Unauthorized),
            LedgerError::AlreadyFinalized { .. } => {
                (StatusCode::CONFLICT, ErrorCode::AlreadyFinalized)
            }
            LedgerError::Expired(_) => (StatusCode::GONE, ErrorCode::Expired),
            LedgerError::InsufficientFunds { .. } => {
                (StatusCode::PAYMENT_REQUIRED, ErrorCode::InsufficientFunds)
            }
            LedgerError::ExternalLedgerUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::ExternalLedgerUnavailable,
            ),
            LedgerError::InvalidPercent(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::KinshipCycle { .. }
            | LedgerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest),
            LedgerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        };

        if status.is_server_error() {
            warn!(%err, "request failed");
        }

        Self {
            status,
            error: ApiError::new(code, err.to_string(), None),
        }
    }
}

impl From<LedgerError> for HttpApiError {
    fn from(value: LedgerError) -> Self {
        Self::from_ledger(value)
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
