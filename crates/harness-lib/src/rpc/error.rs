use thiserror::Error;

pub const GRPC_CODE_UNKNOWN: i32 = 2;
pub const GRPC_CODE_INVALID_ARGUMENT: i32 = 3;
pub const GRPC_CODE_UNAVAILABLE: i32 = 14;

// The daemon reports a missing route with the generic status code, the message
// is the only thing that tells it apart.
const NO_ROUTE_MARKERS: [&str; 2] = [
    "unable to find a path to destination",
    "no path to destination",
];

/// A failed RPC call, keeping the gRPC status code of the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("code {code}: {message}")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GRPC_CODE_UNKNOWN, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(GRPC_CODE_INVALID_ARGUMENT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(GRPC_CODE_UNAVAILABLE, message)
    }

    /// Whether the route query failed only because no path to the destination exists.
    pub fn is_no_route(&self) -> bool {
        self.code == GRPC_CODE_UNKNOWN
            && NO_ROUTE_MARKERS
                .iter()
                .any(|marker| self.message.contains(marker))
    }
}
