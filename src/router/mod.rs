//! The route table and the dispatcher that runs every API request.

mod context;
mod dispatcher;
mod route;

use axum::response::Response;
use serde_json::Value;

pub use context::RequestContext;
pub use dispatcher::{Dispatcher, MAX_BODY_BYTES, dispatch};
pub use route::{Route, RouteSummary, RouteTable};

use crate::api_response::ApiResponse;

/// What a handler hands back to the dispatcher.
#[derive(Debug)]
pub enum Reply {
    /// A fully built envelope, e.g. a 201 with a message.
    Envelope(ApiResponse),
    /// Plain data, sent as a 200 success envelope.
    Data(Value),
    /// A finished response sent as-is, without envelope or debug block.
    File(Response),
}

impl From<ApiResponse> for Reply {
    fn from(response: ApiResponse) -> Self {
        Reply::Envelope(response)
    }
}

impl From<Value> for Reply {
    fn from(data: Value) -> Self {
        Reply::Data(data)
    }
}
