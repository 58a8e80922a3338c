//! gRPC transport layer for contactlink.
//!
//! The transport carries the caller's JSON request body as bytes and returns
//! the JSON response envelope, so the payload shape is identical to the HTTP
//! form of the service.

use std::sync::Arc;

use serde::Serialize;
use tonic::{Request, Response, Status};

use crate::error::IdentityError;
use crate::resolver::IdentityResolver;
use crate::signal::IdentifyRequest;

pub mod proto {
    #![allow(missing_docs, clippy::pedantic)]
    tonic::include_proto!("contactlink");
}

use proto::contact_link_service_server::{ContactLinkService, ContactLinkServiceServer};

/// Maximum size of a request JSON payload.
const MAX_REQUEST_JSON_BYTES: usize = 16 * 1024; // 16 KiB

/// Maximum size of a response JSON payload.
const MAX_RESPONSE_JSON_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

/// gRPC service implementation.
pub struct ContactLinkServiceImpl {
    resolver: Arc<IdentityResolver>,
}

impl ContactLinkServiceImpl {
    #[must_use]
    pub fn new(resolver: Arc<IdentityResolver>) -> Self {
        Self { resolver }
    }

    #[must_use]
    pub fn into_server(self) -> ContactLinkServiceServer<Self> {
        ContactLinkServiceServer::new(self)
    }
}

fn parse_request(bytes: &[u8]) -> Result<IdentifyRequest, Status> {
    if bytes.is_empty() {
        return Err(Status::invalid_argument("request_json is required"));
    }
    if bytes.len() > MAX_REQUEST_JSON_BYTES {
        return Err(Status::invalid_argument("request_json exceeds maximum size"));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| Status::invalid_argument(format!("invalid request JSON: {e}")))
}

fn encode_json<T: Serialize>(value: &T, max: usize) -> Result<Vec<u8>, Status> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| Status::internal(format!("failed to serialize response JSON: {e}")))?;
    if bytes.len() > max {
        return Err(Status::resource_exhausted("serialized JSON exceeds size limit"));
    }
    Ok(bytes)
}

fn status_from_identity_error(err: IdentityError) -> Status {
    match err {
        IdentityError::InvalidRequest(v) => Status::invalid_argument(v.to_string()),
        IdentityError::StoreUnavailable(s) => Status::unavailable(s.to_string()),
        IdentityError::Internal { message } => Status::internal(message),
    }
}

#[tonic::async_trait]
impl ContactLinkService for ContactLinkServiceImpl {
    async fn identify(
        &self,
        request: Request<proto::IdentifyRequest>,
    ) -> Result<Response<proto::IdentifyResponse>, Status> {
        let req = parse_request(&request.into_inner().request_json)?;

        // Store calls are synchronous; keep them off the async workers.
        let resolver = Arc::clone(&self.resolver);
        let resp = tokio::task::spawn_blocking(move || resolver.identify(req))
            .await
            .map_err(|e| Status::internal(format!("resolve task failed: {e}")))?
            .map_err(|e| {
                tracing::warn!(error = %e, "identify failed");
                status_from_identity_error(e)
            })?;

        let response_json = encode_json(&resp, MAX_RESPONSE_JSON_BYTES)?;
        Ok(Response::new(proto::IdentifyResponse { response_json }))
    }
}
