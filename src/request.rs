//! Building and dispatching protocol requests.
use crate::error::{Error, RequestSnapshot, Result};
use crate::options::UploadOptions;
use crate::transport::{HttpRequest, HttpResponse, Method};

use url::Url;
use uuid::Uuid;

/// Build a request with the protocol version header, the user's extra
/// headers, and (when enabled) a fresh request id, applied in that order.
pub(crate) fn build_request(method: Method, url: &Url, options: &UploadOptions) -> HttpRequest {
    let mut request = HttpRequest::new(method, url.clone());
    let (name, value) = options.protocol.version_header();
    request.set_header(name, value);
    for (name, value) in &options.headers {
        request.set_header(name.clone(), value.clone());
    }
    if options.add_request_id {
        request.set_header("X-Request-ID", Uuid::new_v4().to_string());
    }
    request
}

/// Dispatch `request` through the transport, awaiting the before and after
/// hooks around the exchange. Hook failures wrap into transport errors so
/// retry predicates can classify them.
pub(crate) async fn send(options: &UploadOptions, mut request: HttpRequest) -> Result<HttpResponse> {
    if let Some(hook) = &options.callbacks.on_before_request {
        hook(&mut request)
            .await
            .map_err(|e| Error::transport(request.snapshot(), e))?;
    }
    tracing::trace!(request = ?request, "dispatching");
    let response = options.transport.send(request.clone()).await?;
    tracing::trace!(status = response.status(), "received response");
    if let Some(hook) = &options.callbacks.on_after_response {
        hook(&request, &response)
            .await
            .map_err(|e| Error::transport(request.snapshot(), e))?;
    }
    Ok(response)
}

/// Parse a required numeric response header, failing with a protocol error
/// when it is absent or malformed.
pub(crate) fn require_header_u64(
    request: &RequestSnapshot,
    response: &HttpResponse,
    name: &str,
) -> Result<u64> {
    let value = response.header(name).ok_or_else(|| {
        Error::protocol(
            format!("response is missing the {name} header"),
            request.clone(),
            Some(response.snapshot()),
        )
    })?;
    value.trim().parse().map_err(|_| {
        Error::protocol(
            format!("the {name} header is not a valid integer: {value:?}"),
            request.clone(),
            Some(response.snapshot()),
        )
    })
}
