//! gRPC interceptors and metadata helpers.

use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::{Request, Status};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// A text map extractor for gRPC metadata.
struct MetadataExtractor<'a>(&'a tonic::metadata::MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|k| match k {
                tonic::metadata::KeyRef::Ascii(key) => Some(key.as_str()),
                tonic::metadata::KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

/// Interceptor that parents the current span on the caller's W3C trace context
/// and records the caller's request ID.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    let propagator = TraceContextPropagator::new();
    let context = propagator.extract(&MetadataExtractor(request.metadata()));
    Span::current().set_parent(context);

    if let Some(traceparent) = metadata_str(&request, TRACEPARENT_KEY) {
        tracing::debug!(traceparent = %traceparent, "gRPC request with trace context");
    }

    if let Some(request_id) = metadata_str(&request, REQUEST_ID_KEY) {
        Span::current().record("request_id", request_id);
    }

    Ok(request)
}

/// Read an ASCII metadata value, ignoring blank values.
pub fn metadata_str<'a, T>(request: &'a Request<T>, key: &str) -> Option<&'a str> {
    request
        .metadata()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Extract request ID from incoming gRPC request metadata.
pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    metadata_str(request, REQUEST_ID_KEY).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataMap;

    #[test]
    fn test_metadata_extractor_get() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
                .parse()
                .unwrap(),
        );

        let extractor = MetadataExtractor(&metadata);
        assert_eq!(
            extractor.get("traceparent"),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
        );
        assert_eq!(extractor.get("tracestate"), None);
        assert_eq!(extractor.keys(), vec!["traceparent"]);
    }

    #[test]
    fn test_interceptor_passes_through() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, "req-42".parse().unwrap());
        let request = trace_context_interceptor(request).unwrap();
        assert_eq!(extract_request_id(&request), Some("req-42".to_string()));
    }

    #[test]
    fn test_blank_metadata_is_ignored() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("x-real-ip", "   ".parse().unwrap());
        assert_eq!(metadata_str(&request, "x-real-ip"), None);
    }
}
