use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use opentelemetry::{
    global::{self, BoxedSpan},
    trace::{Span as _, SpanKind, Status, Tracer},
    KeyValue,
};
use std::time::Instant;
use tracing::{field, info, info_span, warn, Instrument};

/// Opens an `http_request` log span (with a v7 request id) and a matching
/// OpenTelemetry server span for every routed request.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |path| path.as_str().to_owned());
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let mut otel = server_span(&method, &route, request.uri().path(), user_agent);
    let log_span = info_span!(
        "http_request",
        method = %method,
        route = %route,
        request_id = %uuid::Uuid::now_v7(),
        status = field::Empty,
    );

    let started = Instant::now();
    let response = next.run(request).instrument(log_span.clone()).await;
    let elapsed_ms = started.elapsed().as_millis() as i64;
    let status = response.status();

    log_span.record("status", status.as_u16());
    log_span.in_scope(|| {
        if status.is_server_error() {
            warn!(elapsed_ms, "request failed");
        } else {
            info!(elapsed_ms, "request finished");
        }
    });

    otel.set_attribute(KeyValue::new("http.response.status_code", status.as_u16() as i64));
    otel.set_attribute(KeyValue::new("http.server.duration_ms", elapsed_ms));
    otel.set_status(if status.is_server_error() {
        Status::error(format!("HTTP {}", status.as_u16()))
    } else {
        Status::Ok
    });
    otel.end();

    response
}

fn server_span(method: &str, route: &str, path: &str, user_agent: Option<String>) -> BoxedSpan {
    let tracer = global::tracer("learning-engine-http");
    let mut attributes = vec![
        KeyValue::new("http.request.method", method.to_owned()),
        KeyValue::new("http.route", route.to_owned()),
        KeyValue::new("url.path", path.to_owned()),
    ];
    if let Some(agent) = user_agent {
        attributes.push(KeyValue::new("user_agent.original", agent));
    }

    tracer
        .span_builder(format!("{} {}", method, route))
        .with_kind(SpanKind::Server)
        .with_attributes(attributes)
        .start(&tracer)
}
