//! A1: the OTLP gRPC ingestion server. Decodes `ExportTraceServiceRequest`
//! batches into [`Span`] values and forwards them on the channel the
//! assembler reads from.

use std::net::SocketAddr;

use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
    trace_service_server::{TraceService, TraceServiceServer},
};
use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueKind;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::model::Span;

const SERVICE_NAME_KEY: &str = "service.name";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to bind OTLP server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: tonic::transport::Error,
    },
}

fn extract_service_name(resource_spans: &ResourceSpans) -> String {
    resource_spans
        .resource
        .as_ref()
        .and_then(|resource| {
            resource
                .attributes
                .iter()
                .find(|kv| kv.key == SERVICE_NAME_KEY)
        })
        .and_then(|kv| kv.value.as_ref())
        .and_then(|value| match &value.value {
            Some(AnyValueKind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

struct TraceReceiver {
    spans: mpsc::Sender<Span>,
}

#[tonic::async_trait]
impl TraceService for TraceReceiver {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();

        for resource_spans in &req.resource_spans {
            let service_name = extract_service_name(resource_spans);

            for scope_spans in &resource_spans.scope_spans {
                for span in &scope_spans.spans {
                    let decoded = Span {
                        trace_id: hex::encode(&span.trace_id),
                        span_id: hex::encode(&span.span_id),
                        parent_span_id: hex::encode(&span.parent_span_id),
                        service_name: service_name.clone(),
                        start_time: span.start_time_unix_nano,
                        duration: span
                            .end_time_unix_nano
                            .saturating_sub(span.start_time_unix_nano),
                    };

                    // Unbounded-order channel: a full buffer blocks this RPC,
                    // applying backpressure straight to the collector.
                    if self.spans.send(decoded).await.is_err() {
                        return Err(Status::unavailable("trace assembler shut down"));
                    }
                }
            }
        }

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: Some(ExportTracePartialSuccess {
                rejected_spans: 0,
                error_message: String::new(),
            }),
        }))
    }
}

/// Serves the OTLP `TraceService` until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    spans: mpsc::Sender<Span>,
    cancel: CancellationToken,
) -> Result<(), IngestError> {
    info!("OTLP ingestion listening on {addr}");
    let receiver = TraceReceiver { spans };

    Server::builder()
        .add_service(TraceServiceServer::new(receiver))
        .serve_with_shutdown(addr, cancel.cancelled())
        .await
        .map_err(|source| IngestError::Bind { addr, source })
}
