//! Best-effort endpoint lookup for the services an operation declares.
//! Nothing here can fail the request; problems surface as warning events.

use std::sync::Arc;

use keel_core::{ClientFactory, Endpoint, KeelError, OperationDescriptor, OperationRequest, ProgressEvent};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::Emitter;
use crate::fanout::fan_out;

type Lookup = (String, Result<Endpoint, KeelError>);

/// Trimmed, non-empty service names in declaration order.
pub fn declared_services(op: &OperationDescriptor) -> Vec<String> {
    op.services.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

/// Resolve endpoints on every target, fold successes into `event`'s summary and
/// details, emit warnings for failures, then emit `event` as the final info
/// record.
pub(crate) async fn report_endpoints(
    factory: Arc<dyn ClientFactory>,
    emitter: &Emitter,
    cancel: &CancellationToken,
    req: &OperationRequest,
    op: &OperationDescriptor,
    mut event: ProgressEvent,
) {
    let services = Arc::new(if req.is_delete { Vec::new() } else { declared_services(op) });
    let namespace = Arc::new(req.namespace.clone());
    let token = cancel.clone();

    let outcomes = fan_out(factory, &req.targets, move |_idx, client| {
        let services = services.clone();
        let namespace = namespace.clone();
        let token = token.clone();
        async move {
            let mut found: Vec<Lookup> = Vec::with_capacity(services.len());
            for svc in services.iter() {
                info!(service = %svc, "retrieving service endpoint");
                let res = client
                    .service_endpoint(&token, svc, &namespace)
                    .await
                    .map_err(|e| KeelError::EndpointResolution { service: svc.clone(), reason: format!("{:#}", e) });
                found.push((svc.clone(), res));
            }
            Ok(found)
        }
    })
    .await;

    for outcome in outcomes {
        let lookups = match outcome.result {
            Ok(l) => l,
            Err(e) => {
                warn!(cluster = outcome.target, error = %e, "endpoint phase: target unavailable");
                emitter.fail(event.clone(), format!("Unable to connect to target #{}.", outcome.target), &e);
                continue;
            }
        };
        for (svc, res) in lookups {
            match res {
                Ok(ep) => {
                    let msg = format!("{} Service endpoints for service {}: {}", event.summary, svc, ep.describe());
                    info!(cluster = outcome.target, service = %svc, "{}", msg);
                    event.summary = msg.clone();
                    event.details = msg;
                }
                Err(e) => {
                    warn!(cluster = outcome.target, service = %svc, error = %e, "endpoint lookup failed");
                    emitter.fail(event.clone(), format!("Unable to retrieve service endpoint for the service {}.", svc), &e);
                }
            }
        }
    }

    emitter.info(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::OperationCategory;

    #[test]
    fn blank_services_are_skipped() {
        let op = OperationDescriptor {
            name: "x".into(),
            description: "X".into(),
            category: OperationCategory::Manifest,
            additional_properties: Default::default(),
            services: vec![" consul-ui ".into(), "".into(), "   ".into(), "httpbin".into()],
            templates: vec![],
        };
        assert_eq!(declared_services(&op), vec!["consul-ui", "httpbin"]);
    }
}
