mod request_id;

use crate::config::AppConfig;
use crate::protocol::ProviderKind;
use crate::transport::{HttpTransport, PreparedUpstream, PreparedUpstreams};

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    upstreams: PreparedUpstreams,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport, upstreams: PreparedUpstreams) -> Self {
        Self {
            config,
            transport,
            upstreams,
            request_ids: RequestIdGenerator::new(),
        }
    }

    #[must_use]
    pub fn upstream(&self, kind: ProviderKind) -> &PreparedUpstream {
        self.upstreams.get(kind)
    }

    pub(crate) fn next_request_id(&self) -> uuid::Uuid {
        self.request_ids.next_uuid()
    }
}
