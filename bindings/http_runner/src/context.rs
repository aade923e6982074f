use gust_runner::prelude::UserValuesConstraint;
use http_client_instrumented::prelude::HttpClientInstrumented;
use std::collections::HashMap;
use std::fmt::Debug;

#[derive(Debug, Default)]
pub struct DefaultScenarioValues {
    pub values: HashMap<String, String>,
}

impl UserValuesConstraint for DefaultScenarioValues {}

/// HTTP-specific context values for the [gust_runner::prelude::VuContext].
#[derive(Default, Debug)]
pub struct HttpVuContext<SV: UserValuesConstraint = DefaultScenarioValues> {
    pub(crate) client: Option<HttpClientInstrumented>,
    pub scenario_values: SV,
}

impl<SV: UserValuesConstraint> UserValuesConstraint for HttpVuContext<SV> {}

impl<SV: UserValuesConstraint> HttpVuContext<SV> {
    /// Get the [HttpClientInstrumented] that was configured during VU setup.
    pub fn client(&self) -> anyhow::Result<&HttpClientInstrumented> {
        self.client.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "client is not set, did you forget to call `connect_http_client` in your vu_setup?"
            )
        })
    }

    /// Drop the client, closing its pooled connections.
    pub fn take_client(&mut self) -> Option<HttpClientInstrumented> {
        self.client.take()
    }
}
