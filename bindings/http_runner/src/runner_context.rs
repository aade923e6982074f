use gust_runner::prelude::UserValuesConstraint;
use std::time::Duration;

/// HTTP-specific context values for the [gust_runner::prelude::RunnerContext].
#[derive(Default, Debug)]
pub struct HttpRunnerContext {
    /// Overrides the request timeout of every VU's client. Set this in the global setup hook.
    pub request_timeout: Option<Duration>,
}

impl UserValuesConstraint for HttpRunnerContext {}
