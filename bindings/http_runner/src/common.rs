use crate::context::HttpVuContext;
use crate::runner_context::HttpRunnerContext;
use anyhow::Context;
use gust_runner::prelude::{GustResult, HookResult, UserValuesConstraint, VuContext};
use http_client_instrumented::prelude::{
    HttpClientInstrumented, HttpResponse, DEFAULT_REQUEST_TIMEOUT,
};

/// Creates an instrumented HTTP client for the current VU, pointed at the configured target URL.
///
/// Call this function as follows:
/// ```rust
/// use http_gust_runner::prelude::{connect_http_client, HookResult, HttpRunnerContext, HttpVuContext, VuContext};
///
/// fn vu_setup(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
///     connect_http_client(ctx)?;
///     Ok(())
/// }
/// ```
pub fn connect_http_client<SV: UserValuesConstraint>(
    ctx: &mut VuContext<HttpRunnerContext, HttpVuContext<SV>>,
) -> HookResult {
    let base_url = ctx
        .runner_context()
        .target_url()
        .cloned()
        .context("No target URL configured, pass --target-url or set target_url in the profile")?;
    let timeout = ctx
        .runner_context()
        .get()
        .request_timeout
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let reporter = ctx.runner_context().reporter();

    log::debug!("VU {} sending requests to {}", ctx.vu_id(), base_url);
    let client = HttpClientInstrumented::with_timeout(base_url, reporter, timeout)?;
    ctx.get_mut().client = Some(client);

    Ok(())
}

/// `GET` a path on the target, blocking the VU until the response has been read.
///
/// A failed request is returned as a response with status `0` rather than an error, so the
/// iteration carries on. The only error is a shutdown signal, which ends the iteration.
pub fn http_get<SV: UserValuesConstraint>(
    ctx: &mut VuContext<HttpRunnerContext, HttpVuContext<SV>>,
    path: &str,
) -> GustResult<HttpResponse> {
    let client = ctx.get().client()?.clone();
    ctx.runner_context()
        .executor()
        .execute_in_place(async move { Ok(client.get(path).await) })
}

/// Like [http_get], but tags the samples with `name`, for paths which contain ids.
///
/// ```rust
/// use http_gust_runner::prelude::{http_get_named, HookResult, HttpRunnerContext, HttpVuContext, VuContext};
///
/// fn scenario(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
///     let id = 42;
///     http_get_named(ctx, &format!("/api/produk/{id}"), "/api/produk/{id}")?;
///     Ok(())
/// }
/// ```
pub fn http_get_named<SV: UserValuesConstraint>(
    ctx: &mut VuContext<HttpRunnerContext, HttpVuContext<SV>>,
    path: &str,
    name: &str,
) -> GustResult<HttpResponse> {
    let client = ctx.get().client()?.clone();
    ctx.runner_context()
        .executor()
        .execute_in_place(async move { Ok(client.get_named(path, name).await) })
}
