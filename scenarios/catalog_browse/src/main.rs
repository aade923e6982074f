use http_gust_runner::prelude::*;
use serde::Deserialize;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ProductPage {
    data: Vec<Product>,
}

#[derive(Debug, Deserialize)]
struct Product {
    id: u64,
}

fn vu_setup(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    connect_http_client(ctx)?;
    Ok(())
}

fn browse_catalog(ctx: &mut VuContext<HttpRunnerContext, HttpVuContext>) -> HookResult {
    let products = http_get(ctx, "/api/produk")?;
    ctx.check("list status is 200", products.status() == 200);
    ctx.check(
        "list responds within 500ms",
        products.duration() < Duration::from_millis(500),
    );
    ctx.pause(Duration::from_secs(1))?;

    let first_id = if products.status() == 200 {
        products
            .json::<ProductPage>()
            .ok()
            .and_then(|page| page.data.first().map(|product| product.id))
    } else {
        None
    };
    let id = first_id.unwrap_or(1);
    let detail = http_get_named(ctx, &format!("/api/produk/{id}"), "/api/produk/{id}")?;
    ctx.check("detail status is 200", detail.status() == 200);
    ctx.check(
        "detail responds within 300ms",
        detail.duration() < Duration::from_millis(300),
    );
    ctx.pause(Duration::from_secs(1))?;

    let categories = http_get(ctx, "/api/categories")?;
    ctx.check("categories status is 200", categories.status() == 200);
    ctx.check(
        "categories respond within 300ms",
        categories.duration() < Duration::from_millis(300),
    );
    ctx.pause(Duration::from_secs(2))
}

/// Default stages and thresholds of the catalog browse load test, with its hooks.
fn catalog_browse(
    builder: ScenarioDefinitionBuilder<HttpRunnerContext, HttpVuContext>,
) -> ScenarioDefinitionBuilder<HttpRunnerContext, HttpVuContext> {
    builder
        .with_default_stages(&[
            (Duration::from_secs(30), 20),
            (Duration::from_secs(90), 50),
            (Duration::from_secs(30), 0),
        ])
        .with_default_thresholds("http_req_duration", &["p(95)<500", "p(99)<1000"])
        .with_default_thresholds("http_req_failed", &["rate<0.1"])
        .add_capture_env("CATALOG_API_VERSION")
        .use_vu_setup(vu_setup)
        .use_scenario(browse_catalog)
}

fn main() -> anyhow::Result<ExitCode> {
    let builder = catalog_browse(ScenarioDefinitionBuilder::new_with_init(env!(
        "CARGO_PKG_NAME"
    ))?);

    let outcome = run(builder)?;
    log::info!("Run {} finished after {} iterations", outcome.run_id, outcome.iterations);

    Ok(outcome.exit_code())
}
