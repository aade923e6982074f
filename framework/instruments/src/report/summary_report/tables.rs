use tabled::Tabled;

#[derive(Tabled)]
pub struct MetricRow {
    pub metric: String,
    pub kind: String,
    pub count: u64,
    pub avg: String,
    pub min: String,
    pub med: String,
    pub max: String,
    #[tabled(rename = "p(90)")]
    pub p90: String,
    #[tabled(rename = "p(95)")]
    pub p95: String,
    #[tabled(rename = "p(99)")]
    pub p99: String,
    pub rate: String,
}

#[derive(Tabled)]
pub struct CheckRow {
    pub check: String,
    pub passes: u64,
    pub fails: u64,
    pub rate: String,
}

#[derive(Tabled)]
pub struct ThresholdRow {
    pub metric: String,
    pub threshold: String,
    pub observed: String,
    pub result: String,
}

pub fn float2(n: Option<f64>) -> String {
    n.map(|n| format!("{:.2}", n))
        .unwrap_or_else(|| "-".to_string())
}

pub fn percent(n: Option<f64>) -> String {
    n.map(|n| format!("{:.2}%", n * 100.0))
        .unwrap_or_else(|| "-".to_string())
}
