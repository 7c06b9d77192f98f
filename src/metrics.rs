use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::Path;

/// One-time metrics registration (so series show up in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "curator_candidates_total",
            "Candidates accepted from adapters after raw dedup."
        );
        describe_counter!(
            "curator_gate_pass_total",
            "Candidates still PASS after the gate and the chronology check."
        );
        describe_counter!(
            "curator_gate_reject_total",
            "Candidates rejected in Phase 1, labelled by code."
        );
        describe_counter!("curator_adapter_errors_total", "Source adapter failures.");
        describe_counter!(
            "curator_superseded_total",
            "PASS candidates superseded by a cluster representative."
        );
        describe_counter!("curator_selection_include_total", "Items included by the selector.");
        describe_counter!("curator_selection_cut_total", "PASS candidates cut by the selector.");
        describe_histogram!("curator_fetch_ms", "URL check time in milliseconds.");
        describe_histogram!("curator_adapter_parse_ms", "Adapter parse time in milliseconds.");
        describe_gauge!("curator_last_run_ts", "Unix ts of the last Phase 1 run.");
    });
}

/// Prometheus recorder for one-shot CLI runs; render and dump at the end.
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())
            .with_context(|| format!("writing metrics to {}", path.display()))
    }
}
