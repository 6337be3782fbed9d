use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::{TimeSeries, TsdbError, LATEST};
use crate::config::GraphiteConfig;

/// Graphite client: render API for reads, carbon plaintext for writes.
#[derive(Clone)]
pub struct GraphiteClient {
    http: reqwest::Client,
    render_url: String,
    carbon_addr: String,
    prefix: String,
    latest_window: String,
    timeout: Duration,
}

impl GraphiteClient {
    /// Create a new Graphite client.
    pub fn new(cfg: &GraphiteConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            render_url: cfg.render_url.clone(),
            carbon_addr: cfg.carbon_addr.clone(),
            prefix: cfg.prefix.trim_end_matches('.').to_string(),
            latest_window: cfg.latest_window.clone(),
            timeout,
        })
    }

    /// Render target summarising the latest values of `resource` on `entity`.
    fn target(&self, entity: &str, resource: &str) -> String {
        format!(
            "cactiStyle({}.nodes.{}.{})",
            self.prefix,
            sanitize_entity(entity),
            resource
        )
    }

    fn from_window<'a>(&'a self, window: &'a str) -> &'a str {
        if window == LATEST {
            &self.latest_window
        } else {
            window
        }
    }

    /// One carbon plaintext line: `<path> <value> <timestamp>\n`.
    fn carbon_line(&self, series: &str, value: f64, timestamp: i64) -> String {
        format!("{}.{} {} {}\n", self.prefix, series, value, timestamp)
    }
}

/// Graphite uses dots as path separators, so dotted host names are flattened.
fn sanitize_entity(entity: &str) -> String {
    entity.replace('.', "_")
}

impl TimeSeries for GraphiteClient {
    async fn metric_stats(
        &self,
        entity: &str,
        resource: &str,
        window: &str,
    ) -> Result<String, TsdbError> {
        let target = self.target(entity, resource);
        let from = self.from_window(window);
        debug!(%target, from, "graphite render");

        let resp = self
            .http
            .get(&self.render_url)
            .query(&[
                ("target", target.as_str()),
                ("from", from),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| TsdbError::Unavailable(format!("rendering {target}: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TsdbError::Unavailable(format!("reading render reply for {target}: {e}")))?;

        if !status.is_success() {
            return Err(TsdbError::Rejected {
                what: target,
                reason: format!("unexpected status {status}"),
            });
        }

        Ok(body)
    }

    async fn push_metric(&self, series: &str, value: f64) -> Result<(), TsdbError> {
        let line = self.carbon_line(series, value, chrono::Utc::now().timestamp());

        let send = async {
            let mut stream = TcpStream::connect(&self.carbon_addr).await?;
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await
        };

        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(())) => {
                debug!(series, value, "pushed metric to carbon");
                Ok(())
            }
            Ok(Err(e)) => Err(TsdbError::Unavailable(format!(
                "pushing {series} to {}: {e}",
                self.carbon_addr
            ))),
            Err(_) => Err(TsdbError::Unavailable(format!(
                "pushing {series} to {}: timed out after {:?}",
                self.carbon_addr, self.timeout
            ))),
        }
    }
}
