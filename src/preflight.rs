//! ComfyUI reachability check before a production run.
//!
//! Responses are treated as opaque JSON; only the queue lengths and device
//! names are picked out for the operator.

use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComfyStatus {
    pub reachable: bool,
    pub devices: Vec<String>,
    pub queue_running: usize,
    pub queue_pending: usize,
    pub error: Option<String>,
}

impl ComfyStatus {
    /// Operator-facing warnings worth attaching to the run.
    pub fn warnings(&self, url: &str) -> Vec<String> {
        let mut out = Vec::new();
        if !self.reachable {
            out.push(format!(
                "ComfyUI not reachable at {url}: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ));
            return out;
        }
        if self.queue_running + self.queue_pending > 0 {
            out.push(format!(
                "ComfyUI queue busy ({} running, {} pending)",
                self.queue_running, self.queue_pending
            ));
        }
        out
    }

    /// One line for the log, e.g. `devices: cuda:0 RTX 3090; queue: 0 running, 1 pending`.
    pub fn describe(&self) -> String {
        let devices = if self.devices.is_empty() {
            "unknown".to_string()
        } else {
            self.devices.join(", ")
        };
        format!(
            "devices: {devices}; queue: {} running, {} pending",
            self.queue_running, self.queue_pending
        )
    }
}

fn client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(format!("director-runctl/{}", env!("CARGO_PKG_VERSION")))
        .build()
}

async fn get_json(client: &reqwest::Client, url: &str) -> reqwest::Result<Value> {
    client.get(url).send().await?.error_for_status()?.json().await
}

pub async fn check_comfyui(base_url: &str, timeout: Duration) -> ComfyStatus {
    let base = base_url.trim_end_matches('/');
    let client = match client(timeout) {
        Ok(c) => c,
        Err(e) => {
            return ComfyStatus {
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    };

    let stats = match get_json(&client, &format!("{base}/system_stats")).await {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(url = %base, error = %e, "ComfyUI system_stats failed");
            return ComfyStatus {
                error: Some(e.to_string()),
                ..Default::default()
            };
        }
    };
    let mut status = ComfyStatus {
        reachable: true,
        devices: parse_devices(&stats),
        ..Default::default()
    };
    match get_json(&client, &format!("{base}/queue")).await {
        Ok(queue) => {
            let (running, pending) = parse_queue(&queue);
            status.queue_running = running;
            status.queue_pending = pending;
        }
        Err(e) => tracing::debug!(url = %base, error = %e, "ComfyUI queue check failed"),
    }
    tracing::info!(url = %base, "ComfyUI reachable ({})", status.describe());
    status
}

fn parse_devices(stats: &Value) -> Vec<String> {
    stats
        .get("devices")
        .and_then(Value::as_array)
        .map(|devs| {
            devs.iter()
                .filter_map(|d| d.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_queue(queue: &Value) -> (usize, usize) {
    let len = |key: &str| {
        queue
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    };
    (len("queue_running"), len("queue_pending"))
}
