use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

const REDEEM_TIMEOUT_SECS: u64 = 30;
const REDEEM_QUEUE_DEPTH: usize = 64;

/// Work item handed to the redemption worker after a win.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub condition_id: String,
    pub neg_risk: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemOutcome {
    pub status: String,
    #[serde(rename = "txHash", default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// On-chain redemption capability. The engine only needs this seam plus
/// async invocation; how the transaction gets on chain is someone else's
/// problem.
#[async_trait]
pub trait Redeemer: Send + Sync {
    async fn redeem(&self, condition_id: &str, neg_risk: bool) -> anyhow::Result<RedeemOutcome>;
}

/// Shells out to an external redeem command:
/// `<command> <condition_id> [--neg-risk]`, 30s timeout, JSON on stdout.
pub struct CommandRedeemer {
    command: String,
}

impl CommandRedeemer {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Redeemer for CommandRedeemer {
    async fn redeem(&self, condition_id: &str, neg_risk: bool) -> anyhow::Result<RedeemOutcome> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg(condition_id);
        if neg_risk {
            cmd.arg("--neg-risk");
        }
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(REDEEM_TIMEOUT_SECS),
            cmd.output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("redeem command timed out after {REDEEM_TIMEOUT_SECS}s"))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("redeem command failed ({}): {stderr}", output.status);
        }

        // Structured output preferred, raw stdout accepted.
        Ok(serde_json::from_str(stdout.trim()).unwrap_or(RedeemOutcome {
            status: "SUBMITTED".into(),
            tx_hash: None,
            message: stdout.trim().to_string(),
        }))
    }
}

/// Dry-run redeemer: nothing on chain to claim.
pub struct NullRedeemer;

#[async_trait]
impl Redeemer for NullRedeemer {
    async fn redeem(&self, condition_id: &str, _neg_risk: bool) -> anyhow::Result<RedeemOutcome> {
        info!("Dry-run redeem skipped for {condition_id}");
        Ok(RedeemOutcome {
            status: "SKIPPED".into(),
            tx_hash: None,
            message: "dry-run".into(),
        })
    }
}

/// Single-consumer redemption worker. Failures are logged and dropped: the
/// balance will reflect whatever actually arrives via the on-chain sync.
pub fn spawn_redeem_worker(
    redeemer: std::sync::Arc<dyn Redeemer>,
    shutdown_tx: &broadcast::Sender<()>,
) -> mpsc::Sender<RedeemRequest> {
    let (tx, mut rx) = mpsc::channel::<RedeemRequest>(REDEEM_QUEUE_DEPTH);
    let mut shutdown = shutdown_tx.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    match redeemer.redeem(&request.condition_id, request.neg_risk).await {
                        Ok(outcome) => info!(
                            "Redeem {}: {} {}",
                            request.condition_id,
                            outcome.status,
                            outcome.tx_hash.as_deref().unwrap_or("-")
                        ),
                        Err(e) => error!("Redeem {} failed: {e}", request.condition_id),
                    }
                }
                _ = shutdown.recv() => {
                    warn!("Redeem worker shutdown");
                    break;
                }
            }
        }
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_redeemer_reports_skipped() {
        let outcome = NullRedeemer.redeem("0xcond", true).await.unwrap();
        assert_eq!(outcome.status, "SKIPPED");
        assert!(outcome.tx_hash.is_none());
    }

    #[test]
    fn outcome_parses_structured_stdout() {
        let parsed: RedeemOutcome = serde_json::from_str(
            "{\"status\":\"CONFIRMED\",\"txHash\":\"0xabc\",\"message\":\"ok\"}",
        )
        .unwrap();
        assert_eq!(parsed.status, "CONFIRMED");
        assert_eq!(parsed.tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn worker_consumes_queue() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let tx = spawn_redeem_worker(std::sync::Arc::new(NullRedeemer), &shutdown_tx);
        tx.send(RedeemRequest {
            condition_id: "0x1".into(),
            neg_risk: true,
        })
        .await
        .unwrap();
        // Queue drains without error; shutdown stops the worker.
        let _ = shutdown_tx.send(());
    }
}
