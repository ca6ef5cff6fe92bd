use openapi_trade::{Config, OrderSide, SubmitOrderOptions, Topic, TradeContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const WAIT_FOR_SUBSCRIPTION: Duration = Duration::from_secs(15);
const WAIT_FOR_PUSH: Duration = Duration::from_secs(30);

/// The account orders are placed under; missing or blank is a setup failure
fn require_account(value: Option<String>) -> Result<String, &'static str> {
    value
        .filter(|account| !account.trim().is_empty())
        .ok_or("TEST_ACCOUNT is not set")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "env-file")]
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::load(std::env::vars())?);
    let account_no = require_account(std::env::var("TEST_ACCOUNT").ok())?;

    let ctx = TradeContext::try_new(config).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.set_on_order_changed(move |order| {
        let _ = tx.send(order);
    });
    ctx.subscribe(&[Topic::Private])?;

    if !ctx.wait_confirmed(&[Topic::Private], WAIT_FOR_SUBSCRIPTION).await {
        ctx.stop().await;
        error!(
            state = %ctx.state(),
            "Private topic not confirmed within {:?}",
            WAIT_FOR_SUBSCRIPTION
        );
        return Err("push subscription was not confirmed".into());
    }

    let order = SubmitOrderOptions::market("700.HK", OrderSide::Buy, 100, account_no);
    let response = ctx.submit_order(&order).await?;
    info!(order_id = %response.order_id, "Waiting for order push");

    let matched = tokio::time::timeout(WAIT_FOR_PUSH, async {
        while let Some(event) = rx.recv().await {
            if event.order_id == response.order_id {
                return Some(event);
            }
        }
        None
    })
    .await;

    ctx.stop().await;

    match matched {
        Ok(Some(event)) => {
            info!(status = %event.status, "Received order changed push");
            println!("{:#?}", event);
            Ok(())
        }
        _ => {
            error!(order_id = %response.order_id, "No order changed push within {:?}", WAIT_FOR_PUSH);
            Err(format!("timed out waiting for push of order {}", response.order_id).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_account_is_a_setup_failure() {
        assert!(require_account(None).is_err());
        assert!(require_account(Some("  ".to_string())).is_err());
        assert_eq!(require_account(Some("HK-001".to_string())).unwrap(), "HK-001");
    }
}
