//! One-shot billing cycle
//!
//! Meant to be scheduled by an external cron once a day. Runs generation,
//! notification and reconciliation for one date, logs the summary and a
//! statistics report, and exits non-zero if the run could not complete.
//!
//! ```bash
//! billing-cycle                       # bill for today in BILLING_TIMEZONE
//! billing-cycle --date 2024-01-10     # re-run a specific day
//! billing-cycle --stats-days 7
//! ```
//!
//! Ctrl+C stops the run at the next phase boundary.

use std::process::ExitCode;

use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info, warn};

use core_kernel::calendar;
use domain_billing::RunControl;
use interface_api::config::BillingAppConfig;
use interface_api::{bootstrap, telemetry};

#[derive(Debug, Parser)]
#[command(name = "billing-cycle", version, about = "Runs the daily billing cycle once")]
struct Args {
    /// Day to bill for (YYYY-MM-DD); defaults to today in the business timezone
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Window of the statistics report, in days
    #[arg(long, default_value_t = 30)]
    stats_days: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = BillingAppConfig::from_env()?;
    telemetry::init_tracing(&config.log_level, config.log_json);

    let state = bootstrap::connect(&config).await?;
    let date = args.date.unwrap_or_else(|| calendar::today_in(state.timezone));

    let control = RunControl::new();
    let abort = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current phase");
            abort.abort();
        }
    });

    let summary = match state.cycle.run_with(date, &control).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(%date, error = %e, "Billing run failed");
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        summary = %serde_json::to_string(&summary)?,
        processed = summary.total_processed(),
        failures = summary.total_failures(),
        "Billing run summary"
    );

    let billing = state.cycle.load_config().await?;
    match state
        .cycle
        .invoice_service(&billing)
        .statistics(date, args.stats_days, billing.currency)
        .await
    {
        Ok(report) => info!(report = %serde_json::to_string(&report)?, "Invoice statistics"),
        Err(e) => warn!(error = %e, "Statistics report unavailable"),
    }

    Ok(ExitCode::SUCCESS)
}
