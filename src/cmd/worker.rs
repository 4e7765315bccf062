//! Worker administration: `prepdesk worker`.

use anyhow::{Context, Result, anyhow};

use super::super::WorkerCommands;
use super::{load_config, prepare_db_path};
use crate::Cli;
use prepdesk::fulfillment::db::FulfillmentDb;
use prepdesk::fulfillment::engine::FulfillmentEngine;
use prepdesk::fulfillment::models::{AllocationPolicy, NewWorker, Worker, WorkerRole};
use prepdesk::fulfillment::server::build_engine;

fn open_engine(base_dir: &std::path::Path, cli: &Cli) -> Result<FulfillmentEngine> {
    let config = load_config(base_dir, cli)?;
    let db_path = prepare_db_path(base_dir, &config)?;
    let db = FulfillmentDb::new(&db_path).context("Failed to open fulfillment database")?;
    Ok(build_engine(&config.server_config(), db))
}

/// Build the allocation policy from the mutually exclusive CLI filters.
fn policy_from_flags(payment_methods: Option<&str>, status: Option<&str>) -> AllocationPolicy {
    match (payment_methods, status) {
        (Some(methods), _) => AllocationPolicy::FilteredByPaymentMethod {
            methods: methods
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
        },
        (None, Some(status)) => AllocationPolicy::FilteredBySpecificStatus {
            status: status.trim().to_string(),
        },
        (None, None) => AllocationPolicy::OldestUnfiltered,
    }
}

fn describe_policy(policy: &AllocationPolicy) -> String {
    match policy {
        AllocationPolicy::OldestUnfiltered => policy.kind().to_string(),
        AllocationPolicy::FilteredByPaymentMethod { methods } => {
            format!("{} [{}]", policy.kind(), methods.join(","))
        }
        AllocationPolicy::FilteredBySpecificStatus { status } => format!("{} [{}]", policy.kind(), status),
    }
}

fn print_worker(worker: &Worker) {
    println!(
        "{:>4}  {:<20} merchant={:<6} role={:<10} capacity={} {} policy={}",
        worker.id,
        worker.name,
        worker.merchant_id,
        worker.role,
        worker.capacity,
        if worker.active { "active" } else { "inactive" },
        describe_policy(&worker.policy)
    );
}

pub async fn cmd_worker(base_dir: &std::path::Path, cli: &Cli, command: WorkerCommands) -> Result<()> {
    let engine = open_engine(base_dir, cli)?;

    match command {
        WorkerCommands::Add {
            name,
            merchant,
            capacity,
            role,
            payment_methods,
            status,
        } => {
            let role: WorkerRole = role.trim().parse().map_err(|e: String| anyhow!(e))?;
            let worker = engine
                .create_worker(NewWorker {
                    name: name.trim().to_string(),
                    merchant_id: merchant,
                    role,
                    policy: policy_from_flags(payment_methods.as_deref(), status.as_deref()),
                    capacity,
                })
                .await?;
            println!("Created worker {} ({})", worker.id, worker.name);
        }
        WorkerCommands::List { merchant } => {
            let workers = engine.list_workers(merchant).await?;
            if workers.is_empty() {
                println!("No workers registered.");
            }
            for worker in &workers {
                print_worker(worker);
            }
        }
        WorkerCommands::Deactivate { id } => {
            let worker = engine.set_worker_active(id, false).await?;
            println!("Worker {} ({}) deactivated", worker.id, worker.name);
        }
        WorkerCommands::Activate { id } => {
            let worker = engine.set_worker_active(id, true).await?;
            println!("Worker {} ({}) activated", worker.id, worker.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_flags() {
        assert_eq!(policy_from_flags(None, None), AllocationPolicy::OldestUnfiltered);
        assert_eq!(
            policy_from_flags(Some("cod, bank_transfer,"), None),
            AllocationPolicy::FilteredByPaymentMethod {
                methods: vec!["cod".to_string(), "bank_transfer".to_string()]
            }
        );
        assert_eq!(
            policy_from_flags(None, Some(" payment_pending ")),
            AllocationPolicy::FilteredBySpecificStatus {
                status: "payment_pending".to_string()
            }
        );
    }
}
