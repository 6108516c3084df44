//! Simulation harness: drives a `DispatchService` with echo workers and a mix
//! of completing, failing, async, hanging, and cancelled operations, then
//! prints how each one ended.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use clap::Parser;
use dashmap::DashSet;
use opdispatch_core::ExecutionId;
use opdispatch_server::client::{OperationStubBuilder, ScheduleOptions};
use opdispatch_server::history::InMemoryHistory;
use opdispatch_server::service::{DispatchConfig, DispatchError, DispatchService, PolledTask};
use opdispatch_server::traits::HistoryStore;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const ENDPOINT: &str = "sim-endpoint";
const NAMESPACE: &str = "default";
const TASK_QUEUE: &str = "sim-task-queue";
const SERVICE: &str = "sim-service";

/// Methods scheduled round-robin. Five in ten operations echo.
const METHODS: [&str; 10] = [
    "echo", "echo", "echo", "echo", "echo", "fail", "async", "hang", "cancelable", "echo",
];

#[derive(Parser, Debug)]
#[command(author, version, about = "Operation dispatch simulation", long_about = None)]
struct Args {
    /// Number of concurrent polling workers.
    #[arg(long, env = "OPDISPATCH_SIM_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Number of operations to schedule.
    #[arg(long, env = "OPDISPATCH_SIM_OPERATIONS", default_value_t = 200)]
    operations: usize,

    /// Schedule-to-close timeout for operations no worker answers.
    #[arg(long, env = "OPDISPATCH_SIM_HANG_TIMEOUT_MS", default_value_t = 250)]
    hang_timeout_ms: u64,

    /// Delay before cancelling a cancelable operation.
    #[arg(long, env = "OPDISPATCH_SIM_CANCEL_AFTER_MS", default_value_t = 20)]
    cancel_after_ms: u64,

    /// Long-poll wait used by workers.
    #[arg(long, env = "OPDISPATCH_POLL_WAIT_MS", default_value_t = 500)]
    poll_wait_ms: u64,

    /// Interval between sweeps of closed operations.
    #[arg(long, env = "OPDISPATCH_SWEEP_INTERVAL_MS", default_value_t = 1_000)]
    sweep_interval_ms: u64,

    /// Concurrent schedule calls allowed through the stub.
    #[arg(long, env = "OPDISPATCH_MAX_IN_FLIGHT", default_value_t = 1_000)]
    max_in_flight: u32,

    /// How long to wait for every operation to reach a terminal state.
    #[arg(long, env = "OPDISPATCH_SIM_SETTLE_SECS", default_value_t = 30)]
    settle_secs: u64,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let config = DispatchConfig {
        default_poll_wait: Duration::from_millis(args.poll_wait_ms),
        sweep_interval_ms: args.sweep_interval_ms,
        max_in_flight_schedules: args.max_in_flight,
        ..DispatchConfig::default()
    };
    let history = Arc::new(InMemoryHistory::new());
    let dispatch = Arc::new(DispatchService::new(config, history.clone()));
    dispatch.register_endpoint(ENDPOINT, NAMESPACE, TASK_QUEUE);

    let stub = OperationStubBuilder::new(ENDPOINT, SERVICE)
        .default_options(ScheduleOptions::with_timeout(Duration::from_secs(args.settle_secs)))
        .method("echo")
        .method("fail")
        .method("async")
        .method_with_options(
            "hang",
            ScheduleOptions::with_timeout(Duration::from_millis(args.hang_timeout_ms)),
        )
        .method("cancelable")
        .max_in_flight(dispatch.config().max_in_flight_schedules)
        .build(Arc::clone(&dispatch));

    // Payloads of operations whose cancellation was accepted. Stands in for
    // the cancel notification a real worker would receive.
    let cancellations: Arc<DashSet<Bytes>> = Arc::new(DashSet::new());

    let workers: Vec<_> = (0..args.workers)
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                Arc::clone(&dispatch),
                Arc::clone(&cancellations),
            ))
        })
        .collect();
    info!(workers = args.workers, operations = args.operations, "simulation started");

    let mut executions = Vec::with_capacity(args.operations);
    for i in 0..args.operations {
        let method = METHODS[i % METHODS.len()];
        let execution = ExecutionId::new(NAMESPACE, format!("sim-{i}"), Uuid::new_v4().to_string());
        let payload = Bytes::from(format!("payload-{i}"));
        let token = stub
            .call(execution.clone(), method, payload.clone())
            .await
            .with_context(|| format!("scheduling {method} #{i}"))?;

        if method == "cancelable" {
            let dispatch = Arc::clone(&dispatch);
            let cancellations = Arc::clone(&cancellations);
            let delay = Duration::from_millis(args.cancel_after_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match dispatch.request_cancel(&token.execution_id, token.scheduled_event_id) {
                    Ok(()) => {
                        cancellations.insert(payload);
                    }
                    Err(err) => warn!(error = %err, "cancel request rejected"),
                }
            });
        }
        executions.push(execution);
    }

    let settle = Duration::from_secs(args.settle_secs);
    let mut unsettled = 0usize;
    for execution in &executions {
        let settled = history
            .wait_for(execution, settle, |events| {
                events.iter().any(|event| event.event_type().is_terminal())
            })
            .await;
        if !settled {
            warn!(execution = %execution, "operation did not settle");
            unsettled += 1;
        }
    }

    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    for execution in &executions {
        for event in history.events(execution) {
            if event.event_type().is_terminal() {
                *outcomes.entry(event.event_type().as_str()).or_default() += 1;
            }
        }
    }

    let drained = dispatch.shutdown(Duration::from_secs(5)).await;
    let mut handled = 0usize;
    for worker in workers {
        handled += worker.await.context("worker task panicked")?;
    }

    println!("operations scheduled: {}", executions.len());
    println!("tasks handled by workers: {handled}");
    for (outcome, count) in &outcomes {
        println!("  {outcome:<28} {count}");
    }
    println!("drained cleanly: {drained}");

    if unsettled > 0 {
        anyhow::bail!("{unsettled} operations did not reach a terminal state");
    }
    Ok(())
}

/// Long-polls until shutdown, answering each task by its operation name.
async fn run_worker(
    id: usize,
    dispatch: Arc<DispatchService>,
    cancellations: Arc<DashSet<Bytes>>,
) -> usize {
    let mut shutdown = dispatch.shutdown_receiver();
    let mut handled = 0;
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        match dispatch.poll_task(NAMESPACE, TASK_QUEUE, None).await {
            Ok(Some(task)) => {
                handled += 1;
                let operation = task.operation.clone();
                if let Err(err) = handle(&dispatch, &cancellations, task).await {
                    warn!(worker = id, operation = %operation, error = %err, "response rejected");
                }
            }
            Ok(None) => debug!(worker = id, "poll returned empty"),
            Err(err) => {
                warn!(worker = id, error = %err, "poll failed");
                break;
            }
        }
    }
    handled
}

async fn handle(
    dispatch: &DispatchService,
    cancellations: &DashSet<Bytes>,
    task: PolledTask,
) -> Result<(), DispatchError> {
    let token = &task.task_token;
    match task.operation.as_str() {
        "echo" => dispatch.respond_completed(token, task.input.clone()),
        "fail" => dispatch.respond_failed(token, "BAD_REQUEST", "deliberate error"),
        "async" => {
            dispatch.respond_started(token)?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            dispatch.respond_completed(token, task.input.clone())
        }
        // Left unanswered so the deadline fires.
        "hang" => Ok(()),
        "cancelable" => {
            dispatch.respond_started(token)?;
            for _ in 0..500 {
                if cancellations.remove(&task.input).is_some() {
                    return dispatch.respond_canceled(token);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            dispatch.respond_completed(token, task.input.clone())
        }
        other => dispatch.respond_failed(
            token,
            "UNKNOWN_OPERATION",
            format!("no handler for {other}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use opdispatch_core::EventType;
    use opdispatch_server::service::ScheduleRequest;

    use super::*;

    #[tokio::test]
    async fn cancelable_worker_honors_accepted_cancellation() {
        let history = Arc::new(InMemoryHistory::new());
        let dispatch = Arc::new(DispatchService::new(DispatchConfig::default(), history.clone()));
        dispatch.register_endpoint(ENDPOINT, NAMESPACE, TASK_QUEUE);

        let execution = ExecutionId::new(NAMESPACE, "sim-test", "run");
        let request =
            ScheduleRequest::new(execution.clone(), ENDPOINT, SERVICE, "cancelable", "payload-0");
        let token = dispatch.schedule(request).unwrap();
        let task = dispatch
            .poll_task(NAMESPACE, TASK_QUEUE, Some(Duration::ZERO))
            .await
            .unwrap()
            .unwrap();

        let cancellations = Arc::new(DashSet::new());
        let worker = {
            let dispatch = Arc::clone(&dispatch);
            let cancellations = Arc::clone(&cancellations);
            tokio::spawn(async move { handle(&dispatch, &cancellations, task).await })
        };

        dispatch
            .request_cancel(&token.execution_id, token.scheduled_event_id)
            .unwrap();
        cancellations.insert(Bytes::from_static(b"payload-0"));

        worker.await.unwrap().unwrap();
        let terminal: Vec<_> = history
            .events(&execution)
            .iter()
            .map(|event| event.event_type())
            .filter(|event_type| event_type.is_terminal())
            .collect();
        assert_eq!(terminal, vec![EventType::OperationCanceled]);
    }
}
