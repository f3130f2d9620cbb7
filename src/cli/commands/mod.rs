use crate::bundling::{CarrierError, OperationResult, Outcome, RepositoryHandle};
use crate::config::CarrierConfig;
use crate::external::GitEngine;
use crate::telemetry::create_operation_span;
use anyhow::{Context as _, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

pub mod branches;
pub mod config;
pub mod log;
pub mod pack;
pub mod range;
pub mod unpack;
pub mod verify;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, ctx: &Context) -> Result<()>;
}

/// Everything one CLI invocation shares between its steps.
#[derive(Clone)]
pub struct Context {
    pub engine: Arc<dyn GitEngine>,
    pub repo_path: PathBuf,
    pub config: CarrierConfig,
    pub json: bool,
    pub correlation_id: String,
}

impl Context {
    /// Run a blocking engine call on tokio's blocking pool.
    pub async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn GitEngine) -> Result<T, CarrierError> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let span = create_operation_span(
            operation,
            self.repo_path.to_str(),
            Some(&self.correlation_id),
        );
        let result = tokio::task::spawn_blocking(move || span.in_scope(|| f(engine.as_ref())))
            .await
            .with_context(|| format!("{operation} worker task failed"))?;
        Ok(result?)
    }

    /// Like [`Context::run`], after opening the repository given by `--repo`.
    pub async fn run_in_repo<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn GitEngine, &RepositoryHandle) -> Result<T, CarrierError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.repo_path.clone();
        self.run(operation, move |engine| {
            let repo = engine.open_repository(&path)?;
            f(engine, &repo)
        })
        .await
    }

    /// JSON record with `--json`, otherwise the human rendering.
    pub fn emit<T: Outcome>(&self, outcome: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            let record = OperationResult::from_outcome(outcome);
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            human(outcome);
        }
        Ok(())
    }
}

/// Print a failed command and pick the exit status. Empty ranges are
/// reported but exit successfully.
pub fn report_failure(err: &anyhow::Error, json: bool) -> ExitCode {
    let carrier = err.downcast_ref::<CarrierError>();
    let record = match carrier {
        Some(e) => OperationResult::from_error(e),
        None => OperationResult {
            success: false,
            kind: None,
            message: format!("{err:#}"),
            diagnostic: None,
            details: None,
        },
    };

    if json {
        match serde_json::to_string_pretty(&record) {
            Ok(text) => println!("{text}"),
            Err(_) => eprintln!("❌ {}", record.message),
        }
    } else if record.is_warning() {
        println!("⚠️  {}", record.message);
    } else {
        match record.kind {
            Some(kind) => eprintln!("❌ {kind}: {}", record.message),
            None => eprintln!("❌ {}", record.message),
        }
        if let Some(diagnostic) = &record.diagnostic {
            for line in diagnostic.lines() {
                eprintln!("   │ {line}");
            }
        }
    }

    if carrier.is_some_and(|e| !e.is_fatal()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
