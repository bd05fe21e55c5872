use msgq_cli::run_cli;
use std::time::Duration;
use tracing::error;

fn main() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            std::process::exit(6);
        }
    };

    let result = runtime.block_on(run_cli());

    // A listen loop may leave a receive parked in the kernel.
    runtime.shutdown_timeout(Duration::from_millis(100));

    if let Err(e) = result {
        error!("CLI error: {}", e);
        eprintln!("error: {e}");

        std::process::exit(e.exit_code());
    }
}
