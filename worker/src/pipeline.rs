//! One work order end to end: prepare, synchronize, test.

use chrono::Local;
use tracing::{error, info, instrument, warn};

use crate::core::types::TestFileMatcher;
use crate::error::PipelineError;
use crate::io::git::VersionControl;
use crate::io::output::OutputSink;
use crate::io::sync::get_source;
use crate::io::unit_tests::{TestInvoker, run_unit_tests};
use crate::order::{CompletedWorkOrder, WorkOrder};

/// Run every stage of `order`, recording timing and the terminal error on it.
///
/// Never returns an error: failure is recorded in `failed` and `error` of the
/// returned order.
#[instrument(skip_all, fields(package = %order.package, branch = %order.branch))]
pub fn run_work_order<V, T>(
    mut order: WorkOrder,
    sink: &OutputSink,
    vcs: &V,
    tests: &T,
    matcher: &TestFileMatcher,
) -> CompletedWorkOrder
where
    V: VersionControl + ?Sized,
    T: TestInvoker + ?Sized,
{
    let start = Local::now();
    order.execute_start_time = Some(start);
    order.wait_duration = (start - order.submit_time).to_std().ok();

    let result = get_source(&mut order, sink, vcs)
        .and_then(|()| run_unit_tests(&mut order, sink, tests, matcher));

    order.execution_duration = (Local::now() - start).to_std().ok();
    let elapsed = order.execution_duration.unwrap_or_default();

    match result {
        Ok(()) => {
            info!(elapsed_ms = elapsed.as_millis() as u64, "work order passed");
            let message = format!(
                "[{}] Work order completed in {:.3}s.",
                order.package,
                elapsed.as_secs_f64()
            );
            if let Err(err) = sink.report(&message) {
                order.fail(PipelineError::report(&order.package, order.workspace_dir(), err));
            }
        }
        Err(err) => {
            error!(stage = %err.stage, operation = %err.operation, "work order failed");
            let message = format!("Work order failed: {}", err.chain());
            if let Err(report_err) = sink.report(&message) {
                warn!(err = %report_err, "failure summary lost");
            }
            order.fail(err);
        }
    }
    order.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Operation, Stage};
    use crate::test_support::{ScriptedTests, ScriptedVcs, TestLayout, capture_sink};

    #[test]
    fn successful_order_records_timing() {
        let layout = TestLayout::new();
        let order = layout.order("svc", "main");
        let (sink, buffer) = capture_sink();

        let done = run_work_order(
            order,
            &sink,
            &ScriptedVcs::default(),
            &ScriptedTests::default(),
            &TestFileMatcher::default(),
        );

        assert!(!done.failed);
        assert!(done.error.is_none());
        assert!(done.execute_start_time.is_some());
        assert!(done.wait_duration.is_some());
        assert!(done.execution_duration.is_some());
        assert!(buffer.contents().contains("[svc] Work order completed in "));
    }

    #[test]
    fn failure_is_recorded_not_returned() {
        let layout = TestLayout::new();
        let order = layout.order("svc", "main");
        let (sink, buffer) = capture_sink();
        let vcs = ScriptedVcs::default().fail_on(Operation::Pull);

        let done = run_work_order(
            order,
            &sink,
            &vcs,
            &ScriptedTests::default(),
            &TestFileMatcher::default(),
        );

        assert!(done.failed);
        let err = done.error.as_ref().expect("error kept");
        assert_eq!(err.stage, Stage::Sync);
        assert_eq!(err.operation, Operation::Pull);
        assert!(buffer.contents().contains("Work order failed: [svc] pull failed in ["));
    }
}
