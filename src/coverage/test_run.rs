use crate::coverage::data::CoverageData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Receiver of the probe calls that instrumented code makes
///
/// Instrumented methods call static methods on `mockit/coverage/TestRun` with the signatures
/// below. This is the recording side of those calls: each hook finds the file data by index (or
/// by source file name, for fields) and bumps the matching counters. Hooks may be called from
/// any number of threads, and do nothing once the run is terminated.
///
/// | Hook | JVM descriptor |
/// |---|---|
/// | `lineExecuted` | `(II)V` |
/// | `branchExecuted` | `(III)V` |
/// | `fieldRead`, `fieldAssigned` | `(Ljava/lang/String;Ljava/lang/String;)V` |
/// | `fieldRead`, `fieldAssigned` on instances | `(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)V` |
#[derive(Debug)]
pub struct TestRun {
    data: Arc<CoverageData>,
    test_id: AtomicU32,
}

impl TestRun {
    pub fn new(data: Arc<CoverageData>) -> TestRun {
        TestRun {
            data,
            test_id: AtomicU32::new(0),
        }
    }

    pub fn coverage_data(&self) -> &Arc<CoverageData> {
        &self.data
    }

    /// Identifier of the test currently running, used to attribute field accesses
    pub fn test_id(&self) -> u32 {
        self.test_id.load(Ordering::Relaxed)
    }

    pub fn set_test_id(&self, test_id: u32) {
        self.test_id.store(test_id, Ordering::Relaxed);
    }

    pub fn line_executed(&self, file_index: usize, line: u32) {
        if self.data.is_terminated() {
            return;
        }
        match self.data.file_data_at(file_index) {
            Some(file) => {
                file.line_coverage.register_execution(line);
            }
            None => log::warn!("Line {} executed in unknown file #{}", line, file_index),
        }
    }

    pub fn branch_executed(&self, file_index: usize, line: u32, branch_index: usize) {
        if self.data.is_terminated() {
            return;
        }
        if let Some(file) = self.data.file_data_at(file_index) {
            if file.line_coverage.has_valid_branch(line, branch_index) {
                file.line_coverage
                    .register_branch_execution(line, branch_index);
            }
        }
    }

    pub fn field_assigned(&self, file: &str, class_and_field: &str) {
        if self.data.is_terminated() {
            return;
        }
        if let Some(file) = self.data.file_data(file) {
            file.data_coverage
                .register_assignment_to_static_field(class_and_field, self.test_id());
        }
    }

    pub fn field_read(&self, file: &str, class_and_field: &str) {
        if self.data.is_terminated() {
            return;
        }
        if let Some(file) = self.data.file_data(file) {
            file.data_coverage
                .register_read_of_static_field(class_and_field, self.test_id());
        }
    }

    pub fn instance_field_assigned(&self, instance: u64, file: &str, class_and_field: &str) {
        if self.data.is_terminated() {
            return;
        }
        if let Some(file) = self.data.file_data(file) {
            file.data_coverage.register_assignment_to_instance_field(
                instance,
                class_and_field,
                self.test_id(),
            );
        }
    }

    pub fn instance_field_read(&self, instance: u64, file: &str, class_and_field: &str) {
        if self.data.is_terminated() {
            return;
        }
        if let Some(file) = self.data.file_data(file) {
            file.data_coverage.register_read_of_instance_field(
                instance,
                class_and_field,
                self.test_id(),
            );
        }
    }

    /// Stop recording, for probes that run after the tests are done
    pub fn terminate(&self) {
        self.data.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.data.is_terminated()
    }
}
