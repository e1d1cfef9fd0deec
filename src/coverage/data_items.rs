//! Coverage of fields, where a field counts as covered when some test reads back a value it
//! assigned

use crate::coverage::data::PerFileCoverage;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Default)]
struct FieldCounts {
    read_count: AtomicU32,
    write_count: AtomicU32,

    /// Covered in a previous test run
    previously_covered: AtomicBool,
}

impl FieldCounts {
    fn read(&self) {
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    fn write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    fn add_from_previous_test_run(&self, previous: &FieldCounts, previously_covered: bool) {
        self.read_count
            .fetch_add(previous.read_count.load(Ordering::Relaxed), Ordering::Relaxed);
        self.write_count
            .fetch_add(previous.write_count.load(Ordering::Relaxed), Ordering::Relaxed);
        if previously_covered {
            self.previously_covered.store(true, Ordering::Relaxed);
        }
    }

    /// Counts of a previous run, without its per-test tracking
    fn carried_over(&self, covered: bool) -> FieldCounts {
        FieldCounts {
            read_count: AtomicU32::new(self.read_count.load(Ordering::Relaxed)),
            write_count: AtomicU32::new(self.write_count.load(Ordering::Relaxed)),
            previously_covered: AtomicBool::new(covered),
        }
    }
}

/// Static field, tracked per test
#[derive(Debug, Default)]
pub struct StaticFieldData {
    counts: FieldCounts,

    /// Whether each test's last access to the field was an assignment not yet read back
    unread_assignment_by_test: Mutex<HashMap<u32, bool>>,
}

impl StaticFieldData {
    pub fn register_assignment(&self, test_id: u32) {
        self.unread_assignment_by_test.lock().insert(test_id, true);
        self.counts.write();
    }

    pub fn register_read(&self, test_id: u32) {
        self.unread_assignment_by_test.lock().insert(test_id, false);
        self.counts.read();
    }

    pub fn read_count(&self) -> u32 {
        self.counts.read_count.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u32 {
        self.counts.write_count.load(Ordering::Relaxed)
    }

    pub fn is_covered(&self) -> bool {
        self.counts.previously_covered.load(Ordering::Relaxed)
            || self
                .unread_assignment_by_test
                .lock()
                .values()
                .any(|unread| !unread)
    }

    fn carried_over(&self) -> StaticFieldData {
        StaticFieldData {
            counts: self.counts.carried_over(self.is_covered()),
            unread_assignment_by_test: Mutex::default(),
        }
    }
}

/// Instance field, tracked per test and per owning instance
///
/// Instances are told apart by an identity value given by the caller (an identity hash code on
/// the JVM side).
#[derive(Debug, Default)]
pub struct InstanceFieldData {
    counts: FieldCounts,
    unread_instances_by_test: Mutex<BTreeMap<u32, Vec<u64>>>,
}

impl InstanceFieldData {
    pub fn register_assignment(&self, test_id: u32, instance: u64) {
        let mut by_test = self.unread_instances_by_test.lock();
        let unread = by_test.entry(test_id).or_default();
        if !unread.contains(&instance) {
            unread.push(instance);
        }
        self.counts.write();
    }

    pub fn register_read(&self, test_id: u32, instance: u64) {
        let mut by_test = self.unread_instances_by_test.lock();
        let unread = by_test.entry(test_id).or_default();
        unread.retain(|&id| id != instance);
        self.counts.read();
    }

    pub fn read_count(&self) -> u32 {
        self.counts.read_count.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u32 {
        self.counts.write_count.load(Ordering::Relaxed)
    }

    pub fn is_covered(&self) -> bool {
        self.counts.previously_covered.load(Ordering::Relaxed)
            || self
                .unread_instances_by_test
                .lock()
                .values()
                .any(|unread| unread.is_empty())
    }

    /// Instances still holding an assignment no one read, for the first test that left any
    pub fn owner_instances_with_unread_assignments(&self) -> Vec<u64> {
        if self.is_covered() {
            return vec![];
        }
        self.unread_instances_by_test
            .lock()
            .values()
            .next()
            .cloned()
            .unwrap_or_default()
    }

    fn carried_over(&self) -> InstanceFieldData {
        InstanceFieldData {
            counts: self.counts.carried_over(self.is_covered()),
            unread_instances_by_test: Mutex::default(),
        }
    }
}

#[derive(Debug, Default)]
struct FieldTable {
    /// Every field, as `SimpleClassName.fieldName`, in registration order
    all_fields: Vec<String>,
    static_fields: HashMap<String, StaticFieldData>,
    instance_fields: HashMap<String, InstanceFieldData>,
}

/// Field coverage of one source file
#[derive(Debug, Default)]
pub struct PerFileDataCoverage {
    table: RwLock<FieldTable>,
}

impl PerFileDataCoverage {
    pub fn new() -> PerFileDataCoverage {
        PerFileDataCoverage::default()
    }

    pub fn add_field(&self, class_name: &str, field_name: &str, is_static: bool) {
        let class_and_field = format!("{}.{}", class_name, field_name);
        let mut table = self.table.write();
        if !table.all_fields.contains(&class_and_field) {
            table.all_fields.push(class_and_field.clone());
        }
        if is_static {
            table.static_fields.entry(class_and_field).or_default();
        } else {
            table.instance_fields.entry(class_and_field).or_default();
        }
    }

    pub fn is_field_with_coverage_data(&self, class_and_field: &str) -> bool {
        let table = self.table.read();
        table.instance_fields.contains_key(class_and_field)
            || table.static_fields.contains_key(class_and_field)
    }

    pub fn all_fields(&self) -> Vec<String> {
        self.table.read().all_fields.clone()
    }

    pub fn has_fields(&self) -> bool {
        !self.table.read().all_fields.is_empty()
    }

    pub fn register_assignment_to_static_field(&self, class_and_field: &str, test_id: u32) {
        if let Some(data) = self.table.read().static_fields.get(class_and_field) {
            data.register_assignment(test_id);
        }
    }

    pub fn register_read_of_static_field(&self, class_and_field: &str, test_id: u32) {
        if let Some(data) = self.table.read().static_fields.get(class_and_field) {
            data.register_read(test_id);
        }
    }

    pub fn register_assignment_to_instance_field(
        &self,
        instance: u64,
        class_and_field: &str,
        test_id: u32,
    ) {
        if let Some(data) = self.table.read().instance_fields.get(class_and_field) {
            data.register_assignment(test_id, instance);
        }
    }

    pub fn register_read_of_instance_field(
        &self,
        instance: u64,
        class_and_field: &str,
        test_id: u32,
    ) {
        if let Some(data) = self.table.read().instance_fields.get(class_and_field) {
            data.register_read(test_id, instance);
        }
    }

    /// Run a function on the data of a static field
    pub fn with_static_field<R>(
        &self,
        class_and_field: &str,
        f: impl FnOnce(&StaticFieldData) -> R,
    ) -> Option<R> {
        self.table.read().static_fields.get(class_and_field).map(f)
    }

    /// Run a function on the data of an instance field
    pub fn with_instance_field<R>(
        &self,
        class_and_field: &str,
        f: impl FnOnce(&InstanceFieldData) -> R,
    ) -> Option<R> {
        self.table.read().instance_fields.get(class_and_field).map(f)
    }

    pub fn is_covered(&self, class_and_field: &str) -> bool {
        let table = self.table.read();
        table
            .instance_fields
            .get(class_and_field)
            .map_or(false, InstanceFieldData::is_covered)
            || table
                .static_fields
                .get(class_and_field)
                .map_or(false, StaticFieldData::is_covered)
    }

    /// Fold in the field data of a previous run over the same source file
    pub fn merge_information(&self, previous: &PerFileDataCoverage) {
        if std::ptr::eq(self, previous) {
            return;
        }
        let previous = previous.table.read();
        let mut table = self.table.write();

        for (name, previous_data) in &previous.static_fields {
            match table.static_fields.get(name) {
                Some(data) => data
                    .counts
                    .add_from_previous_test_run(&previous_data.counts, previous_data.is_covered()),
                None => {
                    table
                        .static_fields
                        .insert(name.clone(), previous_data.carried_over());
                }
            }
        }
        for (name, previous_data) in &previous.instance_fields {
            match table.instance_fields.get(name) {
                Some(data) => data
                    .counts
                    .add_from_previous_test_run(&previous_data.counts, previous_data.is_covered()),
                None => {
                    table
                        .instance_fields
                        .insert(name.clone(), previous_data.carried_over());
                }
            }
        }
        for name in &previous.all_fields {
            if !table.all_fields.contains(name) {
                table.all_fields.push(name.clone());
            }
        }
    }
}

impl PerFileCoverage for PerFileDataCoverage {
    fn total_items(&self) -> u32 {
        let table = self.table.read();
        (table.static_fields.len() + table.instance_fields.len()) as u32
    }

    fn covered_items(&self) -> u32 {
        let table = self.table.read();
        let covered_static = table.static_fields.values().filter(|f| f.is_covered());
        let covered_instance = table.instance_fields.values().filter(|f| f.is_covered());
        (covered_static.count() + covered_instance.count()) as u32
    }
}
