pub mod coverage;
pub mod jvm;
