pub mod aggregate_result;
pub mod compile_record;
pub mod execution_result;
pub mod fixture;
pub mod submission;
pub mod test_case;
