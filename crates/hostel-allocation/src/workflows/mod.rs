pub mod allocation;
pub mod import;
