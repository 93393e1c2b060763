pub mod constraint;
pub mod constraints;
pub mod domain;
pub mod heuristics;
pub mod search;
pub mod stats;
pub mod store;
pub mod work_list;
