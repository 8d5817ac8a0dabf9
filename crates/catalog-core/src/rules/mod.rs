pub mod graph_validation;
pub mod reference_closure;
