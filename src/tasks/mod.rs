pub mod control;
pub mod decision;
pub mod processor;
