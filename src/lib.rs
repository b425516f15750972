pub mod env;
pub mod model;
pub mod training;
