pub mod agent;
pub mod checkpoint;
pub mod data;
pub mod exploration;
pub mod trainer;
