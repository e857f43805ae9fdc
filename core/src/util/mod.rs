pub mod env;
pub mod fast_map;
pub mod lock;
