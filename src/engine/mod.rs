pub mod actions;
pub mod flow;
pub mod machine;
pub mod presence;
pub mod session;
pub mod try_period;
