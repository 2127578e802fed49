pub mod checkpoint;
pub mod event;
pub mod order;
pub mod presence;
pub mod step;
