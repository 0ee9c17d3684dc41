//! Infrastructure shared by the disk layer and the buffer cache

pub mod lwlock;
pub mod ticks;
