//! Scene scanner: signature detection, disinfection, home check, walker, worker pool.

pub mod disinfect;
pub mod home;
pub mod pipeline;
pub mod signature;
pub mod walker;
