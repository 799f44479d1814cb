//! Provided store realizations: in-memory cache tiers, a filesystem tier,
//! key-value-cache backed tiers and the two-tier [`Layered`] composition.

mod distributed;
mod fs;
mod layered;
mod memory;

pub use distributed::*;
pub use fs::*;
pub use layered::*;
pub use memory::*;
