pub mod candidate;
pub mod decision;
pub mod group;
pub mod summary;

pub use candidate::*;
pub use decision::*;
pub use group::*;
pub use summary::*;
