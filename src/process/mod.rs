//! Child process spawning, output streaming and scoped ownership.

mod guard;
mod name;
mod spawn;
mod stream;

pub use guard::*;
pub use name::*;
pub use spawn::*;
pub use stream::*;
