mod interrupt;
mod queue;
mod semaphore;

pub use interrupt::*;
pub use queue::*;
pub use semaphore::*;
