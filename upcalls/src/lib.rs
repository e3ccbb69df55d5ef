mod capability;
mod entry;
mod error;
mod execution;
mod heap;
mod loom;
mod object;
mod queue;
mod roots;
mod scheduler;
mod settings;
mod threads;
mod value;
mod visitor;

pub use capability::*;
pub use entry::*;
pub use error::*;
pub use execution::*;
pub use heap::*;
pub use object::*;
pub use queue::*;
pub use roots::for_each_root_in_upcall_queue;
pub use scheduler::*;
pub use settings::*;
pub use threads::*;
pub use value::*;
pub use visitor::*;
