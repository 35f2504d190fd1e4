pub mod handle;
pub mod resource_list;

pub use handle::{Handle, Pool};
pub use resource_list::ResourceList;
