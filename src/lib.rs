pub mod utils;
pub mod gpu;
pub mod light;
pub mod pipeline;

pub use utils::Handle;
pub use pipeline::{DrawSpan, Pipeline};

pub use gpu::*;
