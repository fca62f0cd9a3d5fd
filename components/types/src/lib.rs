pub mod extent;
pub mod record;

pub use extent::{Extent, ExtentWithPart, ObjectPart, SectorEntry};
pub use record::WriteRecord;
