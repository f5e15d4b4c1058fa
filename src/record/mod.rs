mod codec;
mod page;
mod scan;
mod store;

pub use scan::RecordScan;
pub use store::RecordStore;
