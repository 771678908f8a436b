pub mod clock;
pub mod db;

pub use clock::FixedOffsetClock;
pub use db::DbAdapter;
