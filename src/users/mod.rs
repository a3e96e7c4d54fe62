pub mod collection;
pub mod user;

pub use collection::{CoreRequest, SyncOutcome, UsersCollection};
pub use user::{MasterAddress, MultiuserJob, User};
