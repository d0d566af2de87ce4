pub mod deploy_lock;
pub mod deployer;
pub mod edge_cache;
pub mod invalidation;
pub mod storage;
pub mod trust;

pub use deploy_lock::*;
pub use deployer::*;
pub use edge_cache::*;
pub use invalidation::*;
pub use storage::*;
pub use trust::*;
