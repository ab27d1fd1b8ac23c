pub mod cluster_health;
pub mod index_meta;
pub mod recovery;
pub mod server_info;
pub mod snapshot;
pub mod task;
